//! Persistent agent memory backed by a JSON snapshot.
//!
//! Stores facts, entity notes, a task log and reflections so that roles
//! running in different tasks (and different runs) can coordinate through a
//! shared blackboard. Every mutation rewrites the snapshot before returning.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::persist::{self, StorageError};

/// A timestamped piece of text (facts and reflections).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Accumulated information about a named entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub information: Vec<String>,
    pub first_mentioned: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// One status change in a task's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub status: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Current status plus the full history of a logged task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: String,
    pub history: Vec<TaskHistoryEntry>,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// The on-disk document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub facts: Vec<Note>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityRecord>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskRecord>,
    #[serde(default)]
    pub reflections: Vec<Note>,
    pub last_updated: DateTime<Utc>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            facts: Vec::new(),
            entities: BTreeMap::new(),
            tasks: BTreeMap::new(),
            reflections: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

/// What to do when the snapshot on disk cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// Move the unreadable file aside, log a warning and start empty.
    #[default]
    Reinitialize,
    /// Refuse to open the store.
    FailFast,
}

/// Shared memory store. Clone the `Arc` around it, never the store.
pub struct MemoryStore {
    path: PathBuf,
    state: Mutex<Snapshot>,
}

impl MemoryStore {
    /// Open the snapshot at `path` with the default [`SnapshotPolicy`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::open_with_policy(path, SnapshotPolicy::default())
    }

    pub fn open_with_policy(
        path: impl Into<PathBuf>,
        policy: SnapshotPolicy,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let snapshot = match persist::read_json::<Snapshot>(&path) {
            Ok(Some(snapshot)) => {
                tracing::debug!(
                    path = %path.display(),
                    facts = snapshot.facts.len(),
                    entities = snapshot.entities.len(),
                    tasks = snapshot.tasks.len(),
                    "Loaded memory snapshot"
                );
                snapshot
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "No memory snapshot, starting empty");
                Self::initialize(&path)?
            }
            Err(e) if policy == SnapshotPolicy::Reinitialize => {
                tracing::warn!(error = %e, "Discarding unreadable memory snapshot");
                if matches!(e, StorageError::Corrupt { .. }) {
                    let backup = backup_path(&path);
                    match std::fs::rename(&path, &backup) {
                        Ok(()) => tracing::warn!(backup = %backup.display(), "Corrupt snapshot preserved"),
                        Err(err) => tracing::warn!(error = %err, "Could not preserve corrupt snapshot"),
                    }
                }
                Self::initialize(&path)?
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            state: Mutex::new(snapshot),
        })
    }

    fn initialize(path: &Path) -> Result<Snapshot, StorageError> {
        let snapshot = Snapshot::empty();
        persist::write_json_atomic(path, &snapshot, true)?;
        Ok(snapshot)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to a copy of the state, persist it, then publish it.
    ///
    /// If the write fails the in-memory state is left untouched.
    fn mutate<R>(&self, f: impl FnOnce(&mut Snapshot, DateTime<Utc>) -> R) -> Result<R, StorageError> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut next = state.clone();
        let out = f(&mut next, now);
        next.last_updated = now;
        persist::write_json_atomic(&self.path, &next, true)?;
        *state = next;
        Ok(out)
    }

    // ── Facts ──────────────────────────────────────────────────────

    pub fn store_fact(&self, content: &str) -> Result<(), StorageError> {
        self.mutate(|s, now| {
            s.facts.push(Note {
                content: content.to_string(),
                timestamp: now,
            })
        })
    }

    /// All facts, or those containing `query` case-insensitively.
    pub fn retrieve_facts(&self, query: Option<&str>) -> FactMatches {
        let state = self.state.lock();
        if state.facts.is_empty() {
            return FactMatches::NoneStored;
        }
        match query.map(str::trim).filter(|q| !q.is_empty()) {
            None => FactMatches::All(state.facts.clone()),
            Some(q) => {
                let needle = q.to_lowercase();
                let found: Vec<Note> = state
                    .facts
                    .iter()
                    .filter(|f| f.content.to_lowercase().contains(&needle))
                    .cloned()
                    .collect();
                if found.is_empty() {
                    FactMatches::NoMatch(q.to_string())
                } else {
                    FactMatches::Matching(q.to_string(), found)
                }
            }
        }
    }

    pub fn facts(&self) -> Vec<Note> {
        self.state.lock().facts.clone()
    }

    // ── Entities ───────────────────────────────────────────────────

    /// Create the entity or append to its information list.
    pub fn store_entity_info(&self, name: &str, information: &str) -> Result<(), StorageError> {
        self.mutate(|s, now| {
            s.entities
                .entry(name.to_string())
                .and_modify(|e| {
                    e.information.push(information.to_string());
                    e.last_updated = now;
                })
                .or_insert_with(|| EntityRecord {
                    information: vec![information.to_string()],
                    first_mentioned: now,
                    last_updated: now,
                });
        })
    }

    pub fn retrieve_entity(&self, name: &str) -> EntityLookup {
        match self.state.lock().entities.get(name) {
            Some(record) => EntityLookup::Found(name.to_string(), record.clone()),
            None => EntityLookup::NotFound(name.to_string()),
        }
    }

    pub fn entity(&self, name: &str) -> Option<EntityRecord> {
        self.state.lock().entities.get(name).cloned()
    }

    // ── Task log ───────────────────────────────────────────────────

    /// Upsert the task record and append a history entry.
    pub fn log_task(&self, name: &str, status: &str, details: &str) -> Result<(), StorageError> {
        self.mutate(|s, now| {
            let entry = TaskHistoryEntry {
                status: status.to_string(),
                details: details.to_string(),
                timestamp: now,
            };
            match s.tasks.get_mut(name) {
                Some(record) => {
                    record.status = status.to_string();
                    record.history.push(entry);
                    record.last_updated = now;
                }
                None => {
                    s.tasks.insert(
                        name.to_string(),
                        TaskRecord {
                            status: status.to_string(),
                            history: vec![entry],
                            created: now,
                            last_updated: now,
                        },
                    );
                }
            }
        })
    }

    /// Detail for one task, or a summary of every logged task.
    pub fn task_status(&self, name: Option<&str>) -> TaskStatusReport {
        let state = self.state.lock();
        if state.tasks.is_empty() {
            return TaskStatusReport::NoneLogged;
        }
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => match state.tasks.get(name) {
                Some(record) => TaskStatusReport::Detail(name.to_string(), record.clone()),
                None => TaskStatusReport::NotFound(name.to_string()),
            },
            None => TaskStatusReport::Summary(
                state
                    .tasks
                    .iter()
                    .map(|(name, r)| TaskSummary {
                        name: name.clone(),
                        status: r.status.clone(),
                        last_updated: r.last_updated,
                    })
                    .collect(),
            ),
        }
    }

    pub fn task(&self, name: &str) -> Option<TaskRecord> {
        self.state.lock().tasks.get(name).cloned()
    }

    // ── Reflections ────────────────────────────────────────────────

    pub fn add_reflection(&self, content: &str) -> Result<(), StorageError> {
        self.mutate(|s, now| {
            s.reflections.push(Note {
                content: content.to_string(),
                timestamp: now,
            })
        })
    }

    pub fn reflections(&self) -> Reflections {
        Reflections(self.state.lock().reflections.clone())
    }

    /// A copy of the whole store.
    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().clone()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.state.lock().last_updated
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

/// `ctime`-style rendering used in the textual reports.
fn ctime(ts: &DateTime<Utc>) -> String {
    ts.format("%a %b %e %H:%M:%S %Y").to_string()
}

// ── Query results ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum FactMatches {
    NoneStored,
    NoMatch(String),
    All(Vec<Note>),
    Matching(String, Vec<Note>),
}

impl FactMatches {
    pub fn notes(&self) -> &[Note] {
        match self {
            FactMatches::All(n) | FactMatches::Matching(_, n) => n,
            _ => &[],
        }
    }
}

impl fmt::Display for FactMatches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (header, notes) = match self {
            FactMatches::NoneStored => return write!(f, "No facts stored in memory."),
            FactMatches::NoMatch(q) => return write!(f, "No facts found matching query: '{q}'"),
            FactMatches::All(notes) => ("All stored facts:".to_string(), notes),
            FactMatches::Matching(q, notes) => (format!("Facts related to '{q}':"), notes),
        };
        writeln!(f, "{header}\n")?;
        for (i, note) in notes.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, note.content)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityLookup {
    NotFound(String),
    Found(String, EntityRecord),
}

impl fmt::Display for EntityLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityLookup::NotFound(name) => write!(f, "No information found for entity: '{name}'"),
            EntityLookup::Found(name, record) => {
                writeln!(f, "Information about '{name}':\n")?;
                for (i, info) in record.information.iter().enumerate() {
                    writeln!(f, "{}. {info}", i + 1)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub name: String,
    pub status: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatusReport {
    NoneLogged,
    NotFound(String),
    Detail(String, TaskRecord),
    Summary(Vec<TaskSummary>),
}

impl fmt::Display for TaskStatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatusReport::NoneLogged => write!(f, "No tasks have been logged."),
            TaskStatusReport::NotFound(name) => write!(f, "No task found with name: '{name}'"),
            TaskStatusReport::Detail(name, task) => {
                writeln!(f, "Task: '{name}'")?;
                writeln!(f, "Status: {}", task.status)?;
                writeln!(f, "Created: {}", ctime(&task.created))?;
                writeln!(f, "Last Updated: {}\n", ctime(&task.last_updated))?;
                writeln!(f, "History:")?;
                for (i, entry) in task.history.iter().enumerate() {
                    writeln!(f, "{}. [{}] Status: {}", i + 1, ctime(&entry.timestamp), entry.status)?;
                    writeln!(f, "   Details: {}", entry.details)?;
                }
                Ok(())
            }
            TaskStatusReport::Summary(tasks) => {
                writeln!(f, "Task Summary:\n")?;
                for t in tasks {
                    writeln!(
                        f,
                        "• {}: {} (Last updated: {})",
                        t.name,
                        t.status,
                        ctime(&t.last_updated)
                    )?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reflections(pub Vec<Note>);

impl fmt::Display for Reflections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "No reflections stored in memory.");
        }
        writeln!(f, "Stored reflections:\n")?;
        for (i, r) in self.0.iter().enumerate() {
            writeln!(f, "{}. [{}]", i + 1, ctime(&r.timestamp))?;
            writeln!(f, "   {}\n", r.content)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path().join("agent_memory.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn open_missing_snapshot_writes_empty_document() {
        let (_dir, store) = make_store();
        assert!(store.path().exists());
        let snap = store.snapshot();
        assert!(snap.facts.is_empty() && snap.entities.is_empty());
    }

    #[test]
    fn stored_fact_appears_once_in_order() {
        let (_dir, store) = make_store();
        store.store_fact("first").unwrap();
        store.store_fact("second").unwrap();

        let facts = store.retrieve_facts(None);
        let contents: Vec<&str> = facts.notes().iter().map(|n| n.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn fact_query_is_case_insensitive_substring() {
        let (_dir, store) = make_store();
        store.store_fact("RAG uses a Vector Store").unwrap();
        store.store_fact("Fine-tuning changes weights").unwrap();

        let found = store.retrieve_facts(Some("vector"));
        assert_eq!(found.notes().len(), 1);
        assert!(found.to_string().starts_with("Facts related to 'vector':"));
    }

    #[test]
    fn fact_query_without_match_is_explicit() {
        let (_dir, store) = make_store();
        assert_eq!(store.retrieve_facts(Some("xyz")), FactMatches::NoneStored);

        store.store_fact("something else").unwrap();
        let res = store.retrieve_facts(Some("xyz"));
        assert_eq!(res, FactMatches::NoMatch("xyz".into()));
        assert_eq!(res.to_string(), "No facts found matching query: 'xyz'");
    }

    #[test]
    fn entity_information_merges_in_order() {
        let (_dir, store) = make_store();
        store.store_entity_info("Acme", "info1").unwrap();
        let first = store.snapshot().entities["Acme"].clone();
        store.store_entity_info("Acme", "info2").unwrap();

        match store.retrieve_entity("Acme") {
            EntityLookup::Found(_, record) => {
                assert_eq!(record.information, vec!["info1", "info2"]);
                assert_eq!(record.first_mentioned, first.first_mentioned);
                assert!(record.last_updated >= first.last_updated);
            }
            other => panic!("expected entity, got {other:?}"),
        }
    }

    #[test]
    fn unknown_entity_reports_not_found() {
        let (_dir, store) = make_store();
        let res = store.retrieve_entity("Nobody");
        assert_eq!(res.to_string(), "No information found for entity: 'Nobody'");
    }

    #[test]
    fn log_task_upserts_and_keeps_history() {
        let (_dir, store) = make_store();
        store.log_task("research", "started", "kickoff").unwrap();
        store.log_task("research", "completed", "done").unwrap();

        match store.task_status(Some("research")) {
            TaskStatusReport::Detail(_, record) => {
                assert_eq!(record.status, "completed");
                let statuses: Vec<&str> = record.history.iter().map(|h| h.status.as_str()).collect();
                assert_eq!(statuses, vec!["started", "completed"]);
            }
            other => panic!("expected detail, got {other:?}"),
        }
        assert!(matches!(store.task_status(Some("other")), TaskStatusReport::NotFound(_)));
        assert!(store.task_status(None).to_string().contains("• research: completed"));
    }

    #[test]
    fn reflections_append() {
        let (_dir, store) = make_store();
        assert_eq!(store.reflections().to_string(), "No reflections stored in memory.");
        store.add_reflection("went well").unwrap();
        assert_eq!(store.reflections().0.len(), 1);
    }

    #[test]
    fn every_mutation_is_on_disk_and_bumps_timestamp() {
        let (dir, store) = make_store();
        let before = store.last_updated();
        store.store_fact("durable").unwrap();
        store.store_entity_info("Acme", "x").unwrap();
        store.log_task("t", "started", "").unwrap();
        store.add_reflection("r").unwrap();
        assert!(store.last_updated() >= before);

        let reopened = MemoryStore::open(dir.path().join("agent_memory.json")).unwrap();
        assert_eq!(reopened.snapshot(), store.snapshot());
    }

    #[test]
    fn corrupt_snapshot_is_moved_aside_and_reinitialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");
        std::fs::write(&path, b"{ definitely not json").unwrap();

        let store = MemoryStore::open(&path).unwrap();
        assert!(store.facts().is_empty());
        assert!(backup_path(&path).exists(), "corrupt file should be kept");
    }

    #[test]
    fn corrupt_snapshot_fails_fast_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");
        std::fs::write(&path, b"[]").unwrap();

        let err = MemoryStore::open_with_policy(&path, SnapshotPolicy::FailFast)
            .err()
            .expect("fail-fast must refuse a corrupt snapshot");
        assert!(matches!(err, StorageError::Corrupt { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"[]", "file must be left alone");
    }
}
