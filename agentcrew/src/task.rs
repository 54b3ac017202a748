//! Tasks and the dependency graph between them.
//!
//! Every mutation of [`TaskGraph`] either succeeds completely or leaves the
//! graph exactly as it was.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::role::Role;

pub type TaskId = String;

/// Where a task is in its run. Only `Completed` carries a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Revising,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::AwaitingApproval => write!(f, "awaiting_approval"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Revising => write!(f, "revising"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// What the caller declares; turned into a [`Task`] by [`TaskGraph::add`].
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: Option<TaskId>,
    pub description: String,
    pub expected_output: String,
    pub role: Arc<Role>,
    pub context: Vec<TaskId>,
    pub human_approval: bool,
}

impl TaskSpec {
    /// A pending task for `role`; `expected_output` only guides the prompt.
    pub fn new(role: Arc<Role>, description: &str, expected_output: &str) -> Self {
        Self {
            id: None,
            description: description.to_string(),
            expected_output: expected_output.to_string(),
            role,
            context: Vec::new(),
            human_approval: false,
        }
    }

    /// Use `id` instead of a generated `task-N`.
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Upstream tasks whose outputs feed this one, in prompt order.
    pub fn with_context(mut self, upstream: &[&str]) -> Self {
        self.context = upstream.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Hold the output for reviewer approval before it counts as done.
    pub fn with_approval(mut self, required: bool) -> Self {
        self.human_approval = required;
        self
    }
}

/// A task inside a [`TaskGraph`], with its run state.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    description: String,
    expected_output: String,
    role: Arc<Role>,
    context: Vec<TaskId>,
    human_approval: bool,
    state: TaskState,
    result: Option<String>,
    revisions: u32,
}

impl Task {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current description, including any reviewer feedback appended so far.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn expected_output(&self) -> &str {
        &self.expected_output
    }

    pub fn role(&self) -> &Arc<Role> {
        &self.role
    }

    /// Upstream task ids, in prompt order.
    pub fn context(&self) -> &[TaskId] {
        &self.context
    }

    pub fn human_approval(&self) -> bool {
        self.human_approval
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Present only once the task is completed.
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// Revisions requested by reviewers so far.
    pub fn revisions(&self) -> u32 {
        self.revisions
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        if state != TaskState::Completed {
            self.result = None;
        }
        self.state = state;
    }

    pub(crate) fn complete(&mut self, output: String) {
        self.state = TaskState::Completed;
        self.result = Some(output);
    }

    /// Record reviewer feedback; returns the new revision count.
    pub(crate) fn request_revision(&mut self, feedback: &str) -> u32 {
        self.revisions += 1;
        self.description
            .push_str(&format!("\n\nRevision requested by reviewer: {feedback}"));
        self.set_state(TaskState::Revising);
        self.revisions
    }
}

#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
    /// Declaration order.
    order: Vec<TaskId>,
    next_auto_id: usize,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Task ids in declaration order.
    pub fn ids(&self) -> &[TaskId] {
        &self.order
    }

    /// Insert a task. Every upstream must already be in the graph.
    pub fn add(&mut self, spec: TaskSpec) -> Result<TaskId, GraphError> {
        let id = match spec.id {
            Some(id) => id,
            None => self.auto_id(),
        };
        if self.tasks.contains_key(&id) {
            return Err(GraphError::DuplicateTask(id));
        }

        let mut context: Vec<TaskId> = Vec::with_capacity(spec.context.len());
        for upstream in spec.context {
            if upstream == id {
                return Err(GraphError::Cycle {
                    task: id.clone(),
                    path: vec![id.clone(), id],
                });
            }
            if !self.tasks.contains_key(&upstream) {
                return Err(GraphError::MissingDependency { task: id, upstream });
            }
            if !context.contains(&upstream) {
                context.push(upstream);
            }
        }

        tracing::debug!(task = %id, role = %spec.role.name(), upstream = ?context, "Task added");
        self.order.push(id.clone());
        self.tasks.insert(
            id.clone(),
            Task {
                id: id.clone(),
                description: spec.description,
                expected_output: spec.expected_output,
                role: spec.role,
                context,
                human_approval: spec.human_approval,
                state: TaskState::Pending,
                result: None,
                revisions: 0,
            },
        );
        Ok(id)
    }

    /// Make `task` consume the output of `upstream`.
    pub fn add_dependency(&mut self, task: &str, upstream: &str) -> Result<(), GraphError> {
        if !self.tasks.contains_key(task) {
            return Err(GraphError::UnknownTask(task.to_string()));
        }
        if !self.tasks.contains_key(upstream) {
            return Err(GraphError::MissingDependency {
                task: task.to_string(),
                upstream: upstream.to_string(),
            });
        }
        // The new edge closes a cycle iff `task` is already reachable
        // walking upstream from `upstream`.
        if let Some(mut path) = self.upstream_path(upstream, task) {
            path.insert(0, task.to_string());
            return Err(GraphError::Cycle {
                task: task.to_string(),
                path,
            });
        }
        if let Some(t) = self.tasks.get_mut(task)
            && !t.context.iter().any(|u| u == upstream)
        {
            t.context.push(upstream.to_string());
        }
        Ok(())
    }

    /// Path `from → ... → to` following upstream edges, if one exists.
    fn upstream_path(&self, from: &str, to: &str) -> Option<Vec<TaskId>> {
        let mut stack = vec![vec![from.to_string()]];
        let mut seen = HashSet::new();
        while let Some(path) = stack.pop() {
            let Some(last) = path.last() else { continue };
            if last == to {
                return Some(path);
            }
            if !seen.insert(last.clone()) {
                continue;
            }
            if let Some(t) = self.tasks.get(last) {
                for up in t.context.iter().rev() {
                    let mut next = path.clone();
                    next.push(up.clone());
                    stack.push(next);
                }
            }
        }
        None
    }

    /// A dependency-respecting order, stable with respect to declaration.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut remaining: HashMap<&str, usize> = self
            .tasks
            .values()
            .map(|t| (t.id.as_str(), t.context.len()))
            .collect();
        let mut out = Vec::with_capacity(self.tasks.len());
        while out.len() < self.order.len() {
            let Some(next) = self
                .order
                .iter()
                .find(|id| remaining.get(id.as_str()) == Some(&0))
            else {
                break;
            };
            remaining.remove(next.as_str());
            for t in self.tasks.values() {
                if t.context.contains(next)
                    && let Some(n) = remaining.get_mut(t.id.as_str())
                {
                    *n -= 1;
                }
            }
            out.push(next.clone());
        }
        out
    }

    /// Check that `order` names each task once and after all its upstreams.
    pub fn validate_order(&self, order: &[TaskId]) -> Result<(), GraphError> {
        let mut position = HashMap::new();
        for (i, id) in order.iter().enumerate() {
            if !self.tasks.contains_key(id) {
                return Err(GraphError::UnknownTask(id.clone()));
            }
            if position.insert(id.as_str(), i).is_some() {
                return Err(GraphError::DuplicateTask(id.clone()));
            }
        }
        for (i, id) in order.iter().enumerate() {
            let Some(task) = self.tasks.get(id) else { continue };
            for upstream in &task.context {
                match position.get(upstream.as_str()) {
                    Some(&p) if p < i => {}
                    _ => {
                        return Err(GraphError::OutOfOrder {
                            task: id.clone(),
                            upstream: upstream.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The effective prompt for `id`: its description followed by every
    /// upstream output, labeled by producing task, in upstream order.
    pub fn context_for(&self, id: &str) -> Result<String, ContextError> {
        let task = self
            .tasks
            .get(id)
            .ok_or_else(|| ContextError::UnknownTask(id.to_string()))?;
        let mut prompt = task.description.clone();
        for upstream in &task.context {
            let up = self
                .tasks
                .get(upstream)
                .ok_or_else(|| ContextError::UnknownTask(upstream.clone()))?;
            let Some(output) = up.result() else {
                return Err(ContextError::NotReady {
                    task: id.to_string(),
                    upstream: upstream.clone(),
                    state: up.state,
                });
            };
            prompt.push_str(&format!("\n\n[Output of task '{upstream}']\n{output}"));
        }
        Ok(prompt)
    }

    fn auto_id(&mut self) -> TaskId {
        loop {
            self.next_auto_id += 1;
            let id = format!("task-{}", self.next_auto_id);
            if !self.tasks.contains_key(&id) {
                return id;
            }
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("task '{0}' already exists")]
    DuplicateTask(TaskId),
    #[error("unknown task '{0}'")]
    UnknownTask(TaskId),
    #[error("task '{task}' depends on unknown task '{upstream}'")]
    MissingDependency { task: TaskId, upstream: TaskId },
    #[error("dependency cycle at '{task}': {}", .path.join(" -> "))]
    Cycle { task: TaskId, path: Vec<TaskId> },
    #[error("task '{task}' is ordered before its upstream '{upstream}'")]
    OutOfOrder { task: TaskId, upstream: TaskId },
    #[error("role '{0}' is not part of the crew")]
    UnknownRole(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContextError {
    #[error("unknown task '{0}'")]
    UnknownTask(TaskId),
    #[error("task '{task}' needs '{upstream}', which is {state}")]
    NotReady {
        task: TaskId,
        upstream: TaskId,
        state: TaskState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionService, GenerationOptions, ServiceError};
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl CompletionService for Silent {
        async fn complete(&self, _: &str, _: &GenerationOptions) -> Result<String, ServiceError> {
            Err(ServiceError::Empty)
        }
    }

    fn make_role() -> Arc<Role> {
        Arc::new(Role::builder("Worker", Arc::new(Silent)).build().unwrap())
    }

    fn make_graph() -> TaskGraph {
        let role = make_role();
        let mut g = TaskGraph::new();
        g.add(TaskSpec::new(role.clone(), "A", "").with_id("a")).unwrap();
        g.add(TaskSpec::new(role.clone(), "B", "").with_id("b").with_context(&["a"]))
            .unwrap();
        g.add(TaskSpec::new(role, "C", "").with_id("c").with_context(&["a", "b"]))
            .unwrap();
        g
    }

    #[test]
    fn auto_ids_are_sequential() {
        let role = make_role();
        let mut g = TaskGraph::new();
        assert_eq!(g.add(TaskSpec::new(role.clone(), "x", "")).unwrap(), "task-1");
        assert_eq!(g.add(TaskSpec::new(role, "y", "")).unwrap(), "task-2");
    }

    #[test]
    fn unknown_upstream_is_rejected_without_partial_state() {
        let mut g = make_graph();
        let err = g
            .add(TaskSpec::new(make_role(), "D", "").with_id("d").with_context(&["zzz"]))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency {
                task: "d".into(),
                upstream: "zzz".into()
            }
        );
        assert_eq!(g.len(), 3);
        assert!(g.get("d").is_none());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut g = make_graph();
        let err = g.add(TaskSpec::new(make_role(), "again", "").with_id("a")).unwrap_err();
        assert_eq!(err, GraphError::DuplicateTask("a".into()));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut g = TaskGraph::new();
        let err = g
            .add(TaskSpec::new(make_role(), "x", "").with_id("x").with_context(&["x"]))
            .unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert!(g.is_empty());
    }

    #[test]
    fn closing_edge_reports_cycle_and_leaves_graph_unchanged() {
        let mut g = make_graph();
        let err = g.add_dependency("a", "c").unwrap_err();
        match err {
            GraphError::Cycle { task, path } => {
                assert_eq!(task, "a");
                assert_eq!(path.first().map(String::as_str), Some("a"));
                assert_eq!(path.last().map(String::as_str), Some("a"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(g.get("a").unwrap().context().is_empty());
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut g = TaskGraph::new();
        let role = make_role();
        g.add(TaskSpec::new(role.clone(), "late", "").with_id("late")).unwrap();
        g.add(TaskSpec::new(role, "early", "").with_id("early")).unwrap();
        g.add_dependency("late", "early").unwrap();
        assert_eq!(g.topological_order(), vec!["early", "late"]);
    }

    #[test]
    fn out_of_order_declaration_is_detected() {
        let g = make_graph();
        assert!(g.validate_order(&["a".into(), "b".into(), "c".into()]).is_ok());
        let err = g
            .validate_order(&["b".into(), "a".into(), "c".into()])
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::OutOfOrder {
                task: "b".into(),
                upstream: "a".into()
            }
        );
    }

    #[test]
    fn context_lists_upstream_outputs_in_order() {
        let mut g = make_graph();
        let err = g.context_for("b").unwrap_err();
        assert_eq!(
            err,
            ContextError::NotReady {
                task: "b".into(),
                upstream: "a".into(),
                state: TaskState::Pending
            }
        );

        g.get_mut("a").unwrap().complete("ra".into());
        g.get_mut("b").unwrap().complete("rb".into());
        let prompt = g.context_for("c").unwrap();
        assert!(prompt.starts_with("C"));
        let a = prompt.find("ra").unwrap();
        let b = prompt.find("rb").unwrap();
        assert!(a < b, "upstream order must be preserved: {prompt}");
        assert!(prompt.contains("[Output of task 'a']"));
    }

    #[test]
    fn revision_appends_feedback_and_clears_result() {
        let mut g = make_graph();
        let t = g.get_mut("a").unwrap();
        t.complete("draft".into());
        assert_eq!(t.request_revision("more detail"), 1);
        assert_eq!(t.state(), TaskState::Revising);
        assert!(t.result().is_none());
        assert!(t.description().ends_with("Revision requested by reviewer: more detail"));
    }
}
