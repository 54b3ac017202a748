//! Memory tools over the shared [`MemoryStore`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Capability, ToolDef, ToolError, Toolkit, opt_str_arg, str_arg, string_schema};
use crate::memory::MemoryStore;

pub struct MemoryToolkit {
    store: Arc<MemoryStore>,
}

impl MemoryToolkit {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Toolkit for MemoryToolkit {
    fn capability(&self) -> Capability {
        Capability::Memory
    }

    fn defs(&self) -> Vec<ToolDef> {
        vec![
            ToolDef::new(
                "store_fact",
                "Store an important fact in memory.",
                string_schema(&["fact"], &[("fact", "The fact to remember")]),
            ),
            ToolDef::new(
                "retrieve_facts",
                "Retrieve facts from memory, optionally filtered by a search term.",
                string_schema(&[], &[("query", "Optional case-insensitive search term")]),
            ),
            ToolDef::new(
                "store_entity_information",
                "Store or update information about a person, concept or project.",
                string_schema(
                    &["entity_name", "information"],
                    &[
                        ("entity_name", "Name of the entity"),
                        ("information", "Information to store about the entity"),
                    ],
                ),
            ),
            ToolDef::new(
                "retrieve_entity",
                "Retrieve everything stored about an entity.",
                string_schema(&["entity_name"], &[("entity_name", "Name of the entity")]),
            ),
            ToolDef::new(
                "log_task",
                "Log a status change for a task or subtask.",
                string_schema(
                    &["task_name", "status", "details"],
                    &[
                        ("task_name", "Name or identifier of the task"),
                        ("status", "started, in_progress, completed, failed, ..."),
                        ("details", "Additional details"),
                    ],
                ),
            ),
            ToolDef::new(
                "get_task_status",
                "Get the status of one task, or a summary of all tasks.",
                string_schema(&[], &[("task_name", "Optional task to inspect")]),
            ),
            ToolDef::new(
                "add_reflection",
                "Add a reflection or insight to memory.",
                string_schema(&["content"], &[("content", "The reflection")]),
            ),
            ToolDef::new(
                "get_reflections",
                "Retrieve all stored reflections.",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    async fn call(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        match name {
            "store_fact" => {
                let fact = str_arg(input, "fact")?;
                self.store.store_fact(fact)?;
                Ok(format!("Fact stored in memory: '{fact}'"))
            }
            "retrieve_facts" => Ok(self
                .store
                .retrieve_facts(opt_str_arg(input, "query"))
                .to_string()),
            "store_entity_information" => {
                let entity = str_arg(input, "entity_name")?;
                let info = str_arg(input, "information")?;
                self.store.store_entity_info(entity, info)?;
                Ok(format!("Information about '{entity}' stored in memory."))
            }
            "retrieve_entity" => {
                let entity = str_arg(input, "entity_name")?;
                Ok(self.store.retrieve_entity(entity).to_string())
            }
            "log_task" => {
                let task = str_arg(input, "task_name")?;
                let status = str_arg(input, "status")?;
                let details = str_arg(input, "details")?;
                self.store.log_task(task, status, details)?;
                Ok(format!("Task '{task}' logged with status: {status}"))
            }
            "get_task_status" => Ok(self
                .store
                .task_status(opt_str_arg(input, "task_name"))
                .to_string()),
            "add_reflection" => {
                self.store.add_reflection(str_arg(input, "content")?)?;
                Ok("Reflection added to memory.".to_string())
            }
            "get_reflections" => Ok(self.store.reflections().to_string()),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}
