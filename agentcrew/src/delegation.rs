//! Manager-led delegation.
//!
//! In a hierarchical crew only the manager's coordination task is scheduled.
//! The manager reaches its specialists through the coworker tools below;
//! whatever sub-tasks it plans stay inside its own reasoning.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::role::Role;
use crate::task::TaskSpec;
use crate::tools::{Capability, ToolDef, ToolError, Toolkit, opt_str_arg, str_arg, string_schema};

pub const MANAGER_TASK_ID: &str = "manager-delegation";

const MANAGER_EXPECTED_OUTPUT: &str = "A complete, high-quality solution that fully addresses the original request, \
including all necessary research, analysis, and implementation components.\n\n\
The solution should include:\n\
1. A summary of the project and approach\n\
2. Research findings with citations\n\
3. Analysis and insights derived from the research\n\
4. Implementation details (code, documentation, etc.)\n\
5. Final recommendations or conclusions";

/// The single coordination task given to `manager`.
pub fn manager_task(manager: Arc<Role>, workers: &[Arc<Role>], goal: &str) -> TaskSpec {
    let mut roster = String::new();
    for w in workers {
        roster.push_str(&format!("- {}: {}\n", w.name(), w.goal()));
    }

    let description = format!(
        "Coordinate the completion of this project: {goal}\n\n\
         Your responsibilities:\n\
         1. Analyze the requirements and break them down into subtasks\n\
         2. Assign each subtask to the appropriate specialist\n\
         3. Review the work of each specialist and provide feedback\n\
         4. Integrate the results into a cohesive final deliverable\n\
         5. Ensure all requirements are met\n\n\
         You can communicate with these specialists:\n{roster}\n\
         Start by creating a clear project plan with subtasks for each specialist."
    );

    TaskSpec::new(manager, &description, MANAGER_EXPECTED_OUTPUT).with_id(MANAGER_TASK_ID)
}

/// `delegate_work` / `ask_question` over a fixed set of coworkers.
pub struct DelegationToolkit {
    coworkers: Vec<Arc<Role>>,
}

impl DelegationToolkit {
    pub fn new(coworkers: Vec<Arc<Role>>) -> Self {
        Self { coworkers }
    }

    fn coworker(&self, name: &str) -> Result<&Arc<Role>, ToolError> {
        let wanted = name.trim();
        self.coworkers
            .iter()
            .find(|r| r.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = self.coworkers.iter().map(|r| r.name()).collect();
                ToolError::Validation(format!(
                    "no coworker named '{wanted}'; available: {}",
                    known.join(", ")
                ))
            })
    }

    fn roster(&self) -> String {
        self.coworkers
            .iter()
            .map(|r| r.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl Toolkit for DelegationToolkit {
    fn capability(&self) -> Capability {
        Capability::Delegation
    }

    fn defs(&self) -> Vec<ToolDef> {
        let roster = self.roster();
        vec![
            ToolDef::new(
                "delegate_work",
                &format!("Delegate a specific task to one of these coworkers: {roster}."),
                string_schema(
                    &["coworker", "task"],
                    &[
                        ("coworker", "Name of the coworker"),
                        ("task", "The task to hand over"),
                        ("context", "Everything the coworker needs to know"),
                    ],
                ),
            ),
            ToolDef::new(
                "ask_question",
                &format!("Ask a question to one of these coworkers: {roster}."),
                string_schema(
                    &["coworker", "question"],
                    &[
                        ("coworker", "Name of the coworker"),
                        ("question", "The question"),
                        ("context", "Background for the question"),
                    ],
                ),
            ),
        ]
    }

    async fn call(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        let (kind, body_key) = match name {
            "delegate_work" => ("task", "task"),
            "ask_question" => ("question", "question"),
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        let coworker = self.coworker(str_arg(input, "coworker")?)?;
        let body = str_arg(input, body_key)?;

        let mut prompt = match kind {
            "task" => format!("Your coworker has delegated this task to you:\n{body}\n"),
            _ => format!("Your coworker asks:\n{body}\n"),
        };
        if let Some(ctx) = opt_str_arg(input, "context") {
            prompt.push_str(&format!("\nContext:\n{ctx}\n"));
        }

        tracing::info!(coworker = %coworker.name(), tool = name, "Delegating");
        Ok(coworker.answer(&prompt).await?)
    }
}
