//! Crew orchestration: runs tasks through roles, gates them on approval and
//! threads outputs downstream.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::approval::{ApprovalError, ApprovalHandler, ApprovalPolicy, ApprovalRequest, AutoApprove};
use crate::cancel::CancellationToken;
use crate::delegation;
use crate::llm::ServiceError;
use crate::memory::MemoryStore;
use crate::role::Role;
use crate::task::{ContextError, GraphError, TaskGraph, TaskId, TaskSpec, TaskState};

const DEFAULT_FEEDBACK: &str = "Please revise and improve the output.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Process {
    #[default]
    Sequential,
    Hierarchical,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Process::Sequential => write!(f, "sequential"),
            Process::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutput {
    pub task_id: TaskId,
    pub role: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrewOutput {
    /// Output of the last task run.
    pub result: String,
    /// Every completed task, in execution order.
    pub tasks: Vec<TaskOutput>,
}

enum RunOrder {
    Declared,
    Explicit(Vec<TaskId>),
    ByDependencies,
}

pub struct CrewBuilder {
    roles: Vec<Arc<Role>>,
    tasks: Vec<TaskSpec>,
    dependencies: Vec<(TaskId, TaskId)>,
    ordering: RunOrder,
    manager: Option<(Arc<Role>, String)>,
    manager_approval: bool,
    approval: Arc<dyn ApprovalHandler>,
    policy: ApprovalPolicy,
    memory: Option<Arc<MemoryStore>>,
}

impl CrewBuilder {
    pub fn role(mut self, role: Arc<Role>) -> Self {
        self.roles.push(role);
        self
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    /// Extra edge wired after every task is declared.
    pub fn dependency(mut self, task: &str, upstream: &str) -> Self {
        self.dependencies.push((task.to_string(), upstream.to_string()));
        self
    }

    /// Run sequential tasks in this order instead of declaration order.
    pub fn order(mut self, ids: &[&str]) -> Self {
        self.ordering = RunOrder::Explicit(ids.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Derive the sequential order from the dependency graph.
    pub fn order_by_dependencies(mut self) -> Self {
        self.ordering = RunOrder::ByDependencies;
        self
    }

    /// Run only a coordination task for `manager` working towards `goal`.
    pub fn hierarchical(mut self, manager: Arc<Role>, goal: &str) -> Self {
        self.manager = Some((manager, goal.to_string()));
        self
    }

    /// Gate the manager's final output on the approval handler. Also
    /// implied when any declared task requires approval.
    pub fn manager_approval(mut self, required: bool) -> Self {
        self.manager_approval = required;
        self
    }

    pub fn approval(mut self, handler: Arc<dyn ApprovalHandler>, policy: ApprovalPolicy) -> Self {
        self.approval = handler;
        self.policy = policy;
        self
    }

    /// Record every task transition in `store`.
    pub fn memory(mut self, store: Arc<MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    pub fn build(self) -> Result<Crew, CrewError> {
        let mut names = HashSet::new();
        for role in &self.roles {
            if !names.insert(role.name().to_lowercase()) {
                return Err(CrewError::InvalidCrew(format!(
                    "duplicate role name '{}'",
                    role.name()
                )));
            }
        }

        let mut graph = TaskGraph::new();
        for spec in self.tasks {
            if !names.contains(&spec.role.name().to_lowercase()) {
                return Err(GraphError::UnknownRole(spec.role.name().to_string()).into());
            }
            graph.add(spec)?;
        }
        for (task, upstream) in &self.dependencies {
            graph.add_dependency(task, upstream)?;
        }

        let (process, order) = match self.manager {
            Some((manager, goal)) => {
                if !manager.allow_delegation() {
                    return Err(CrewError::InvalidCrew(format!(
                        "manager '{}' does not allow delegation",
                        manager.name()
                    )));
                }
                let workers: Vec<Arc<Role>> = self
                    .roles
                    .iter()
                    .filter(|r| r.name() != manager.name())
                    .cloned()
                    .collect();
                let needs_approval = self.manager_approval
                    || graph
                        .ids()
                        .iter()
                        .any(|id| graph.get(id).is_some_and(|t| t.human_approval()));
                let goal = with_planned_work(&goal, &graph);
                let spec = delegation::manager_task(manager, &workers, &goal)
                    .with_approval(needs_approval);
                let id = graph.add(spec)?;
                (Process::Hierarchical, vec![id])
            }
            None => {
                if graph.is_empty() {
                    return Err(CrewError::NoTasks);
                }
                let order = match self.ordering {
                    RunOrder::Declared => graph.ids().to_vec(),
                    RunOrder::Explicit(ids) => ids,
                    RunOrder::ByDependencies => graph.topological_order(),
                };
                graph.validate_order(&order)?;
                (Process::Sequential, order)
            }
        };

        Ok(Crew {
            roles: self.roles,
            graph,
            order,
            process,
            approval: self.approval,
            policy: self.policy,
            memory: self.memory,
        })
    }
}

/// Declared tasks become part of the manager's brief; they are not scheduled.
fn with_planned_work(goal: &str, graph: &TaskGraph) -> String {
    if graph.is_empty() {
        return goal.to_string();
    }
    let mut out = format!("{goal}\n\nPlanned work:");
    for id in graph.ids() {
        if let Some(t) = graph.get(id) {
            out.push_str(&format!("\n- [{}] {}", t.role().name(), t.description()));
        }
    }
    out
}

pub struct Crew {
    roles: Vec<Arc<Role>>,
    graph: TaskGraph,
    order: Vec<TaskId>,
    process: Process,
    approval: Arc<dyn ApprovalHandler>,
    policy: ApprovalPolicy,
    memory: Option<Arc<MemoryStore>>,
}

impl Crew {
    pub fn builder() -> CrewBuilder {
        CrewBuilder {
            roles: Vec::new(),
            tasks: Vec::new(),
            dependencies: Vec::new(),
            ordering: RunOrder::Declared,
            manager: None,
            manager_approval: false,
            approval: Arc::new(AutoApprove),
            policy: ApprovalPolicy::default(),
            memory: None,
        }
    }

    pub fn process(&self) -> Process {
        self.process
    }

    pub fn roles(&self) -> &[Arc<Role>] {
        &self.roles
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Tasks that a run executes, in order.
    pub fn execution_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Run every scheduled task. Stops at the first failure.
    pub async fn kickoff(&mut self, cancel: &CancellationToken) -> Result<CrewOutput, CrewError> {
        tracing::info!(process = %self.process, tasks = self.order.len(), "Crew kickoff");
        let mut outputs = Vec::with_capacity(self.order.len());

        for id in self.order.clone() {
            let output = self.execute_task(&id, cancel).await?;
            let role = self
                .graph
                .get(&id)
                .map(|t| t.role().name().to_string())
                .unwrap_or_default();
            outputs.push(TaskOutput {
                task_id: id,
                role,
                output,
            });
        }

        let result = outputs
            .last()
            .map(|o| o.output.clone())
            .ok_or(CrewError::NoTasks)?;
        tracing::info!(tasks = outputs.len(), "Crew finished");
        Ok(CrewOutput {
            result,
            tasks: outputs,
        })
    }

    async fn execute_task(&mut self, id: &str, cancel: &CancellationToken) -> Result<String, CrewError> {
        loop {
            if cancel.is_cancelled() {
                tracing::warn!(task = id, "Run cancelled");
                return Err(CrewError::Cancelled {
                    next_task: id.to_string(),
                });
            }

            let prompt = self.graph.context_for(id).map_err(CrewError::from)?;
            let (role, expected, needs_approval, revision) = {
                let task = self.task(id)?;
                (
                    Arc::clone(task.role()),
                    task.expected_output().to_string(),
                    task.human_approval(),
                    task.revisions(),
                )
            };
            self.transition(id, TaskState::Running, &format!("Assigned to {}", role.name()));

            let output = match role.perform(&prompt, &expected).await {
                Ok(output) => output,
                Err(source) => {
                    self.transition(id, TaskState::Failed, &source.to_string());
                    return Err(CrewError::TaskFailed {
                        task: id.to_string(),
                        state: TaskState::Failed,
                        source,
                    });
                }
            };

            if !needs_approval {
                self.finish(id, &output);
                return Ok(output);
            }

            self.transition(id, TaskState::AwaitingApproval, "Waiting for reviewer");
            let request = ApprovalRequest {
                task_id: id.to_string(),
                role: role.name().to_string(),
                description: self.task(id)?.description().to_string(),
                output: output.clone(),
                revision,
            };
            let decision = self
                .policy
                .request(self.approval.as_ref(), &request)
                .await;
            let decision = match decision {
                Ok(decision) => decision,
                Err(source) => {
                    self.transition(id, TaskState::Failed, &source.to_string());
                    return Err(CrewError::Approval {
                        task: id.to_string(),
                        state: TaskState::Failed,
                        source,
                    });
                }
            };

            if decision.approved {
                self.finish(id, &output);
                return Ok(output);
            }

            let feedback = decision
                .feedback
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FEEDBACK.to_string());
            let revisions = self.task_mut(id)?.request_revision(&feedback);
            self.record(id, TaskState::Revising, &feedback);

            if self.policy.exhausted(revisions) {
                self.transition(id, TaskState::Failed, "Revision limit reached");
                return Err(CrewError::RevisionLimit {
                    task: id.to_string(),
                    state: TaskState::Failed,
                    revisions: revisions - 1,
                });
            }
        }
    }

    fn task(&self, id: &str) -> Result<&crate::task::Task, CrewError> {
        self.graph
            .get(id)
            .ok_or_else(|| GraphError::UnknownTask(id.to_string()).into())
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut crate::task::Task, CrewError> {
        self.graph
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownTask(id.to_string()).into())
    }

    fn finish(&mut self, id: &str, output: &str) {
        if let Some(task) = self.graph.get_mut(id) {
            task.complete(output.to_string());
        }
        self.record(id, TaskState::Completed, "Output accepted");
    }

    fn transition(&mut self, id: &str, state: TaskState, details: &str) {
        if let Some(task) = self.graph.get_mut(id) {
            task.set_state(state);
        }
        self.record(id, state, details);
    }

    fn record(&self, id: &str, state: TaskState, details: &str) {
        tracing::info!(task = id, state = %state, details, "Task transition");
        if let Some(store) = &self.memory
            && let Err(e) = store.log_task(id, &state.to_string(), details)
        {
            tracing::warn!(task = id, error = %e, "Failed to record task transition");
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CrewError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("task '{task}' needs output of '{upstream}', which is {state}")]
    DependencyNotReady {
        task: TaskId,
        upstream: TaskId,
        state: TaskState,
    },
    #[error("task '{task}' {state}: {source}")]
    TaskFailed {
        task: TaskId,
        state: TaskState,
        source: ServiceError,
    },
    #[error("approval for task '{task}' failed ({state}): {source}")]
    Approval {
        task: TaskId,
        state: TaskState,
        source: ApprovalError,
    },
    #[error("task '{task}' {state}: rejected after {revisions} revisions")]
    RevisionLimit {
        task: TaskId,
        state: TaskState,
        revisions: u32,
    },
    #[error("run cancelled before task '{next_task}'")]
    Cancelled { next_task: TaskId },
    #[error("invalid crew: {0}")]
    InvalidCrew(String),
    #[error("crew has no tasks to run")]
    NoTasks,
}

impl From<ContextError> for CrewError {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::UnknownTask(id) => CrewError::Graph(GraphError::UnknownTask(id)),
            ContextError::NotReady {
                task,
                upstream,
                state,
            } => CrewError::DependencyNotReady {
                task,
                upstream,
                state,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionService, GenerationOptions};
    use async_trait::async_trait;

    struct Fixed;

    #[async_trait]
    impl CompletionService for Fixed {
        async fn complete(&self, _: &str, _: &GenerationOptions) -> Result<String, ServiceError> {
            Ok("done".into())
        }
    }

    fn role(name: &str) -> Arc<Role> {
        Arc::new(Role::builder(name, Arc::new(Fixed)).build().unwrap())
    }

    #[test]
    fn duplicate_role_names_are_invalid() {
        let err = Crew::builder()
            .role(role("Analyst"))
            .role(role("analyst"))
            .task(TaskSpec::new(role("Analyst"), "x", ""))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CrewError::InvalidCrew(_)), "got {err}");
    }

    #[test]
    fn task_role_must_belong_to_crew() {
        let err = Crew::builder()
            .role(role("Analyst"))
            .task(TaskSpec::new(role("Stranger"), "x", ""))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CrewError::Graph(GraphError::UnknownRole(_))));
    }

    #[test]
    fn empty_sequential_crew_is_rejected() {
        let err = Crew::builder().role(role("Analyst")).build().err().unwrap();
        assert!(matches!(err, CrewError::NoTasks));
    }

    #[test]
    fn manager_without_delegation_is_rejected() {
        let err = Crew::builder()
            .role(role("Analyst"))
            .hierarchical(role("Manager"), "goal")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CrewError::InvalidCrew(_)));
    }

    #[tokio::test]
    async fn single_task_run_completes() {
        let analyst = role("Analyst");
        let mut crew = Crew::builder()
            .role(analyst.clone())
            .task(TaskSpec::new(analyst, "x", "").with_id("only"))
            .build()
            .unwrap();
        let out = crew.kickoff(&CancellationToken::new()).await.unwrap();
        assert_eq!(out.result, "done");
        assert_eq!(crew.graph().get("only").unwrap().state(), TaskState::Completed);
        assert_eq!(crew.process(), Process::Sequential);
    }
}
