//! agentcrew: role-based multi-agent task orchestration.
//!
//! Provides:
//! - Roles backed by a local completion service, each with its own tool set
//! - A task graph whose outputs flow into downstream prompts
//! - Sequential and manager-led (hierarchical) crew runs
//! - Human approval gates with bounded revision loops
//! - A persistent JSON memory store and a time-bounded search cache

pub mod approval;
pub mod cache;
pub mod cancel;
pub mod crew;
pub mod delegation;
pub mod llm;
pub mod memory;
pub mod persist;
pub mod role;
pub mod task;
pub mod tools;

pub use approval::{
    ApprovalDecision, ApprovalError, ApprovalHandler, ApprovalPolicy, ApprovalRequest, AutoApprove,
    TimeoutDecision,
};
pub use cache::ResultCache;
pub use cancel::CancellationToken;
pub use crew::{Crew, CrewBuilder, CrewError, CrewOutput, Process, TaskOutput};
pub use delegation::DelegationToolkit;
pub use llm::{CompletionService, GenerationOptions, OllamaClient, ServiceError};
pub use memory::{MemoryStore, SnapshotPolicy};
pub use persist::StorageError;
pub use role::{Role, RoleError};
pub use task::{GraphError, Task, TaskGraph, TaskId, TaskSpec, TaskState};
pub use tools::{Capability, CodeToolkit, DocumentToolkit, MemoryToolkit, SearchToolkit, Toolkit};
