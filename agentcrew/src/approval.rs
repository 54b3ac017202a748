//! Human-in-the-loop review of task output.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the reviewer is shown.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub task_id: String,
    pub role: String,
    pub description: String,
    pub output: String,
    /// Revisions already requested for this task.
    pub revision: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub feedback: Option<String>,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            feedback: None,
        }
    }

    pub fn reject(feedback: &str) -> Self {
        Self {
            approved: false,
            feedback: Some(feedback.to_string()),
        }
    }
}

#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn review(&self, request: &ApprovalRequest) -> Result<ApprovalDecision, ApprovalError>;
}

/// Approves everything.
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn review(&self, _request: &ApprovalRequest) -> Result<ApprovalDecision, ApprovalError> {
        Ok(ApprovalDecision::approve())
    }
}

/// Decision applied when the reviewer does not answer in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutDecision {
    #[default]
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPolicy {
    pub timeout: Option<Duration>,
    pub on_timeout: TimeoutDecision,
    /// `None` means reviewers may ask for revisions forever.
    pub max_revisions: Option<u32>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            on_timeout: TimeoutDecision::Approve,
            max_revisions: Some(3),
        }
    }
}

impl ApprovalPolicy {
    /// Ask `handler`, bounded by the policy timeout.
    pub async fn request(
        &self,
        handler: &dyn ApprovalHandler,
        request: &ApprovalRequest,
    ) -> Result<ApprovalDecision, ApprovalError> {
        let Some(limit) = self.timeout else {
            return handler.review(request).await;
        };
        match tokio::time::timeout(limit, handler.review(request)).await {
            Ok(decision) => decision,
            Err(_) => {
                tracing::warn!(
                    task = %request.task_id,
                    timeout_secs = limit.as_secs_f64(),
                    decision = ?self.on_timeout,
                    "Approval timed out, applying default"
                );
                Ok(match self.on_timeout {
                    TimeoutDecision::Approve => ApprovalDecision::approve(),
                    TimeoutDecision::Reject => {
                        ApprovalDecision::reject("No review received before the deadline.")
                    }
                })
            }
        }
    }

    /// True if another revision would exceed the bound.
    pub fn exhausted(&self, revisions: u32) -> bool {
        self.max_revisions.is_some_and(|max| revisions > max)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApprovalError {
    #[error("reviewer channel closed")]
    Closed,
    #[error("approval failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    #[async_trait]
    impl ApprovalHandler for Never {
        async fn review(&self, _: &ApprovalRequest) -> Result<ApprovalDecision, ApprovalError> {
            std::future::pending().await
        }
    }

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            task_id: "t".into(),
            role: "Analyst".into(),
            description: "d".into(),
            output: "o".into(),
            revision: 0,
        }
    }

    #[tokio::test]
    async fn timeout_applies_default_decision() {
        let policy = ApprovalPolicy {
            timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let d = policy.request(&Never, &request()).await.unwrap();
        assert!(d.approved);

        let policy = ApprovalPolicy {
            on_timeout: TimeoutDecision::Reject,
            ..policy
        };
        let d = policy.request(&Never, &request()).await.unwrap();
        assert!(!d.approved);
        assert!(d.feedback.is_some());
    }

    #[tokio::test]
    async fn auto_approve_approves() {
        let d = ApprovalPolicy::default()
            .request(&AutoApprove, &request())
            .await
            .unwrap();
        assert_eq!(d, ApprovalDecision::approve());
    }

    #[test]
    fn revision_bound() {
        let p = ApprovalPolicy::default();
        assert!(!p.exhausted(3));
        assert!(p.exhausted(4));
        let unbounded = ApprovalPolicy {
            max_revisions: None,
            ..Default::default()
        };
        assert!(!unbounded.exhausted(u32::MAX));
    }
}
