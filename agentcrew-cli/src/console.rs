//! Terminal reviewer for tasks that require human approval.
//!
//! The request is printed on stderr. An empty line approves; any other
//! text is sent back to the role as revision feedback.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;

use agentcrew::{ApprovalDecision, ApprovalError, ApprovalHandler, ApprovalRequest};

/// Longest output excerpt shown before the prompt.
const PREVIEW_CHARS: usize = 2000;

pub struct ConsoleApproval;

#[async_trait]
impl ApprovalHandler for ConsoleApproval {
    async fn review(&self, request: &ApprovalRequest) -> Result<ApprovalDecision, ApprovalError> {
        let prompt = render_request(request);
        let line = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
            let mut stderr = io::stderr();
            write!(stderr, "{prompt}")?;
            stderr.flush()?;
            let mut line = String::new();
            let read = io::stdin().lock().read_line(&mut line)?;
            Ok((read > 0).then_some(line))
        })
        .await
        .map_err(|e| ApprovalError::Failed(e.to_string()))?
        .map_err(|e| ApprovalError::Failed(e.to_string()))?;

        let Some(line) = line else {
            tracing::warn!(task = %request.task_id, "stdin closed during review");
            return Err(ApprovalError::Closed);
        };
        Ok(decision_from_line(&line))
    }
}

pub fn decision_from_line(line: &str) -> ApprovalDecision {
    let feedback = line.trim();
    if feedback.is_empty() {
        ApprovalDecision::approve()
    } else {
        ApprovalDecision::reject(feedback)
    }
}

pub fn render_request(request: &ApprovalRequest) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!(
        "  \x1b[1;36mReview\x1b[0m task '{}' by {}",
        request.task_id, request.role
    ));
    if request.revision > 0 {
        out.push_str(&format!(" (revision {})", request.revision));
    }
    out.push_str("\n\n");
    out.push_str(&format!("  \x1b[90m{}\x1b[0m\n\n", first_line(&request.description)));

    let preview: String = request.output.chars().take(PREVIEW_CHARS).collect();
    out.push_str(&preview);
    if request.output.chars().count() > PREVIEW_CHARS {
        out.push_str("\n[...]");
    }
    out.push_str("\n\n");
    out.push_str("  \x1b[1mPress Enter to approve, or type feedback for a revision:\x1b[0m ");
    out
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
