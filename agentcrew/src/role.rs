//! Roles: a named persona bound to a completion service and a tool table.
//!
//! A role is immutable once built and shared by `Arc` between the crew and
//! any manager that delegates to it.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::llm::{CompletionService, GenerationOptions, ServiceError};
use crate::tools::{Capability, CapabilityTable, ToolError, Toolkit};

/// Tool-loop steps per task before the role is forced to answer.
pub const DEFAULT_MAX_ITERATIONS: usize = 8;

const FINAL_ANSWER: &str = "Final Answer:";
const ACTION: &str = "Action:";
const ACTION_INPUT: &str = "Action Input:";
const OBSERVATION: &str = "Observation:";

pub struct Role {
    name: String,
    goal: String,
    backstory: String,
    options: GenerationOptions,
    allow_delegation: bool,
    tools: CapabilityTable,
    llm: Arc<dyn CompletionService>,
    max_iterations: usize,
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Role")
            .field("name", &self.name)
            .field("goal", &self.goal)
            .field("allow_delegation", &self.allow_delegation)
            .field("capabilities", &self.tools.capabilities())
            .finish_non_exhaustive()
    }
}

impl Role {
    pub fn builder(name: &str, llm: Arc<dyn CompletionService>) -> RoleBuilder {
        RoleBuilder {
            name: name.to_string(),
            goal: String::new(),
            backstory: String::new(),
            options: GenerationOptions::default(),
            allow_delegation: false,
            toolkits: Vec::new(),
            llm,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn backstory(&self) -> &str {
        &self.backstory
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn allow_delegation(&self) -> bool {
        self.allow_delegation
    }

    pub fn capabilities(&self) -> &[Capability] {
        self.tools.capabilities()
    }

    pub fn tools(&self) -> &CapabilityTable {
        &self.tools
    }

    /// One completion with the role's profile, no tools.
    pub async fn answer(&self, prompt: &str) -> Result<String, ServiceError> {
        let reply = self.llm.complete(prompt, &self.options).await?;
        Ok(final_text(&reply))
    }

    /// Work a prompt to a final answer, calling tools along the way.
    pub async fn perform(&self, prompt: &str, expected_output: &str) -> Result<String, ServiceError> {
        let mut transcript = self.task_prompt(prompt, expected_output);

        for iteration in 0..self.max_iterations {
            let reply = self.llm.complete(&transcript, &self.options).await?;
            let (kept, step) = parse_step(&reply);
            match step {
                Step::Final(answer) => return Ok(answer),
                Step::Action { tool, input } => {
                    tracing::debug!(role = %self.name, tool = %tool, iteration, "Tool call");
                    let observation = self.tools.invoke_text(&tool, &input).await;
                    transcript.push_str(kept);
                    transcript.push_str(&format!("\n{OBSERVATION} {observation}\n"));
                }
            }
        }

        tracing::warn!(role = %self.name, max = self.max_iterations, "Iteration budget exhausted, asking for final answer");
        transcript.push_str(&format!(
            "\nYou have used all available steps. Respond now with '{FINAL_ANSWER}' followed by your complete answer.\n"
        ));
        let reply = self.llm.complete(&transcript, &self.options).await?;
        Ok(final_text(&reply))
    }

    fn task_prompt(&self, prompt: &str, expected_output: &str) -> String {
        let mut out = format!("{prompt}\n");
        if !expected_output.trim().is_empty() {
            out.push_str(&format!(
                "\nThis is the expected criteria for your final answer: {expected_output}\n"
            ));
        }
        if self.tools.is_empty() {
            out.push_str(&format!("\nRespond with '{FINAL_ANSWER}' followed by your complete answer.\n"));
            return out;
        }

        out.push_str("\nYou have access to the following tools:\n");
        for def in self.tools.defs() {
            out.push_str(&format!(
                "- {}: {} Arguments: {}\n",
                def.name, def.description, def.input_schema["properties"]
            ));
        }
        out.push_str(&format!(
            "\nTo use a tool, reply with:\n\
             Thought: what you need to do next\n\
             {ACTION} the tool name\n\
             {ACTION_INPUT} a JSON object with the tool arguments\n\n\
             You will then receive an {OBSERVATION} line with the tool result.\n\
             When you are done, reply with:\n\
             {FINAL_ANSWER} your complete answer\n"
        ));
        out
    }
}

pub struct RoleBuilder {
    name: String,
    goal: String,
    backstory: String,
    options: GenerationOptions,
    allow_delegation: bool,
    toolkits: Vec<Arc<dyn Toolkit>>,
    llm: Arc<dyn CompletionService>,
    max_iterations: usize,
}

impl RoleBuilder {
    pub fn goal(mut self, goal: &str) -> Self {
        self.goal = goal.to_string();
        self
    }

    pub fn backstory(mut self, backstory: &str) -> Self {
        self.backstory = backstory.to_string();
        self
    }

    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = temperature;
        self
    }

    pub fn allow_delegation(mut self, allow: bool) -> Self {
        self.allow_delegation = allow;
        self
    }

    pub fn toolkit(mut self, toolkit: Arc<dyn Toolkit>) -> Self {
        self.toolkits.push(toolkit);
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn build(mut self) -> Result<Role, RoleError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(RoleError::EmptyName);
        }
        if !self.allow_delegation
            && self
                .toolkits
                .iter()
                .any(|t| t.capability() == Capability::Delegation)
        {
            return Err(RoleError::DelegationNotPermitted(name));
        }
        let tools = CapabilityTable::resolve(&self.toolkits)?;

        // Persona first, then any caller-supplied profile.
        let mut system = format!("You are {name}.");
        if !self.backstory.is_empty() {
            system.push_str(&format!(" {}", self.backstory));
        }
        if !self.goal.is_empty() {
            system.push_str(&format!("\nYour personal goal is: {}", self.goal));
        }
        if let Some(profile) = self.options.system.take().filter(|p| !p.trim().is_empty()) {
            system.push_str("\n\n");
            system.push_str(&profile);
        }
        self.options.system = Some(system);

        Ok(Role {
            name,
            goal: self.goal,
            backstory: self.backstory,
            options: self.options,
            allow_delegation: self.allow_delegation,
            tools,
            llm: self.llm,
            max_iterations: self.max_iterations.max(1),
        })
    }
}

#[derive(Debug, PartialEq)]
enum Step {
    Final(String),
    Action { tool: String, input: Value },
}

/// Parse one model reply. Also returns the part of the reply worth keeping
/// in the transcript (anything after a self-written observation is dropped).
fn parse_step(reply: &str) -> (&str, Step) {
    if let Some(idx) = reply.find(FINAL_ANSWER) {
        let answer = reply[idx + FINAL_ANSWER.len()..].trim().to_string();
        return (reply, Step::Final(answer));
    }

    let kept = match reply.find(OBSERVATION) {
        Some(idx) => &reply[..idx],
        None => reply,
    };
    let Some(tool) = kept
        .lines()
        .find_map(|l| l.trim().strip_prefix(ACTION))
        .map(|t| t.trim().trim_matches('`').to_string())
        .filter(|t| !t.is_empty())
    else {
        return (reply, Step::Final(reply.trim().to_string()));
    };

    let input = match kept.find(ACTION_INPUT) {
        Some(idx) => {
            let raw = kept[idx + ACTION_INPUT.len()..].trim();
            let raw = raw.trim_start_matches("```json").trim_matches('`').trim();
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        }
        None => Value::Null,
    };
    (kept.trim_end(), Step::Action { tool, input })
}

fn final_text(reply: &str) -> String {
    match reply.find(FINAL_ANSWER) {
        Some(idx) => reply[idx + FINAL_ANSWER.len()..].trim().to_string(),
        None => reply.trim().to_string(),
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    #[error("role name must not be empty")]
    EmptyName,
    #[error("role '{0}' was given delegation tools without allow_delegation")]
    DelegationNotPermitted(String),
    #[error(transparent)]
    Tools(#[from] ToolError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::tools::ToolDef;

    /// Replies in order; records every prompt it sees.
    struct Script {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
        systems: Mutex<Vec<Option<String>>>,
    }

    impl Script {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
                systems: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionService for Script {
        async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String, ServiceError> {
            self.prompts.lock().push(prompt.to_string());
            self.systems.lock().push(options.system.clone());
            self.replies.lock().pop().ok_or(ServiceError::Empty)
        }
    }

    struct Upper;

    #[async_trait]
    impl Toolkit for Upper {
        fn capability(&self) -> Capability {
            Capability::Document
        }

        fn defs(&self) -> Vec<ToolDef> {
            vec![ToolDef::new(
                "upper",
                "Uppercase text.",
                crate::tools::string_schema(&["text"], &[("text", "Text")]),
            )]
        }

        async fn call(&self, _: &str, input: &Value) -> Result<String, ToolError> {
            Ok(input["text"].as_str().unwrap_or_default().to_uppercase())
        }
    }

    #[test]
    fn parses_final_answer() {
        let (_, step) = parse_step("Thought: done\nFinal Answer: 42 apples");
        assert_eq!(step, Step::Final("42 apples".into()));
    }

    #[test]
    fn parses_action_with_json_input_and_drops_fake_observation() {
        let reply = "Thought: x\nAction: upper\nAction Input: {\"text\": \"hi\"}\nObservation: made up";
        let (kept, step) = parse_step(reply);
        assert_eq!(
            step,
            Step::Action {
                tool: "upper".into(),
                input: json!({"text": "hi"})
            }
        );
        assert!(!kept.contains("made up"));
    }

    #[test]
    fn plain_reply_is_the_answer() {
        let (_, step) = parse_step("  just text  ");
        assert_eq!(step, Step::Final("just text".into()));
    }

    #[tokio::test]
    async fn tool_result_is_fed_back_as_observation() {
        let llm = Script::new(&[
            "Action: upper\nAction Input: shout",
            "Final Answer: SHOUT it is",
        ]);
        let role = Role::builder("Writer", llm.clone())
            .toolkit(Arc::new(Upper))
            .build()
            .unwrap();
        let out = role.perform("Say it loud", "one line").await.unwrap();
        assert_eq!(out, "SHOUT it is");

        let prompts = llm.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("- upper: Uppercase text."));
        assert!(prompts[1].contains("Observation: SHOUT"), "got {}", prompts[1]);
    }

    #[tokio::test]
    async fn exhausted_budget_forces_final_answer() {
        let llm = Script::new(&[
            "Action: upper\nAction Input: a",
            "Action: upper\nAction Input: b",
            "Final Answer: forced",
        ]);
        let role = Role::builder("Writer", llm.clone())
            .toolkit(Arc::new(Upper))
            .max_iterations(2)
            .build()
            .unwrap();
        assert_eq!(role.perform("p", "").await.unwrap(), "forced");
        assert!(llm.prompts.lock()[2].contains("used all available steps"));
    }

    #[tokio::test]
    async fn service_error_propagates() {
        let llm = Script::new(&[]);
        let role = Role::builder("Writer", llm).build().unwrap();
        assert!(matches!(role.perform("p", "").await, Err(ServiceError::Empty)));
    }

    #[test]
    fn system_profile_is_derived_from_persona() {
        let role = Role::builder("Research Specialist", Script::new(&[]))
            .goal("Find facts")
            .backstory("You dig deep.")
            .build()
            .unwrap();
        let system = role.options().system.as_deref().unwrap();
        assert!(system.starts_with("You are Research Specialist. You dig deep."));
        assert!(system.ends_with("Your personal goal is: Find facts"));
    }

    #[tokio::test]
    async fn persona_and_profile_both_reach_the_model() {
        let llm = Script::new(&["Final Answer: ok"]);
        let role = Role::builder("Research Specialist", llm.clone())
            .goal("Find accurate sources")
            .backstory("You have read every paper.")
            .options(GenerationOptions::default().with_system("Cite everything."))
            .build()
            .unwrap();
        role.perform("Survey RAG", "a report").await.unwrap();

        let systems = llm.systems.lock();
        let system = systems[0].as_deref().unwrap();
        assert!(system.starts_with("You are Research Specialist. You have read every paper."));
        assert!(system.contains("Your personal goal is: Find accurate sources"), "got {system}");
        assert!(system.ends_with("Cite everything."), "got {system}");
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = Role::builder("  ", Script::new(&[])).build().unwrap_err();
        assert!(matches!(err, RoleError::EmptyName));
    }
}
