//! Code generation tools backed by the completion service.
//!
//! Generated and refined code is kept in memory as numbered snippets
//! (`snippet_1`, `snippet_2`, ...) so later calls can refer to it by id.
//! Nothing is ever executed; `execute_code` asks the model to predict output.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::{Capability, ToolDef, ToolError, Toolkit, str_arg, string_schema};
use crate::llm::{CompletionService, GenerationOptions};

const SNIPPET_PREFIX: &str = "snippet_";
const BLOCK_SEPARATOR: &str = "\n\n# ----------\n\n";
const PREVIEW_CHARS: usize = 50;

#[derive(Default)]
struct Snippets {
    items: Vec<(String, String)>,
    counter: usize,
}

impl Snippets {
    fn push(&mut self, code: String) -> String {
        self.counter += 1;
        let id = format!("{SNIPPET_PREFIX}{}", self.counter);
        self.items.push((id.clone(), code));
        id
    }

    fn get(&self, id: &str) -> Option<String> {
        self.items
            .iter()
            .find(|(sid, _)| sid == id)
            .map(|(_, code)| code.clone())
    }
}

pub struct CodeToolkit {
    llm: Arc<dyn CompletionService>,
    options: GenerationOptions,
    snippets: Mutex<Snippets>,
}

impl CodeToolkit {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self {
            llm,
            options: GenerationOptions::default().with_temperature(0.2),
            snippets: Mutex::new(Snippets::default()),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Stored snippet ids, oldest first.
    pub fn snippet_ids(&self) -> Vec<String> {
        self.snippets.lock().items.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn snippet(&self, id: &str) -> Option<String> {
        self.snippets.lock().get(id)
    }

    async fn generate(&self, specification: &str) -> Result<String, ToolError> {
        let prompt = format!(
            "Generate code based on the following specification. Include:\n\
             1. Well-structured code\n\
             2. Comments explaining the logic\n\
             3. Error handling where appropriate\n\
             4. An example of how to use the code\n\n\
             SPECIFICATION:\n{specification}\n\n\
             Return only the formatted code with comments and usage examples."
        );
        let response = self.llm.complete(&prompt, &self.options).await?;
        let code = extract_code(&response);
        let id = self.snippets.lock().push(code.clone());
        tracing::debug!(snippet = %id, "Stored generated code");
        Ok(format!(
            "Code generated successfully (ID: {id})\n\n{code}\n\n\
             To analyze this code, use the analyze_code tool with the snippet ID.\n\
             To refine this code, use the refine_code tool with the snippet ID and refinement instructions."
        ))
    }

    async fn analyze(&self, code_input: &str) -> Result<String, ToolError> {
        let code = self
            .lookup(code_input.trim())
            .unwrap_or_else(|| code_input.to_string());
        let prompt = format!(
            "Analyze the following code. Provide:\n\
             1. A brief explanation of what the code does\n\
             2. Potential bugs or issues\n\
             3. Performance considerations\n\
             4. Style improvements\n\
             5. Security concerns (if any)\n\n\
             CODE:\n```\n{code}\n```\n\n\
             Format your response in clear sections."
        );
        let analysis = self.llm.complete(&prompt, &self.options).await?;
        Ok(format!("Code Analysis:\n\n{analysis}"))
    }

    async fn refine(&self, input: &str) -> Result<String, ToolError> {
        let (id, instructions) = split_reference(input).ok_or_else(|| {
            ToolError::Validation(
                "input should be in format 'snippet_id: refinement instructions'".into(),
            )
        })?;
        let original = self
            .snippet(id)
            .ok_or_else(|| ToolError::Validation(format!("snippet ID '{id}' not found")))?;

        let prompt = format!(
            "Refine the following code based on these requirements.\n\n\
             ORIGINAL CODE:\n```\n{original}\n```\n\n\
             REFINEMENT REQUIREMENTS:\n{instructions}\n\n\
             Return the improved code only, keeping the good parts of the original."
        );
        let response = self.llm.complete(&prompt, &self.options).await?;
        let refined = extract_code(&response);
        let new_id = self.snippets.lock().push(refined.clone());
        Ok(format!(
            "Code refined successfully (New ID: {new_id})\n\n{refined}\n\n\
             Original code preserved as {id}."
        ))
    }

    async fn execute(&self, input: &str) -> Result<String, ToolError> {
        let (reference, inputs) = match input.split_once(':') {
            Some((r, rest)) => (r.trim(), rest.trim()),
            None => (input.trim(), ""),
        };
        let code = self.lookup(reference).ok_or_else(|| {
            ToolError::Validation(
                "provide a valid snippet ID or use the generate_code tool first".into(),
            )
        })?;

        let mut prompt = format!("Simulate executing this code:\n```\n{code}\n```\n");
        if !inputs.is_empty() {
            prompt.push_str(&format!("With these inputs: {inputs}\n"));
        }
        prompt.push_str(
            "Show what the output would be if this code were executed, formatted as actual \
             program output. If there would be errors, show those too.",
        );
        let result = self.llm.complete(&prompt, &self.options).await?;
        Ok(format!("Simulated Execution Result:\n\n{result}"))
    }

    fn list(&self) -> String {
        let snippets = self.snippets.lock();
        if snippets.items.is_empty() {
            return "No code snippets have been generated yet.".to_string();
        }
        let mut out = String::from("Available Code Snippets:\n\n");
        for (id, code) in &snippets.items {
            let first = code.lines().next().unwrap_or_default();
            let mut preview: String = first.chars().take(PREVIEW_CHARS).collect();
            if first.chars().count() > PREVIEW_CHARS {
                preview.push_str("...");
            }
            out.push_str(&format!(
                "ID: {id}\nPreview: {preview}\nSize: {} lines\n\n",
                code.lines().count().max(1)
            ));
        }
        out
    }

    fn lookup(&self, reference: &str) -> Option<String> {
        if !reference.starts_with(SNIPPET_PREFIX) {
            return None;
        }
        self.snippet(reference)
    }
}

/// `"id: text"` with both halves non-empty.
fn split_reference(input: &str) -> Option<(&str, &str)> {
    let (id, rest) = input.split_once(':')?;
    let (id, rest) = (id.trim(), rest.trim());
    if id.is_empty() || rest.is_empty() {
        return None;
    }
    Some((id, rest))
}

/// Contents of fenced code blocks, or the whole reply if there are none.
pub fn extract_code(response: &str) -> String {
    let mut blocks = Vec::new();
    let mut rest = response;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("```") else {
            break;
        };
        blocks.push(strip_language_tag(&after[..end]).trim().to_string());
        rest = &after[end + 3..];
    }
    if blocks.is_empty() {
        response.trim().to_string()
    } else {
        blocks.join(BLOCK_SEPARATOR)
    }
}

fn strip_language_tag(block: &str) -> &str {
    match block.split_once('\n') {
        Some((tag, body))
            if tag
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '+' | '-' | '#' | '_')) =>
        {
            body
        }
        _ => block,
    }
}

#[async_trait]
impl Toolkit for CodeToolkit {
    fn capability(&self) -> Capability {
        Capability::Code
    }

    fn defs(&self) -> Vec<ToolDef> {
        vec![
            ToolDef::new(
                "generate_code",
                "Generate code from a detailed specification. Returns a snippet ID.",
                string_schema(&["specification"], &[("specification", "What the code should do")]),
            ),
            ToolDef::new(
                "analyze_code",
                "Review code for bugs, performance, style and security. Accepts a snippet ID or raw code.",
                string_schema(&["code"], &[("code", "Snippet ID or code")]),
            ),
            ToolDef::new(
                "refine_code",
                "Refine a stored snippet. Input format: 'snippet_id: refinement instructions'.",
                string_schema(&["input"], &[("input", "snippet_id: refinement instructions")]),
            ),
            ToolDef::new(
                "execute_code",
                "Simulate running a stored snippet. Input format: 'snippet_id' or 'snippet_id: inputs'.",
                string_schema(&["input"], &[("input", "snippet_id[: inputs]")]),
            ),
            ToolDef::new(
                "list_code_snippets",
                "List stored code snippets with their IDs.",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    async fn call(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        match name {
            "generate_code" => self.generate(str_arg(input, "specification")?).await,
            "analyze_code" => self.analyze(str_arg(input, "code")?).await,
            "refine_code" => self.refine(str_arg(input, "input")?).await,
            "execute_code" => self.execute(str_arg(input, "input")?).await,
            "list_code_snippets" => Ok(self.list()),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}
