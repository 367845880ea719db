use crate::domain::types::{Command, DetectedError};

/// A builder for rendering prompts with context.
pub struct PromptRenderer<'a> {
    template: &'a str,
    replacements: Vec<(&'a str, String)>,
}

impl<'a> PromptRenderer<'a> {
    pub fn new(template: &'a str) -> Self {
        Self {
            template,
            replacements: Vec::new(),
        }
    }

    pub fn set(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.replacements.push((key, value.into()));
        self
    }

    pub fn render(self) -> String {
        let mut result = self.template.to_string();
        for (key, value) in self.replacements {
            result = result.replace(key, &value);
        }

        // Values may legitimately contain braces, so only report template-style keys.
        if let Some(start) = result.find("{{")
            && let Some(end) = result[start..].find("}}")
        {
            let placeholder = &result[start..start + end + 2];
            if placeholder[2..placeholder.len() - 2]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_')
            {
                tracing::error!("Unreplaced placeholder in prompt: {}", placeholder);
            }
        }

        result
    }
}

pub const RESPONSE_FORMAT_TEMPLATE: &str = include_str!("../../prompts/response_format.md");
pub const QUERY_TEMPLATE: &str = include_str!("../../prompts/query.md");
pub const FIX_TEMPLATE: &str = include_str!("../../prompts/fix.md");
pub const RESOLUTION_TEMPLATE: &str = include_str!("../../prompts/resolution.md");
pub const ASK_TEMPLATE: &str = include_str!("../../prompts/ask.md");
pub const IMAGE_TEMPLATE: &str = include_str!("../../prompts/image.md");
pub const RELEVANT_FILES_TEMPLATE: &str = include_str!("../../prompts/relevant_files.md");
pub const DESCRIBE_FILE_TEMPLATE: &str = include_str!("../../prompts/describe_file.md");

fn response_format(cwd: &str) -> String {
    PromptRenderer::new(RESPONSE_FORMAT_TEMPLATE)
        .set("{{CWD}}", cwd)
        .render()
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() { "(none)" } else { text }
}

pub fn query_prompt(request: &str, project_context: &str, files: &str, cwd: &str) -> String {
    PromptRenderer::new(QUERY_TEMPLATE)
        .set("{{PROJECT_CONTEXT}}", or_none(project_context))
        .set("{{FILES}}", or_none(files))
        .set("{{REQUEST}}", request)
        .set("{{FORMAT}}", response_format(cwd))
        .render()
}

pub fn fix_prompt(
    request: &str,
    failed: &Command,
    error: &str,
    remaining: &[Command],
    project_context: &str,
    files: &str,
    cwd: &str,
) -> String {
    let remaining = remaining
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c.describe()))
        .collect::<Vec<_>>()
        .join("\n");

    PromptRenderer::new(FIX_TEMPLATE)
        .set("{{REQUEST}}", request)
        .set("{{STEP}}", failed.describe())
        .set("{{ERROR}}", error)
        .set("{{REMAINING}}", or_none(&remaining))
        .set("{{PROJECT_CONTEXT}}", or_none(project_context))
        .set("{{FILES}}", or_none(files))
        .set("{{FORMAT}}", response_format(cwd))
        .render()
}

pub fn resolution_prompt(
    error: &DetectedError,
    project_context: &str,
    files: &str,
    cwd: &str,
) -> String {
    PromptRenderer::new(RESOLUTION_TEMPLATE)
        .set("{{KIND}}", error.kind.to_string())
        .set("{{MESSAGE}}", error.message.as_str())
        .set("{{OUTPUT}}", error.context.join("\n"))
        .set("{{PROJECT_CONTEXT}}", or_none(project_context))
        .set("{{FILES}}", or_none(files))
        .set("{{FORMAT}}", response_format(cwd))
        .render()
}

pub fn ask_prompt(question: &str, project_context: &str, files: &str) -> String {
    PromptRenderer::new(ASK_TEMPLATE)
        .set("{{PROJECT_CONTEXT}}", or_none(project_context))
        .set("{{FILES}}", or_none(files))
        .set("{{QUESTION}}", question)
        .render()
}

pub fn image_prompt(instructions: &str, project_context: &str, cwd: &str) -> String {
    PromptRenderer::new(IMAGE_TEMPLATE)
        .set("{{INSTRUCTIONS}}", or_none(instructions))
        .set("{{PROJECT_CONTEXT}}", or_none(project_context))
        .set("{{FORMAT}}", response_format(cwd))
        .render()
}

pub fn relevant_files_prompt(request: &str, project_context: &str, limit: usize) -> String {
    PromptRenderer::new(RELEVANT_FILES_TEMPLATE)
        .set("{{PROJECT_CONTEXT}}", or_none(project_context))
        .set("{{REQUEST}}", request)
        .set("{{LIMIT}}", limit.to_string())
        .render()
}

pub fn describe_file_prompt(path: &str, content: &str) -> String {
    PromptRenderer::new(DESCRIBE_FILE_TEMPLATE)
        .set("{{PATH}}", path)
        .set("{{CONTENT}}", content)
        .render()
}
