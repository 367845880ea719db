//! # Parsing Utils
//!
//! Whole-response helpers on top of the [`StreamInterpreter`]: parse a complete model
//! answer and split it into what gets shown, what gets executed and whether a restart
//! was asked for.

use crate::application::interpreter::StreamInterpreter;
use crate::domain::error::AssistantError;
use crate::domain::types::Command;

/// Parses a complete response. A non-empty response that yields nothing is a parse failure.
pub fn parse_response(text: &str) -> Result<Vec<Command>, AssistantError> {
    let mut interpreter = StreamInterpreter::new();
    let commands = interpreter.feed(text);
    if let Some(rest) = interpreter.flush() {
        tracing::warn!("Unparsed response remainder: {}", rest.trim());
    }

    if commands.is_empty() {
        let preview: String = text.trim().chars().take(200).collect();
        return Err(AssistantError::Parse(if preview.is_empty() {
            "empty response".to_string()
        } else {
            format!("no explanation or steps found in response: {preview}")
        }));
    }
    Ok(commands)
}

/// A parsed response, split by role.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Plan {
    pub explanations: Vec<String>,
    pub steps: Vec<Command>,
    pub restart: bool,
}

impl Plan {
    pub fn from_commands(commands: Vec<Command>) -> Self {
        let mut plan = Plan::default();
        for command in commands {
            match command {
                Command::Explanation { text } => plan.explanations.push(text),
                Command::Restart { required } => plan.restart |= required,
                step => plan.steps.push(step),
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::FileOperation;

    #[test]
    fn test_parse_and_split() {
        let commands = parse_response(
            "<explanation>Install it.</explanation>\
             <step><type>shell</type><command>npm i lodash</command></step>\
             <step><type>metadata</type><operation>UPDATE</operation><filename>a.js</filename></step>\
             <restart_required>true</restart_required>",
        )
        .unwrap();
        let plan = Plan::from_commands(commands);

        assert_eq!(plan.explanations, vec!["Install it."]);
        assert_eq!(
            plan.steps,
            vec![
                Command::Shell {
                    command: "npm i lodash".into()
                },
                Command::Metadata {
                    operation: FileOperation::Update,
                    filename: "a.js".into()
                },
            ]
        );
        assert!(plan.restart);
    }

    #[test]
    fn test_restart_false_does_not_request() {
        let plan = Plan::from_commands(
            parse_response("<restart_required>false</restart_required>").unwrap(),
        );
        assert!(!plan.restart);
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_prose_only_is_parse_error() {
        assert!(matches!(
            parse_response("I think you should install lodash."),
            Err(AssistantError::Parse(_))
        ));
        assert!(matches!(parse_response("   "), Err(AssistantError::Parse(_))));
    }
}
