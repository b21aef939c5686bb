// Prompt assembly
//
// System text: goal, output description, JSON-only instruction, extra hints.
// User text: the caller's input serialized as JSON.

use serde_json::Value;

use crate::versions::ExecutionSettings;

pub const JSON_ONLY_INSTRUCTION: &str = "\
Respond with JSON only. Do not include explanations, markdown, or code fences. \
The response must be a single JSON value that matches the output format above.";

pub const STRICT_JSON_INSTRUCTION: &str = "\
IMPORTANT: Your previous response could not be parsed as JSON. \
Return ONLY the raw JSON value, starting with '{' or '[' and ending with '}' or ']'. \
Any other text will cause the request to fail.";

/// Model-ready prompt text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Repeat the JSON-only instruction more forcefully for the single retry.
    pub fn strengthen(&self) -> Prompt {
        let mut system = self.system.clone();
        system.push_str("\n\n");
        system.push_str(STRICT_JSON_INSTRUCTION);
        Prompt {
            system,
            user: self.user.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, settings: &ExecutionSettings, input: &Value) -> Prompt {
        let mut system = String::new();
        system.push_str("Goal:\n");
        system.push_str(settings.goal.trim());

        system.push_str("\n\nOutput format:\n");
        match settings.output_description.as_deref().map(str::trim) {
            Some(description) if !description.is_empty() => system.push_str(description),
            _ => system.push_str(&schema_description(&settings.output_schema)),
        }

        system.push_str("\n\n");
        system.push_str(JSON_ONLY_INSTRUCTION);

        if let Some(extra) = settings.additional_instructions.as_deref().map(str::trim) {
            if !extra.is_empty() {
                system.push_str("\n\nAdditional instructions:\n");
                system.push_str(extra);
            }
        }

        let user = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
        Prompt { system, user }
    }
}

fn schema_description(schema: &Value) -> String {
    match schema {
        Value::Object(obj) if obj.is_empty() => "Any JSON value.".to_string(),
        other => format!(
            "A JSON value matching this JSON Schema:\n{}",
            serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sections_in_order() {
        let mut settings = ExecutionSettings::new("Summarize the article");
        settings.output_schema = json!({"type": "object", "required": ["summary"]});
        settings.additional_instructions = Some("Keep it under 50 words.".into());

        let prompt = PromptAssembler::new().assemble(&settings, &json!({"text": "hello"}));

        let goal = prompt.system.find("Summarize the article").unwrap();
        let schema = prompt.system.find("\"required\"").unwrap();
        let json_only = prompt.system.find(JSON_ONLY_INSTRUCTION).unwrap();
        let extra = prompt.system.find("Keep it under 50 words.").unwrap();
        assert!(goal < schema && schema < json_only && json_only < extra);

        let user: Value = serde_json::from_str(&prompt.user).unwrap();
        assert_eq!(user, json!({"text": "hello"}));
    }

    #[test]
    fn test_description_overrides_schema_dump() {
        let mut settings = ExecutionSettings::new("g");
        settings.output_schema = json!({"type": "object"});
        settings.output_description = Some("An object with a `summary` string.".into());

        let prompt = PromptAssembler::new().assemble(&settings, &json!({}));
        assert!(prompt.system.contains("`summary` string"));
        assert!(!prompt.system.contains("JSON Schema"));
        assert!(!prompt.system.contains("Additional instructions"));
    }

    #[test]
    fn test_strengthen_keeps_user_and_adds_strict_instruction() {
        let prompt = PromptAssembler::new().assemble(&ExecutionSettings::new("g"), &json!({"a": 1}));
        let strict = prompt.strengthen();
        assert_eq!(strict.user, prompt.user);
        assert!(strict.system.starts_with(&prompt.system));
        assert!(strict.system.ends_with(STRICT_JSON_INSTRUCTION));
    }
}
