//! MCP Prompt Templates
//!
//! Prompts render into an ordered list of role-tagged messages. Templates use
//! `{{name}}` placeholders and `{{#if name}}...{{/if}}` blocks; rendering is a
//! pure function of the arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::mcp::protocol::{ContentBlock, Role};
use crate::mcp::registry::EntryKind;

/// A prompt argument definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl PromptArgument {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            required: false,
        }
    }
}

/// A prompt descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// A prompt message (the actual content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: ContentBlock,
}

/// Result of prompts/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPromptsResult {
    pub prompts: Vec<Prompt>,
}

/// Params of prompts/get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    pub name: String,
    #[serde(default)]
    pub arguments: HashMap<String, Value>,
}

/// Result of prompts/get.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

/// Message templates for one prompt, rendered in order.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    messages: Vec<(Role, String)>,
}

impl PromptTemplate {
    /// A single user message.
    pub fn user(template: impl Into<String>) -> Self {
        Self {
            messages: vec![(Role::User, template.into())],
        }
    }

    /// Append another message.
    pub fn then(mut self, role: Role, template: impl Into<String>) -> Self {
        self.messages.push((role, template.into()));
        self
    }

    fn render(&self, values: &HashMap<String, String>) -> Vec<PromptMessage> {
        self.messages
            .iter()
            .map(|(role, template)| PromptMessage {
                role: *role,
                content: ContentBlock::Text {
                    text: render_text(template, values),
                },
            })
            .collect()
    }
}

fn lookup<'a>(values: &'a HashMap<String, String>, key: &str) -> &'a str {
    values.get(key.trim()).map(String::as_str).unwrap_or("")
}

/// Expand conditionals, then placeholders. Unknown placeholders render empty.
fn render_text(template: &str, values: &HashMap<String, String>) -> String {
    const IF_OPEN: &str = "{{#if ";
    const IF_CLOSE: &str = "{{/if}}";

    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(IF_OPEN) {
        expanded.push_str(&rest[..start]);
        let after_open = &rest[start + IF_OPEN.len()..];
        let bounds = match (after_open.find("}}"), after_open.find(IF_CLOSE)) {
            (Some(name_end), Some(close)) if close >= name_end + 2 => Some((name_end, close)),
            _ => None,
        };
        let Some((name_end, close)) = bounds else {
            // Unterminated block: keep the text as-is.
            expanded.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let key = &after_open[..name_end];
        let body = &after_open[name_end + 2..close];
        if !lookup(values, key).is_empty() {
            expanded.push_str(body);
        }
        rest = &after_open[close + IF_CLOSE.len()..];
    }
    expanded.push_str(rest);

    let mut out = String::with_capacity(expanded.len());
    let mut rest = expanded.as_str();
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("}}") {
            Some(end) => {
                let key = &rest[start + 2..start + 2 + end];
                if key.starts_with('#') || key.starts_with('/') {
                    // Leftover block tag from an unterminated conditional.
                    out.push_str(&rest[start..start + 2 + end + 2]);
                } else {
                    out.push_str(lookup(values, key));
                }
                rest = &rest[start + 2 + end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Prompt table, in registration order.
#[derive(Debug, Clone, Default)]
pub struct PromptTable {
    prompts: Vec<(Prompt, PromptTemplate)>,
    index: HashMap<String, usize>,
}

impl PromptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt.
    pub fn register(&mut self, prompt: Prompt, template: PromptTemplate) -> Result<()> {
        if self.index.contains_key(&prompt.name) {
            return Err(Error::DuplicateEntry {
                kind: EntryKind::Prompt,
                name: prompt.name,
            });
        }
        self.index.insert(prompt.name.clone(), self.prompts.len());
        self.prompts.push((prompt, template));
        Ok(())
    }

    /// List all prompts.
    pub fn list(&self) -> Vec<Prompt> {
        self.prompts.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&Prompt> {
        self.index.get(name).map(|&i| &self.prompts[i].0)
    }

    /// Render a prompt.
    ///
    /// A missing (or null/empty) required argument is `InvalidArguments`.
    pub fn get(&self, name: &str, arguments: &HashMap<String, Value>) -> Result<GetPromptResult> {
        let (prompt, template) = self
            .index
            .get(name)
            .map(|&i| &self.prompts[i])
            .ok_or_else(|| Error::not_found(EntryKind::Prompt, name))?;

        let values: HashMap<String, String> = arguments
            .iter()
            .map(|(k, v)| (k.clone(), stringify(v)))
            .collect();

        let missing: Vec<&str> = prompt
            .arguments
            .iter()
            .filter(|arg| arg.required)
            .filter(|arg| values.get(&arg.name).map_or(true, |v| v.is_empty()))
            .map(|arg| arg.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidArguments(format!(
                "prompt {} is missing required argument(s): {}",
                name,
                missing.join(", ")
            )));
        }

        Ok(GetPromptResult {
            description: prompt.description.clone(),
            messages: template.render(&values),
        })
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn review_table() -> PromptTable {
        let mut table = PromptTable::new();
        table
            .register(
                Prompt {
                    name: "review".to_string(),
                    description: Some("Review a file".to_string()),
                    arguments: vec![
                        PromptArgument::required("file", "File to review"),
                        PromptArgument::optional("focus", "Area to focus on"),
                    ],
                },
                PromptTemplate::user("Review {{file}}.{{#if focus}} Focus: {{focus}}.{{/if}}")
                    .then(Role::Assistant, "Reading {{ file }} now."),
            )
            .unwrap();
        table
    }

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_with_and_without_optional() {
        let table = review_table();

        let with = table
            .get("review", &args(&[("file", json!("a.rs")), ("focus", json!("errors"))]))
            .unwrap();
        assert_eq!(with.messages.len(), 2);
        assert_eq!(with.messages[0].role, Role::User);
        assert_eq!(
            with.messages[0].content,
            ContentBlock::Text {
                text: "Review a.rs. Focus: errors.".to_string()
            }
        );
        assert_eq!(with.messages[1].role, Role::Assistant);
        assert_eq!(
            with.messages[1].content,
            ContentBlock::Text {
                text: "Reading a.rs now.".to_string()
            }
        );

        let without = table.get("review", &args(&[("file", json!("a.rs"))])).unwrap();
        assert_eq!(
            without.messages[0].content,
            ContentBlock::Text {
                text: "Review a.rs.".to_string()
            }
        );
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let table = review_table();
        let a = args(&[("file", json!("x")), ("focus", json!("y"))]);
        assert_eq!(table.get("review", &a).unwrap(), table.get("review", &a).unwrap());
    }

    #[test]
    fn test_missing_required_argument() {
        let table = review_table();
        let err = table
            .get("review", &args(&[("focus", json!("x"))]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        assert!(err.to_string().contains("file"));

        let err = table.get("review", &args(&[("file", json!(""))])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
    }

    #[test]
    fn test_non_string_arguments_are_stringified() {
        let mut table = PromptTable::new();
        table
            .register(
                Prompt {
                    name: "count".to_string(),
                    description: None,
                    arguments: vec![PromptArgument::required("n", "how many")],
                },
                PromptTemplate::user("{{n}} chunk(s)"),
            )
            .unwrap();

        let result = table.get("count", &args(&[("n", json!(3))])).unwrap();
        assert_eq!(
            result.messages[0].content,
            ContentBlock::Text {
                text: "3 chunk(s)".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_prompt_and_duplicates() {
        let mut table = review_table();
        assert_eq!(
            table.get("nope", &HashMap::new()).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let err = table
            .register(
                Prompt {
                    name: "review".to_string(),
                    description: None,
                    arguments: vec![],
                },
                PromptTemplate::user("again"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_render_text_edge_cases() {
        let values = HashMap::new();
        assert_eq!(render_text("no placeholders", &values), "no placeholders");
        assert_eq!(render_text("{{missing}}!", &values), "!");
        assert_eq!(render_text("open {{ only", &values), "open {{ only");
        assert_eq!(render_text("{{#if x}}never closed", &values), "{{#if x}}never closed");
        assert_eq!(
            render_text("{{#if x}}kept {{missing}}", &values),
            "{{#if x}}kept "
        );
        assert_eq!(render_text("stray {{/if}}", &values), "stray {{/if}}");
    }

    #[test]
    fn test_prompt_serialization() {
        let table = review_table();
        let json = serde_json::to_value(ListPromptsResult {
            prompts: table.list(),
        })
        .unwrap();
        assert_eq!(json["prompts"][0]["name"], "review");
        assert_eq!(json["prompts"][0]["arguments"][0]["required"], true);
    }
}
