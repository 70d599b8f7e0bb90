//! Provider-initiated sampling and root-listing payloads.
//!
//! `sampling/createMessage` carries two kinds of request on one method: a
//! plain text completion, or a request to read a root whose descriptor is
//! smuggled in `metadata`. [`SamplingRequest::classify`] tells them apart by
//! trying to read `metadata` as a [`Root`] and falling back to text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::protocol::{ContentBlock, Role};

/// One message in a sampling conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingMessage {
    pub role: Role,
    pub content: ContentBlock,
}

impl SamplingMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: ContentBlock::Text { text: text.into() },
        }
    }
}

/// Params of `sampling/createMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageParams {
    pub messages: Vec<SamplingMessage>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl CreateMessageParams {
    pub fn new(messages: Vec<SamplingMessage>, max_tokens: u32) -> Self {
        Self {
            messages,
            max_tokens,
            system_prompt: None,
            temperature: None,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Result of `sampling/createMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResult {
    pub role: Role,
    pub content: ContentBlock,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl CreateMessageResult {
    /// Text of the reply, if it is a text block.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A root exposed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Root {
    /// Read a root descriptor out of an untyped value.
    ///
    /// Needs a `file://` `uri` string; `name` is optional but must be a
    /// string when present. Extra keys are ignored.
    pub fn parse(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let uri = obj.get("uri")?.as_str()?;
        let rest = uri.strip_prefix("file://")?;
        if rest.is_empty() {
            return None;
        }
        let name = match obj.get("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => return None,
        };
        Some(Self {
            uri: uri.to_string(),
            name,
        })
    }
}

/// Result of `roots/list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListRootsResult {
    pub roots: Vec<Root>,
}

/// A classified `sampling/createMessage` request.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingRequest {
    /// `metadata` parsed as a root descriptor.
    Root {
        root: Root,
        params: CreateMessageParams,
    },
    /// Anything else.
    Text(CreateMessageParams),
}

impl SamplingRequest {
    /// Root if `metadata` reads as one, text otherwise. Never fails.
    ///
    /// A text request whose metadata happens to look like a root is
    /// classified as a root.
    pub fn classify(params: CreateMessageParams) -> Self {
        match params.metadata.as_ref().and_then(Root::parse) {
            Some(root) => Self::Root { root, params },
            None => Self::Text(params),
        }
    }

    pub fn params(&self) -> &CreateMessageParams {
        match self {
            Self::Root { params, .. } => params,
            Self::Text(params) => params,
        }
    }

    /// Concatenated text of the request messages.
    pub fn prompt_text(&self) -> String {
        self.params()
            .messages
            .iter()
            .filter_map(|m| match &m.content {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params_with(metadata: Option<Value>) -> CreateMessageParams {
        let mut params = CreateMessageParams::new(vec![SamplingMessage::user_text("hi")], 100);
        params.metadata = metadata;
        params
    }

    #[test]
    fn test_root_metadata_is_classified_as_root() {
        let request = SamplingRequest::classify(params_with(Some(json!({
            "uri": "file:///home/user/project",
            "name": "project"
        }))));
        match request {
            SamplingRequest::Root { root, .. } => {
                assert_eq!(root.uri, "file:///home/user/project");
                assert_eq!(root.name.as_deref(), Some("project"));
            }
            other => panic!("expected root, got {:?}", other),
        }
    }

    #[test]
    fn test_root_name_is_optional() {
        let request =
            SamplingRequest::classify(params_with(Some(json!({ "uri": "file:///tmp" }))));
        assert!(matches!(request, SamplingRequest::Root { root, .. } if root.name.is_none()));
    }

    #[test]
    fn test_non_root_metadata_falls_back_to_text() {
        let cases = [
            None,
            Some(json!(null)),
            Some(json!("file:///tmp")),
            Some(json!({ "name": "no uri" })),
            Some(json!({ "uri": "https://example.com" })),
            Some(json!({ "uri": "file://" })),
            Some(json!({ "uri": 42 })),
            Some(json!({ "uri": "file:///tmp", "name": 7 })),
            Some(json!({ "trace": "abc" })),
        ];
        for metadata in cases {
            let request = SamplingRequest::classify(params_with(metadata.clone()));
            assert!(
                matches!(request, SamplingRequest::Text(_)),
                "metadata {:?}",
                metadata
            );
        }
    }

    #[test]
    fn test_wire_shape() {
        let params = CreateMessageParams::new(vec![SamplingMessage::user_text("hello")], 100)
            .with_metadata(json!({"uri": "file:///a"}));
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["maxTokens"], 100);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"]["type"], "text");

        let result: CreateMessageResult = serde_json::from_value(json!({
            "role": "assistant",
            "content": { "type": "text", "text": "done" },
            "model": "m",
            "stopReason": "endTurn"
        }))
        .unwrap();
        assert_eq!(result.text(), Some("done"));
        assert_eq!(result.stop_reason.as_deref(), Some("endTurn"));
    }

    #[test]
    fn test_prompt_text() {
        let request = SamplingRequest::classify(CreateMessageParams::new(
            vec![
                SamplingMessage::user_text("one"),
                SamplingMessage::user_text("two"),
            ],
            10,
        ));
        assert_eq!(request.prompt_text(), "one\ntwo");
    }
}
