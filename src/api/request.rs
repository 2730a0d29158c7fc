//! Chat completion request structures

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Empty when the model answered with tool calls only
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Result of a tool invocation, answering the call with `tool_call_id`
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    /// JSON-encoded arguments; streamed calls deliver this in pieces
    #[serde(default)]
    pub arguments: String,
}

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments
    pub parameters: Value,
}

impl Tool {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: function_type(),
            function: FunctionDefinition {
                name: name.into(),
                description: Some(description.into()),
                parameters,
            },
        }
    }
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Ask the server to attach token usage to the final chunk
    pub include_usage: bool,
}

/// Chat completion request
///
/// Dispatch serializes this value and never mutates it; the `stream` flag on
/// the wire is decided by which client method sends it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub model: String,

    /// Route override for custom deployments; never sent in the body
    #[serde(skip)]
    pub endpoint: Option<String>,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default)]
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalty_score: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Opaque parameters merged into the top level of the body
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Self::default()
        }
    }

    /// JSON body for the wire with the stream flag forced to `stream`
    pub fn to_body(&self, stream: bool) -> Result<Value, serde_json::Error> {
        let mut body = serde_json::to_value(self)?;
        set_stream_flag(&mut body, stream);
        Ok(body)
    }
}

/// Force the `stream` field of an object body; `stream_options` only
/// makes sense on streamed calls
pub(crate) fn set_stream_flag(body: &mut Value, stream: bool) {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("stream".to_string(), Value::Bool(stream));
        if !stream {
            obj.remove("stream_options");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_forces_stream_flag() {
        let mut request = ChatRequest::new("ernie-4.0-8k", vec![Message::user("hi")]);
        request.stream_options = Some(StreamOptions { include_usage: true });

        let streaming = request.to_body(true).unwrap();
        assert_eq!(streaming["stream"], json!(true));
        assert_eq!(streaming["stream_options"]["include_usage"], json!(true));

        let blocking = request.to_body(false).unwrap();
        assert_eq!(blocking["stream"], json!(false));
        assert!(blocking.get("stream_options").is_none());
        assert!(!request.stream);
    }

    #[test]
    fn test_extra_parameters_flattened() {
        let mut request = ChatRequest::new("ernie-speed-8k", vec![Message::user("hi")]);
        request.extra.insert("web_search".into(), json!({"enable": true}));
        request.endpoint = Some("/v2/custom".into());

        let body = request.to_body(false).unwrap();
        assert_eq!(body["web_search"]["enable"], json!(true));
        assert!(body.get("endpoint").is_none());
        assert!(body.get("temperature").is_none());
        assert!(body.get("extra").is_none());
    }

    #[test]
    fn test_tool_message_serialization() {
        let msg = Message::tool("call_1", "{\"temp\": 21}");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], json!("tool"));
        assert_eq!(value["tool_call_id"], json!("call_1"));
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn test_tool_call_defaults_type() {
        let call: ToolCall =
            serde_json::from_value(json!({"id": "c1", "function": {"name": "f", "arguments": "{}"}}))
                .unwrap();
        assert_eq!(call.call_type, "function");
    }
}
