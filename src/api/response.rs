//! Chat completion response structures

use super::request::{Message, Role, ToolCall};
use serde::{Deserialize, Serialize};

/// Response to a non-streaming chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// Content of the first choice, or an empty string
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("")
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.choices
            .first()
            .and_then(|c| c.message.tool_calls.as_deref())
            .unwrap_or(&[])
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

/// One incremental unit of a streamed chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    /// Present on the final chunk when `stream_options.include_usage` was set
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl StreamResponse {
    /// Text delta of the first choice, or an empty string
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .unwrap_or("")
    }

    pub fn reasoning_content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.delta.reasoning_content.as_deref())
            .unwrap_or("")
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    /// Tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens in the response
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens used
    #[serde(default)]
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_response_content() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "as-1",
            "object": "chat.completion",
            "created": 1718000000,
            "model": "ernie-4.0-8k",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        }))
        .unwrap();

        assert_eq!(response.content(), "Hello");
        assert_eq!(response.finish_reason(), Some("stop"));
        assert_eq!(response.usage, Some(TokenUsage::new(3, 1)));
        assert!(response.tool_calls().is_empty());
    }

    #[test]
    fn test_tool_call_reply_with_null_content() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "as-4",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call-1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"Beijing\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

        assert_eq!(response.content(), "");
        assert_eq!(response.finish_reason(), Some("tool_calls"));
        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call-1");
        assert_eq!(calls[0].function.name, "get_weather");
    }

    #[test]
    fn test_stream_chunk_delta() {
        let chunk: StreamResponse = serde_json::from_value(json!({
            "id": "as-2",
            "object": "chat.completion.chunk",
            "created": 1718000000,
            "model": "ernie-4.0-8k",
            "choices": [{"index": 0, "delta": {"content": "Hi"}}]
        }))
        .unwrap();

        assert_eq!(chunk.content(), "Hi");
        assert_eq!(chunk.reasoning_content(), "");
        assert!(chunk.finish_reason().is_none());
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn test_usage_only_chunk() {
        let chunk: StreamResponse = serde_json::from_value(json!({
            "id": "as-3",
            "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        }))
        .unwrap();

        assert_eq!(chunk.content(), "");
        assert_eq!(chunk.usage.map(|u| u.total_tokens), Some(12));
    }
}
