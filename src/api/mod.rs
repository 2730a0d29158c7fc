//! Qianfan API: models, transport seam, dispatch and streaming

mod client;
mod error;
mod http;
mod request;
mod response;
pub mod sse;
pub mod streaming;

pub use client::{QianfanClient, CHAT_ROUTE};
pub use error::{
    ApplicationError, ErrorKind, QianfanError, TransportError, TransportErrorKind,
    RETRYABLE_ERROR_CODES, TOKEN_INVALID_ERROR_CODES,
};
pub use http::HttpTransport;
pub use request::{
    ChatRequest, FunctionCall, FunctionDefinition, Message, Role, StreamOptions, Tool, ToolCall,
};
pub use response::{ChatResponse, Choice, Delta, StreamChoice, StreamResponse, TokenUsage};
pub use sse::decode_frame;
pub use streaming::{Decoded, FrameSource, StreamIterator, StreamState};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;

/// A fully-formed HTTP call, before or after credentials are applied
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Header names are kept lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// The HTTP layer the client dispatches through
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and decode the whole body as JSON.
    async fn send(&self, request: HttpRequest) -> Result<Value, QianfanError>;

    /// Send a request and hand back the open event stream.
    /// Fails before returning if the server rejects the call.
    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<Box<dyn FrameSource>, QianfanError>;
}
