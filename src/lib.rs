//! Qianfan - client SDK for the Qianfan large language model platform
//!
//! Chat completions can be requested whole or streamed. A streamed answer is
//! exposed as a [`StreamIterator`], a pull-based cursor over the server-sent
//! event stream that decodes one chunk per frame and stops at the `[DONE]`
//! marker or the first failure.
//!
//! ## Key Features
//!
//! - **Streaming**: Lazy, single-pass iteration with sticky terminal states
//! - **Authentication**: Access-key request signing or legacy access tokens
//! - **Builders**: Fluent request construction with opaque extra parameters
//! - **Configuration**: TOML file with environment variable overrides

pub mod api;
pub mod auth;
pub mod builder;
pub mod config;

pub use api::{
    ApplicationError, ChatRequest, ChatResponse, Decoded, ErrorKind, FrameSource, HttpRequest,
    HttpTransport, Message, QianfanClient, QianfanError, Role, StreamIterator, StreamResponse,
    StreamState, TokenUsage, Tool, Transport, TransportError,
};
pub use auth::Credential;
pub use builder::{ChatCompletionBuilder, ExtraParameterBuilder};
pub use config::{Config, ConfigBuilder, ConfigError};
