//! Fluent construction of chat completion requests
//!
//! The builder never holds a client. [`ChatCompletionBuilder::build`] returns a
//! plain [`ChatRequest`]; [`execute`](ChatCompletionBuilder::execute) and
//! [`execute_stream`](ChatCompletionBuilder::execute_stream) take the client
//! to send it with.

mod extra;

pub use extra::ExtraParameterBuilder;

use crate::api::{
    ChatRequest, ChatResponse, Message, QianfanClient, QianfanError, Role, StreamIterator,
    StreamOptions, StreamResponse, Tool,
};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default)]
pub struct ChatCompletionBuilder {
    model: Option<String>,
    endpoint: Option<String>,
    user_id: Option<String>,
    messages: Vec<Message>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    penalty_score: Option<f32>,
    max_completion_tokens: Option<u32>,
    seed: Option<u64>,
    stop: Option<Vec<String>>,
    tools: Option<Vec<Tool>>,
    tool_choice: Option<Value>,
    include_usage: bool,
    extra: ExtraParameterBuilder,
}

impl ChatCompletionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Route of a custom deployment, used instead of the model route
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn add_message(mut self, role: Role, content: impl Into<String>) -> Self {
        self.messages.push(Message::new(role, content));
        self
    }

    pub fn add_user_message(self, content: impl Into<String>) -> Self {
        self.add_message(Role::User, content)
    }

    pub fn add_assistant_message(self, content: impl Into<String>) -> Self {
        self.add_message(Role::Assistant, content)
    }

    pub fn system(self, content: impl Into<String>) -> Self {
        self.add_message(Role::System, content)
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Replace the conversation
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn penalty_score(mut self, penalty_score: f32) -> Self {
        self.penalty_score = Some(penalty_score);
        self
    }

    pub fn max_completion_tokens(mut self, tokens: u32) -> Self {
        self.max_completion_tokens = Some(tokens);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn tool_choice(mut self, choice: Value) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Ask for token usage on the last streamed chunk
    pub fn include_usage(mut self, include: bool) -> Self {
        self.include_usage = include;
        self
    }

    pub fn add_extra_parameter(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.extra = self.extra.add(key, value);
        self
    }

    /// Replace all extra parameters
    pub fn extra_parameters(mut self, extra: ExtraParameterBuilder) -> Self {
        self.extra = extra;
        self
    }

    /// Merge a mapping into the extra parameters
    pub fn extra_parameters_map(mut self, params: Map<String, Value>) -> Self {
        self.extra = self.extra.extend(params);
        self
    }

    /// Assemble the request without sending it
    pub fn build(self) -> Result<ChatRequest, QianfanError> {
        self.validate()?;
        let extra = self.extra.build()?;
        Ok(ChatRequest {
            model: self.model.unwrap_or_default(),
            endpoint: self.endpoint,
            messages: self.messages,
            user_id: self.user_id,
            stream: false,
            stream_options: self
                .include_usage
                .then_some(StreamOptions { include_usage: true }),
            temperature: self.temperature,
            top_p: self.top_p,
            penalty_score: self.penalty_score,
            max_completion_tokens: self.max_completion_tokens,
            seed: self.seed,
            stop: self.stop,
            tools: self.tools,
            tool_choice: self.tool_choice,
            extra,
        })
    }

    pub async fn execute(self, client: &QianfanClient) -> Result<ChatResponse, QianfanError> {
        let request = self.build()?;
        client.chat(&request).await
    }

    pub async fn execute_stream(
        self,
        client: &QianfanClient,
    ) -> Result<StreamIterator<StreamResponse>, QianfanError> {
        let mut request = self.build()?;
        request.stream = true;
        client.chat_stream(&request).await
    }

    fn validate(&self) -> Result<(), QianfanError> {
        if self.messages.is_empty() {
            return Err(QianfanError::validation("at least one message is required"));
        }
        if self.model.as_deref() == Some("") {
            return Err(QianfanError::validation("model must not be empty"));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(QianfanError::validation(format!(
                    "temperature {} outside [0, 2]",
                    t
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(QianfanError::validation(format!("top_p {} outside [0, 1]", p)));
            }
        }
        if let Some(score) = self.penalty_score {
            if !(1.0..=2.0).contains(&score) {
                return Err(QianfanError::validation(format!(
                    "penalty_score {} outside [1, 2]",
                    score
                )));
            }
        }
        if self.max_completion_tokens == Some(0) {
            return Err(QianfanError::validation("max_completion_tokens must be positive"));
        }
        Ok(())
    }
}
