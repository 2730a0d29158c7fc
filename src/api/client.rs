//! Qianfan client: request dispatch for single and streamed responses

use super::request::set_stream_flag;
use super::sse::decode_frame;
use super::streaming::StreamIterator;
use super::{
    ApplicationError, ChatRequest, ChatResponse, HttpRequest, HttpTransport, QianfanError,
    StreamResponse, Transport,
};
use crate::auth::{Authenticator, Credential};
use crate::config::{Config, EndpointSettings};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default chat completion route on the base URL
pub const CHAT_ROUTE: &str = "/v2/chat/completions";

/// Client for the Qianfan API
///
/// The credential scheme is chosen by constructor: [`with_api_key`](Self::with_api_key)
/// for the legacy key pair exchanged for an access token,
/// [`with_access_key`](Self::with_access_key) for signed access-key requests.
pub struct QianfanClient {
    transport: Arc<dyn Transport>,
    auth: Authenticator,
    base_url: String,
    default_model: Option<String>,
}

impl QianfanClient {
    /// Build from a loaded config
    pub fn new(config: &Config) -> Result<Self, QianfanError> {
        let credential = config
            .credential()
            .map_err(|e| QianfanError::validation(e.to_string()))?;
        let transport = Arc::new(HttpTransport::new(&config.http)?);
        let client = Self::with_transport(credential, &config.endpoint, transport)
            .with_token_refresh_margin(Duration::from_secs(config.http.token_refresh_margin_secs));
        Ok(match config.chat.model.as_str() {
            "" => client,
            model => client.with_default_model(model),
        })
    }

    /// Legacy API key / secret key pair
    pub fn with_api_key(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, QianfanError> {
        Self::with_credential(Credential::ApiKey {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        })
    }

    /// IAM access key / secret key pair
    pub fn with_access_key(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, QianfanError> {
        Self::with_credential(Credential::AccessKey {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        })
    }

    /// Credentials and endpoints from the environment and the default config file
    pub fn from_env() -> Result<Self, QianfanError> {
        let config = Config::load().map_err(|e| QianfanError::validation(e.to_string()))?;
        Self::new(&config)
    }

    fn with_credential(credential: Credential) -> Result<Self, QianfanError> {
        let config = Config::default().with_env_overrides();
        let transport = Arc::new(HttpTransport::new(&config.http)?);
        Ok(Self::with_transport(credential, &config.endpoint, transport))
    }

    /// Assemble from explicit parts; the seam tests and custom transports use
    pub fn with_transport(
        credential: Credential,
        endpoint: &EndpointSettings,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            transport,
            auth: Authenticator::new(credential, endpoint.auth_base_url.clone()),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            default_model: None,
        }
    }

    /// Model used when a request names neither a model nor an endpoint
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_token_refresh_margin(mut self, margin: Duration) -> Self {
        self.auth = self.auth.with_refresh_margin(margin);
        self
    }

    pub fn credential(&self) -> &Credential {
        self.auth.credential()
    }

    /// Forget the cached access token; the next request fetches a new one
    pub fn invalidate_token(&self) {
        self.auth.invalidate();
    }

    /// Send a chat completion and wait for the whole answer
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, QianfanError> {
        let body = self.chat_body(request)?;
        self.request(chat_route(request), &body).await
    }

    /// Send a chat completion and iterate over its incremental chunks
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<StreamIterator<StreamResponse>, QianfanError> {
        let body = self.chat_body(request)?;
        self.request_stream(chat_route(request), &body).await
    }

    /// Dispatch non-streaming and decode the body as `R`.
    ///
    /// `route` is a path on the base URL, a full URL, or a name under `/v2/`.
    pub async fn request<B, R>(&self, route: &str, body: &B) -> Result<R, QianfanError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.prepare(route, body, false).await?;
        let json = self.transport.send(request).await?;

        if let Some(err) = ApplicationError::from_value(&json) {
            if err.is_token_invalid() {
                warn!(code = %err.code, "Access token rejected, dropping cached token");
                self.auth.invalidate();
            }
            return Err(err.into());
        }
        Ok(serde_json::from_value(json)?)
    }

    /// Dispatch with `stream=true` and wrap the event stream in an iterator
    /// decoding each frame as `T`.
    pub async fn request_stream<B, T>(
        &self,
        route: &str,
        body: &B,
    ) -> Result<StreamIterator<T>, QianfanError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let request = self.prepare(route, body, true).await?;
        let source = self.transport.send_streaming(request).await?;
        let stale = self.auth.invalidator();
        Ok(StreamIterator::new(source, move |frame: &str| {
            let decoded = decode_frame::<T>(frame);
            if let Err(QianfanError::Application(err)) = &decoded {
                if err.is_token_invalid() {
                    warn!(code = %err.code, "Access token rejected, dropping cached token");
                    stale.invalidate();
                }
            }
            decoded
        }))
    }

    async fn prepare<B>(&self, route: &str, body: &B, stream: bool) -> Result<HttpRequest, QianfanError>
    where
        B: Serialize + ?Sized,
    {
        let mut body = serde_json::to_value(body)
            .map_err(|e| QianfanError::validation(format!("request is not serializable: {}", e)))?;
        set_stream_flag(&mut body, stream);

        let url = self.resolve_url(route);
        debug!(url = %url, stream, scheme = self.auth.scheme(), "Dispatching request");

        let mut request = HttpRequest::post_json(url, body);
        self.auth.authorize(&mut request, self.transport.as_ref()).await?;
        Ok(request)
    }

    fn chat_body(&self, request: &ChatRequest) -> Result<Value, QianfanError> {
        if request.messages.is_empty() {
            return Err(QianfanError::validation("chat request has no messages"));
        }
        let mut body = serde_json::to_value(request)
            .map_err(|e| QianfanError::validation(format!("request is not serializable: {}", e)))?;
        if request.model.is_empty() && request.endpoint.is_none() {
            let model = self.default_model.as_deref().ok_or_else(|| {
                QianfanError::validation("chat request needs a model or an endpoint")
            })?;
            body["model"] = Value::String(model.to_string());
        }
        Ok(body)
    }

    fn resolve_url(&self, route: &str) -> String {
        if route.starts_with("http://") || route.starts_with("https://") {
            route.to_string()
        } else if route.starts_with('/') {
            format!("{}{}", self.base_url, route)
        } else {
            format!("{}/v2/{}", self.base_url, route)
        }
    }
}

fn chat_route(request: &ChatRequest) -> &str {
    request.endpoint.as_deref().unwrap_or(CHAT_ROUTE)
}
