//! reqwest-backed transport

use super::sse::SseFrames;
use super::streaming::FrameSource;
use super::{HttpRequest, QianfanError, Transport, TransportError};
use crate::config::HttpSettings;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Transport over a shared `reqwest::Client`
pub struct HttpTransport {
    client: Client,
    request_timeout: Option<Duration>,
    stream_idle_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self, QianfanError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()?;
        Ok(Self::with_client(client, settings))
    }

    pub fn with_client(client: Client, settings: &HttpSettings) -> Self {
        Self {
            client,
            request_timeout: non_zero_secs(settings.request_timeout_secs),
            stream_idle_timeout: non_zero_secs(settings.stream_idle_timeout_secs),
        }
    }

    fn build(&self, request: &HttpRequest) -> RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }

    /// Send and wait for the response head, bounded by the request timeout
    async fn dispatch(&self, builder: RequestBuilder) -> Result<Response, QianfanError> {
        let response = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, builder.send())
                .await
                .map_err(|_| TransportError::timeout(format!("no response within {:?}", limit)))??,
            None => builder.send().await?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response.text().await.unwrap_or_default();
        Err(TransportError::status(status.as_u16(), format!("{}: {}", status, error_text)).into())
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<Value, QianfanError> {
        debug!(method = %request.method, url = %request.url, "Sending request");
        let mut builder = self.build(&request);
        if let Some(limit) = self.request_timeout {
            builder = builder.timeout(limit);
        }
        let response = self.dispatch(builder).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<Box<dyn FrameSource>, QianfanError> {
        debug!(method = %request.method, url = %request.url, "Opening stream");
        let builder = self.build(&request).header("accept", "text/event-stream");
        let response = self.dispatch(builder).await?;

        let body = response.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        let mut frames = SseFrames::<reqwest::Error>::new(Box::pin(body));
        if let Some(limit) = self.stream_idle_timeout {
            frames = frames.with_idle_timeout(limit);
        }
        Ok(Box::new(frames))
    }
}
