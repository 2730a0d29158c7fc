//! Access token exchange for the legacy key pair

use crate::api::{ApplicationError, HttpRequest, QianfanError, Transport};
use reqwest::Method;
use serde::Deserialize;
use std::time::{Duration, Instant};

pub const TOKEN_ROUTE: &str = "/oauth/2.0/token";

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Instant,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: Instant::now() + ttl,
        }
    }

    /// Still valid for at least `margin`
    pub fn is_fresh(&self, margin: Duration) -> bool {
        self.expires_at
            .checked_duration_since(Instant::now())
            .map(|left| left > margin)
            .unwrap_or(false)
    }

    pub fn expires_in(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Exchange the key pair at `{auth_base_url}/oauth/2.0/token`
pub async fn fetch_access_token(
    transport: &dyn Transport,
    auth_base_url: &str,
    api_key: &str,
    secret_key: &str,
) -> Result<AccessToken, QianfanError> {
    let url = format!("{}{}", auth_base_url.trim_end_matches('/'), TOKEN_ROUTE);
    let request = HttpRequest::new(Method::POST, url)
        .with_query("grant_type", "client_credentials")
        .with_query("client_id", api_key)
        .with_query("client_secret", secret_key);

    let json = transport.send(request).await?;
    if let Some(err) = ApplicationError::from_value(&json) {
        return Err(err.into());
    }
    let response: TokenResponse = serde_json::from_value(json)?;
    Ok(AccessToken::new(
        response.access_token,
        Duration::from_secs(response.expires_in),
    ))
}
