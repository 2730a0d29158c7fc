//! Credential schemes and request authorization
//!
//! Two schemes are supported:
//! - [`Credential::ApiKey`]: the legacy key pair, exchanged for an access
//!   token that is cached and appended to each request's query
//! - [`Credential::AccessKey`]: IAM access key pair, every request is signed
//!   with `bce-auth-v1`

mod iam;
mod oauth;

pub use iam::{sign_request, SIGNATURE_EXPIRATION_SECS};
pub use oauth::{fetch_access_token, AccessToken, TOKEN_ROUTE};

use crate::api::{HttpRequest, QianfanError, Transport};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum Credential {
    /// Legacy API key / secret key
    ApiKey { api_key: String, secret_key: String },
    /// IAM access key / secret key
    AccessKey {
        access_key: String,
        secret_key: String,
    },
}

impl Credential {
    pub fn scheme(&self) -> &'static str {
        match self {
            Credential::ApiKey { .. } => "api_key",
            Credential::AccessKey { .. } => "access_key",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey { api_key, .. } => f
                .debug_struct("ApiKey")
                .field("api_key", api_key)
                .field("secret_key", &"***")
                .finish(),
            Credential::AccessKey { access_key, .. } => f
                .debug_struct("AccessKey")
                .field("access_key", access_key)
                .field("secret_key", &"***")
                .finish(),
        }
    }
}

/// Applies a credential to outgoing requests
pub struct Authenticator {
    credential: Credential,
    auth_base_url: String,
    refresh_margin: Duration,
    token: RwLock<Option<AccessToken>>,
    stale: TokenInvalidator,
}

/// Marks the cached access token unusable; the next request fetches a new one
#[derive(Debug, Clone, Default)]
pub struct TokenInvalidator(Arc<AtomicBool>);

impl TokenInvalidator {
    pub fn invalidate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the mark, reporting whether it was set
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Authenticator {
    pub fn new(credential: Credential, auth_base_url: impl Into<String>) -> Self {
        Self {
            credential,
            auth_base_url: auth_base_url.into(),
            refresh_margin: Duration::from_secs(3600),
            token: RwLock::new(None),
            stale: TokenInvalidator::default(),
        }
    }

    /// Refresh a cached token this long before it expires
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn scheme(&self) -> &'static str {
        self.credential.scheme()
    }

    /// Add whatever the credential scheme requires to `request`.
    ///
    /// The legacy scheme may call the token endpoint through `transport`.
    pub async fn authorize(
        &self,
        request: &mut HttpRequest,
        transport: &dyn Transport,
    ) -> Result<(), QianfanError> {
        match &self.credential {
            Credential::ApiKey {
                api_key,
                secret_key,
            } => {
                let token = self.access_token(api_key, secret_key, transport).await?;
                request
                    .query
                    .push(("access_token".to_string(), token));
                Ok(())
            }
            Credential::AccessKey {
                access_key,
                secret_key,
            } => sign_request(
                request,
                access_key,
                secret_key,
                Utc::now(),
                SIGNATURE_EXPIRATION_SECS,
            ),
        }
    }

    async fn access_token(
        &self,
        api_key: &str,
        secret_key: &str,
        transport: &dyn Transport,
    ) -> Result<String, QianfanError> {
        if !self.stale.is_set() {
            if let Some(token) = self.token.read().await.as_ref() {
                if token.is_fresh(self.refresh_margin) {
                    return Ok(token.token.clone());
                }
            }
        }

        let mut cached = self.token.write().await;
        if self.stale.take() {
            *cached = None;
        }
        // another caller may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(self.refresh_margin) {
                return Ok(token.token.clone());
            }
        }

        let token = fetch_access_token(transport, &self.auth_base_url, api_key, secret_key).await?;
        info!(expires_in = ?token.expires_in(), "Refreshed access token");
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drop the cached token so the next request fetches a new one
    pub fn invalidate(&self) {
        self.stale.invalidate();
    }

    /// Handle for code that sees a rejected token outside this struct
    pub fn invalidator(&self) -> TokenInvalidator {
        self.stale.clone()
    }
}
