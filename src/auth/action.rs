//! Post-authorization actions.
//!
//! The authentication service calls `ActionSink::on_granted` once per successful
//! verification. Sinks must not block: anything slow (HTTP, GPIO) is spawned so the
//! verification response is never held up by the action.

use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};
use url::Url;

pub const DEFAULT_ACTION: &str = "access_granted";
const WEBHOOK_TIMEOUT_SECONDS: u64 = 5;

pub trait ActionSink: Send + Sync {
    fn on_granted(&self, address: &str);
}

/// Records grants in the log and nothing else.
#[derive(Clone, Debug)]
pub struct LogActionSink {
    action: String,
}

impl LogActionSink {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
        }
    }
}

impl Default for LogActionSink {
    fn default() -> Self {
        Self::new(DEFAULT_ACTION)
    }
}

impl ActionSink for LogActionSink {
    fn on_granted(&self, address: &str) {
        info!(address, action = %self.action, "Access granted");
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WebhookPayload {
    pub address: String,
    pub action: String,
    pub granted_at: u64,
}

/// Notifies an HTTP endpoint (door controller, ticket system) of each grant.
pub struct WebhookActionSink {
    client: Client,
    url: Url,
    token: Option<SecretString>,
    action: String,
}

impl WebhookActionSink {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, token: Option<SecretString>, action: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECONDS))
            .build()
            .context("Failed to build webhook client")?;

        Ok(Self {
            client,
            url,
            token,
            action: action.into(),
        })
    }

    fn payload(&self, address: &str) -> WebhookPayload {
        WebhookPayload {
            address: address.to_string(),
            action: self.action.clone(),
            granted_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
        }
    }
}

impl std::fmt::Debug for WebhookActionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookActionSink")
            .field("url", &self.url.as_str())
            .field("token_set", &self.token.is_some())
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

impl ActionSink for WebhookActionSink {
    fn on_granted(&self, address: &str) {
        info!(address, action = %self.action, "Access granted");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("No async runtime available, webhook not sent");
            return;
        };

        let mut request = self.client.post(self.url.clone()).json(&self.payload(address));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let address = address.to_string();
        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(address, "Webhook delivered");
                }
                Ok(response) => {
                    error!(address, status = %response.status(), "Webhook rejected grant");
                }
                Err(e) => {
                    error!(address, "Webhook delivery failed: {}", e);
                }
            }
        });
    }
}
