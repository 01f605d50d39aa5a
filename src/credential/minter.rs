//! Server-side token minting
//!
//! Runs on the trusted backend. Exchanges the long-lived API key for an
//! ephemeral token that can open exactly one session, expires quickly and is
//! pinned to one model with audio responses.

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::Token;
use crate::error::{GuardianError, GuardianResult};

/// Configuration for minting tokens against the upstream provider
#[derive(Clone)]
pub struct MintingConfig {
    /// Upstream ephemeral-token endpoint
    pub upstream_url: String,
    /// Long-lived secret; never leaves the backend
    pub api_key: String,
    /// Model the token is pinned to
    pub model: String,
    /// Token lifetime (default 30 minutes)
    pub token_ttl: Duration,
    /// Window in which the token may open its session (default 60 seconds)
    pub new_session_ttl: Duration,
}

impl std::fmt::Debug for MintingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintingConfig")
            .field("upstream_url", &self.upstream_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("token_ttl", &self.token_ttl)
            .field("new_session_ttl", &self.new_session_ttl)
            .finish()
    }
}

impl Default for MintingConfig {
    fn default() -> Self {
        Self {
            upstream_url: "https://generativelanguage.googleapis.com/v1alpha/auth_tokens"
                .to_string(),
            api_key: String::new(),
            model: "models/gemini-2.0-flash-live-001".to_string(),
            token_ttl: Duration::from_secs(30 * 60),
            new_session_ttl: Duration::from_secs(60),
        }
    }
}

/// Request body for the upstream ephemeral-token API
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    pub uses: u32,
    pub expire_time: String,
    pub new_session_expire_time: String,
    pub bidi_generate_content_setup: PinnedSetup,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedSetup {
    pub model: String,
    pub generation_config: PinnedGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedGenerationConfig {
    pub response_modalities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MintResponse {
    name: Option<String>,
}

/// Issues session tokens
#[async_trait::async_trait]
pub trait TokenMinter: Send + Sync {
    async fn mint(&self) -> GuardianResult<Token>;
}

/// Mints tokens from the upstream provider with the backend's API key
#[derive(Debug, Clone)]
pub struct UpstreamTokenMinter {
    client: Client,
    config: MintingConfig,
}

impl UpstreamTokenMinter {
    pub fn new(config: MintingConfig) -> GuardianResult<Self> {
        if config.api_key.is_empty() {
            return Err(GuardianError::Config(
                "minting API key is not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| GuardianError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Build the constrained request for a token valid from now
    pub fn build_request(config: &MintingConfig) -> GuardianResult<MintRequest> {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(config.token_ttl)
            .map_err(|e| GuardianError::Config(format!("invalid token ttl: {e}")))?;
        let session_ttl = ChronoDuration::from_std(config.new_session_ttl)
            .map_err(|e| GuardianError::Config(format!("invalid new-session ttl: {e}")))?;

        Ok(MintRequest {
            uses: 1,
            expire_time: (now + ttl).to_rfc3339(),
            new_session_expire_time: (now + session_ttl).to_rfc3339(),
            bidi_generate_content_setup: PinnedSetup {
                model: config.model.clone(),
                generation_config: PinnedGenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                },
            },
        })
    }
}

#[async_trait::async_trait]
impl TokenMinter for UpstreamTokenMinter {
    async fn mint(&self) -> GuardianResult<Token> {
        let request = Self::build_request(&self.config)?;
        let expires_at = Utc::now()
            + ChronoDuration::from_std(self.config.token_ttl)
                .map_err(|e| GuardianError::Config(format!("invalid token ttl: {e}")))?;

        let response = self
            .client
            .post(&self.config.upstream_url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Cap error body to keep logs readable
            const MAX_ERROR_BODY_LEN: usize = 500;
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            let capped: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
            warn!("Upstream token minting failed with {}: {}", status, capped);
            return Err(GuardianError::Credential(format!(
                "upstream returned {status}"
            )));
        }

        let body: MintResponse = response.json().await?;
        let value = body
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| GuardianError::Credential("upstream response missing token".to_string()))?;

        info!("Minted single-use session token for {}", self.config.model);
        Ok(Token::new(value, expires_at))
    }
}
