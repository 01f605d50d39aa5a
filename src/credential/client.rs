use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CredentialProvider, ErrorResponse, Token, TokenResponse};
use crate::error::{GuardianError, GuardianResult};

/// Assumed lifetime when the backend omits `expiresAt`
const DEFAULT_TOKEN_LIFETIME_MINS: i64 = 30;

/// Fetches tokens from the trusted credential endpoint
#[derive(Debug, Clone)]
pub struct HttpCredentialProvider {
    client: Client,
    endpoint: String,
}

impl HttpCredentialProvider {
    pub fn new(endpoint: impl Into<String>) -> GuardianResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| GuardianError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn request_token(&self) -> GuardianResult<Token> {
        debug!("Requesting session token from {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .send()
            .await
            .map_err(|e| GuardianError::Credential(format!("credential endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let reason = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            warn!("Credential endpoint returned {}: {}", status, reason);
            return Err(GuardianError::Credential(format!(
                "credential endpoint returned {status}: {reason}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| GuardianError::Credential(format!("invalid credential response: {e}")))?;

        let value = body
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GuardianError::Credential("response missing token".to_string()))?;
        let expires_at = body
            .expires_at
            .unwrap_or_else(|| Utc::now() + ChronoDuration::minutes(DEFAULT_TOKEN_LIFETIME_MINS));

        info!("Obtained session token (expires {})", expires_at);
        Ok(Token::new(value, expires_at))
    }
}

/// Hands out a preconfigured token
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    token: Token,
}

impl StaticCredentialProvider {
    pub fn new(token: Token) -> Self {
        Self { token }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn request_token(&self) -> GuardianResult<Token> {
        if self.token.is_expired() {
            return Err(GuardianError::Credential("static token expired".to_string()));
        }
        Ok(self.token.clone())
    }
}
