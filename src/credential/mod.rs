//! Short-lived session credentials
//!
//! The long-lived API secret stays on a trusted backend ([`minter`]); clients
//! fetch a single-use token from it through a [`CredentialProvider`].

mod client;
pub mod minter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GuardianResult;

pub use client::{HttpCredentialProvider, StaticCredentialProvider};
pub use minter::{MintingConfig, TokenMinter, UpstreamTokenMinter};

/// Single-use session token
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Success body of the credential endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Error body of the credential endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Source of session tokens
///
/// Implementations do not retry; the orchestrator decides whether to retry
/// the whole connect attempt.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn request_token(&self) -> GuardianResult<Token>;
}
