use super::state::AppState;
use crate::credential::{ErrorResponse, TokenResponse};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};

/// POST /api/live-token
/// Mint a single-use session token
pub async fn mint_token(State(state): State<AppState>) -> impl IntoResponse {
    match state.minter.mint().await {
        Ok(token) => {
            info!("Issued session token (expires {})", token.expires_at());
            (
                StatusCode::OK,
                Json(TokenResponse {
                    token: Some(token.value().to_string()),
                    expires_at: Some(token.expires_at()),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to mint session token: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: format!("Failed to mint session token: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
