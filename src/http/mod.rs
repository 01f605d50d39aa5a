//! HTTP API for the credential minting backend
//!
//! Clients never hold the long-lived provider key. They ask this service
//! for a single-use session token instead:
//! - POST /api/live-token - Mint a session token
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
