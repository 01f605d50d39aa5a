use crate::credential::TokenMinter;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Issues session tokens on behalf of clients
    pub minter: Arc<dyn TokenMinter>,
}

impl AppState {
    pub fn new(minter: Arc<dyn TokenMinter>) -> Self {
        Self { minter }
    }
}
