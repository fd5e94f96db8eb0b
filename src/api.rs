//! HTTP surface: landing page, health check and the Blogger OAuth flow

mod handlers;
mod types;

pub use handlers::create_router;

use crate::auth::OAuthClient;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<OAuthClient>,
}

impl AppState {
    pub fn new(auth: Arc<OAuthClient>) -> Self {
        Self { auth }
    }
}
