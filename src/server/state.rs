//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::config::Config;
use crate::db::Database;
use crate::images::ImagePipeline;
use crate::server::ratelimit::RateLimiter;
use axum::http::{HeaderMap, header};
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Cover upload pipeline.
    pub images: Arc<ImagePipeline>,
    /// Limiter applied to every request.
    pub global_limiter: Arc<RateLimiter>,
    /// Limiter applied to signup and login.
    pub auth_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Create new application state with database.
    pub fn new(config: Config, db: Database, auth: AuthService) -> Self {
        let window = Duration::from_secs(config.rate_limit.window_seconds);

        Self {
            images: Arc::new(ImagePipeline::new(&config.uploads)),
            global_limiter: Arc::new(RateLimiter::new(
                "global",
                config.rate_limit.max_requests,
                window,
            )),
            auth_limiter: Arc::new(RateLimiter::new(
                "auth",
                config.rate_limit.auth_max_requests,
                window,
            )),
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
        }
    }

    /// Get the base URL for generating image links.
    ///
    /// Uses the configured public URL, falling back to the request's Host.
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.config.server.public_url {
            return url.trim_end_matches('/').to_string();
        }

        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");

        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| format!("localhost:{}", self.config.server.bind.port()));

        format!("{}://{}", scheme, host)
    }
}
