//! Fixed-window per-IP request limiter.

use crate::error::{AppError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Entries kept before expired windows are swept.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Counts requests per client IP in fixed windows.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`. Zero disables it.
    pub fn new(name: &'static str, max_requests: u32, window: Duration) -> Self {
        Self {
            name,
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Whether this limiter actually limits anything.
    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0 && !self.window.is_zero()
    }

    /// Count a request from `ip`, failing once the window's quota is used up.
    pub fn check(&self, ip: IpAddr) -> Result<()> {
        self.check_at(ip, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock.
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut clients = self.clients.lock();

        if clients.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started);
            let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
            tracing::warn!(limiter = self.name, ip = %ip, "Rate limit exceeded");
            return Err(AppError::TooManyRequests(retry_after));
        }

        entry.count += 1;
        Ok(())
    }
}
