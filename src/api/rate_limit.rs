//! Fixed-window per-user request limiter.

use crate::error::{BiError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    enabled: bool,
    limit: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, requests_per_minute: u32) -> Self {
        Self {
            enabled,
            limit: requests_per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count a request for `key`, failing with `RateLimited` once the
    /// window is full.
    pub fn check(&self, key: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.limit {
            let remaining = WINDOW.saturating_sub(now.duration_since(window.started));
            return Err(BiError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }
        window.count += 1;
        Ok(())
    }

    /// Forget windows that have fully elapsed.
    pub fn prune(&self) {
        let now = Instant::now();
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, w| now.duration_since(w.started) < WINDOW);
    }
}
