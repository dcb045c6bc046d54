//! Per-plugin sys-call rate limiting.

use frontclaw_contract::{codes, ErrorObject};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sys-calls allowed per plugin per window.
pub const DEFAULT_BUDGET: u32 = 300;

/// Window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

struct Window {
    started: Instant,
    count: u32,
}

/// Sliding counter per plugin id. The window resets lazily on the first call
/// after it expires; counters are only touched from the owning handler path,
/// so a plain mutex is enough.
pub struct RateLimiter {
    budget: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_BUDGET, DEFAULT_WINDOW)
    }

    pub fn with_budget(budget: u32, window: Duration) -> Self {
        Self {
            budget,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one call. Fails with `SYSCALL_RATE_LIMITED` once the budget for
    /// the current window is spent.
    pub fn check(&self, plugin_id: &str) -> Result<(), ErrorObject> {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter lock");
        let window = windows.entry(plugin_id.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.budget {
            return Err(ErrorObject::new(
                codes::SYSCALL_RATE_LIMITED,
                format!(
                    "plugin '{plugin_id}' exceeded {} sys-calls per {}s",
                    self.budget,
                    self.window.as_secs()
                ),
            ));
        }

        window.count += 1;
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
