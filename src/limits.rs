use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,
}

fn default_window_seconds() -> u64 {
    60
}

fn default_max_calls() -> u32 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_calls: default_max_calls(),
        }
    }
}

/// Fixed-window call counter per user. Window identity is wall-clock
/// truncated to the window length, so a burst straddling a boundary can see
/// up to twice the capacity. Accepted limitation of the fixed-window shape.
#[derive(Debug, Default)]
pub struct RateLimiter {
    usage: HashMap<u64, WindowUsage>,
    last_gc_window: u64,
}

#[derive(Debug, Clone)]
struct WindowUsage {
    window: u64,
    calls: u32,
}

impl RateLimiter {
    /// Admits and counts the call, or rejects without counting once the
    /// user's window is at capacity.
    pub fn check_and_increment(
        &mut self,
        user_id: u64,
        config: &RateLimitConfig,
        now_epoch_seconds: u64,
    ) -> bool {
        let window = now_epoch_seconds / config.window_seconds.max(1);

        if window != self.last_gc_window {
            // Keep only the active window bucket. Older/future buckets are stale.
            self.usage.retain(|_, usage| usage.window == window);
            self.last_gc_window = window;
        }

        let usage = self
            .usage
            .entry(user_id)
            .or_insert(WindowUsage { window, calls: 0 });

        if usage.window != window {
            usage.window = window;
            usage.calls = 0;
        }

        if usage.calls >= config.max_calls {
            return false;
        }
        usage.calls += 1;
        true
    }
}
