//! Sliding-window rate limiter with minimum spacing between sends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// A limiter shared between dispatchers. Callers hold the lock while they
/// wait, so waiting senders are served one at a time in lock order.
pub type SharedRateLimiter = Arc<Mutex<RateLimiter>>;

/// At most `limit` sends in any `window`, and never two sends closer than
/// `min_spacing`.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    min_spacing: Duration,
    sent: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration, min_spacing: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window,
            min_spacing,
            sent: VecDeque::new(),
        }
    }

    pub fn shared(self) -> SharedRateLimiter {
        Arc::new(Mutex::new(self))
    }

    /// Wait until a send is allowed, record it, and return its instant.
    pub async fn acquire(&mut self) -> Instant {
        loop {
            let now = Instant::now();
            self.evict(now);

            let mut ready = now;
            if self.sent.len() >= self.limit {
                if let Some(&oldest) = self.sent.front() {
                    ready = ready.max(oldest + self.window);
                }
            }
            if let Some(&last) = self.sent.back() {
                ready = ready.max(last + self.min_spacing);
            }

            if ready <= now {
                self.sent.push_back(now);
                return now;
            }

            debug!(
                wait_ms = (ready - now).as_millis() as u64,
                in_window = self.sent.len(),
                "Rate limit reached, waiting"
            );
            tokio::time::sleep_until(ready).await;
        }
    }

    /// Sends recorded inside the current window.
    pub fn in_window(&self) -> usize {
        self.sent.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.sent.front() {
            if now.duration_since(oldest) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}
