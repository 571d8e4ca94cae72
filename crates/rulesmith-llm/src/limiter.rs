//! Sliding-window rate limiter shared by every outbound model call.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

/// Admits at most `calls_per_minute` calls in any rolling 60-second window.
///
/// The timestamp window is the only mutable state shared across concurrent
/// extraction tasks; it sits behind a mutex so concurrent `acquire`s cannot
/// over-admit.
pub struct RateLimiter {
    calls_per_minute: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(calls_per_minute: usize) -> Self {
        Self {
            calls_per_minute: calls_per_minute.max(1),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock();
                let now = Instant::now();
                while let Some(oldest) = window.front() {
                    if now.duration_since(*oldest) >= WINDOW {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
                if window.len() < self.calls_per_minute {
                    window.push_back(now);
                    None
                } else {
                    // Slot frees when the oldest admitted call ages out.
                    window
                        .front()
                        .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Calls currently inside the rolling window.
    pub fn in_flight_window(&self) -> usize {
        let mut window = self.window.lock();
        let now = Instant::now();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len()
    }
}
