//! fixed-window rate limiter (part of C6)
//!
//! 100 requests per minute per client identity (remote address), in-memory.
//! requests over the limit respond 429 with a retry-after in seconds.
//! grounded on the same `Arc<RwLock<HashMap<...>>>` keyed-counter idiom as
//! the store's dust counters.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::store::now_secs;

const WINDOW_SECONDS: i64 = 60;
const MAX_REQUESTS_PER_WINDOW: u32 = 100;

struct Window {
    started_at: i64,
    count: u32,
}

pub struct RateLimiter {
    windows: RwLock<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// returns `Ok(())` if the request is allowed, or `Err(retry_after)` if
    /// the client has exhausted its window
    pub async fn check(&self, client: IpAddr) -> Result<(), Duration> {
        let now = now_secs();
        let mut windows = self.windows.write().await;
        let window = windows.entry(client).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now - window.started_at >= WINDOW_SECONDS {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= MAX_REQUESTS_PER_WINDOW {
            let retry_after = (window.started_at + WINDOW_SECONDS - now).max(1);
            return Err(Duration::from_secs(retry_after as u64));
        }

        window.count += 1;
        Ok(())
    }
}
