use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

/// Source of time for polling loops.
///
/// `now` is monotonic and only meaningful relative to other readings of the
/// same clock. `unix_millis` is wall-clock time used for envelope timestamps.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
    async fn sleep(&self, duration: Duration);
    fn unix_millis(&self) -> i64;
}

/// Real time backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn unix_millis(&self) -> i64 {
        now_millis()
    }
}

/// Virtual time for tests: `sleep` advances the clock instantly and yields.
#[derive(Debug)]
pub struct ManualClock {
    elapsed: Mutex<Duration>,
    epoch_millis: i64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ManualClock {
    pub fn new(epoch_millis: i64) -> Self {
        Self {
            elapsed: Mutex::new(Duration::ZERO),
            epoch_millis,
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut guard = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *guard += duration;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    fn unix_millis(&self) -> i64 {
        self.epoch_millis + self.now().as_millis() as i64
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
