use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pipeline::ports::Clock;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Counter for the current rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerState {
    pub count: u32,
    pub window_start: Instant,
    pub window_end: Instant,
}

impl PacerState {
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_end: now,
        }
    }
}

/// Holds the consumption loop once `limit` dispatches happened inside one window.
pub struct RatePacer {
    clock: Arc<dyn Clock>,
    limit: u32,
    window: Duration,
    state: PacerState,
    cancel: Option<CancellationToken>,
}

impl RatePacer {
    pub fn new(clock: Arc<dyn Clock>, limit: u32) -> Self {
        Self::with_window(clock, limit, DEFAULT_WINDOW)
    }

    pub fn with_window(clock: Arc<dyn Clock>, limit: u32, window: Duration) -> Self {
        let state = PacerState::new(clock.now());

        Self {
            clock,
            limit: limit.max(1),
            window,
            state,
            cancel: None,
        }
    }

    /// Lets shutdown interrupt a window wait.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn count(&self) -> u32 {
        self.state.count
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    /// Accounts for one dispatch. Suspends until the window ends when the budget
    /// is spent.
    pub async fn admit(&mut self) {
        let now = self.clock.now();

        if self.state.count == 0 {
            self.state.window_start = now;
            self.state.window_end = now + self.window;
        }

        self.state.count += 1;

        if now > self.state.window_end {
            debug!(previous_count = self.state.count, "Rate window rolled over");
            self.state.count = 0;
        }

        if self.state.count >= self.limit {
            let window_end = self.state.window_end;
            info!(
                limit = self.limit,
                wait_ms = window_end.saturating_duration_since(now).as_millis() as u64,
                "Rate limit reached, holding dispatch until window ends"
            );

            match &self.cancel {
                Some(cancel) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("Rate window wait interrupted by shutdown");
                        }
                        _ = self.clock.sleep_until(window_end) => {}
                    }
                }
                None => self.clock.sleep_until(window_end).await,
            }

            self.state.count = 0;
        }
    }
}
