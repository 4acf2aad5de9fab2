//! Periodic status push.
//!
//! The `StatusStreamer` decides when the control loop should publish a
//! `Status` frame: every `status_interval_ms`, plus once on demand (state
//! changes, reconnects).  Frames the outbound queue refuses are counted.

/// Stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Streaming at the configured interval.
    Active { interval_ms: u32 },
    /// Suppressed, e.g. while an image is streaming in.
    Paused,
}

pub struct StatusStreamer {
    state: StreamState,
    elapsed_ms: u32,
    immediate: bool,
    /// Status frames the outbound queue refused.
    dropped_count: u32,
}

impl StatusStreamer {
    /// Floor on the interval (10 Hz).
    pub const MIN_INTERVAL_MS: u32 = 100;

    pub fn new(interval_ms: u32) -> Self {
        Self {
            state: StreamState::Active {
                interval_ms: interval_ms.max(Self::MIN_INTERVAL_MS),
            },
            elapsed_ms: 0,
            immediate: false,
            dropped_count: 0,
        }
    }

    pub fn pause(&mut self) {
        if let StreamState::Active { .. } = self.state {
            self.state = StreamState::Paused;
        }
    }

    pub fn resume(&mut self, interval_ms: u32) {
        if self.state == StreamState::Paused {
            self.state = StreamState::Active {
                interval_ms: interval_ms.max(Self::MIN_INTERVAL_MS),
            };
            self.elapsed_ms = 0;
        }
    }

    /// Send a status on the next tick regardless of the interval.
    pub fn request_immediate(&mut self) {
        self.immediate = true;
    }

    /// Advance by `delta_ms`.  Returns `true` if a frame should be sent.
    pub fn tick(&mut self, delta_ms: u32) -> bool {
        match self.state {
            StreamState::Active { interval_ms } => {
                self.elapsed_ms = self.elapsed_ms.saturating_add(delta_ms);
                if self.immediate || self.elapsed_ms >= interval_ms {
                    self.immediate = false;
                    self.elapsed_ms = 0;
                    true
                } else {
                    false
                }
            }
            StreamState::Paused => false,
        }
    }

    pub fn record_drop(&mut self) {
        self.dropped_count = self.dropped_count.saturating_add(1);
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn dropped_count(&self) -> u32 {
        self.dropped_count
    }
}
