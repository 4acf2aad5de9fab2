//! Link health monitor.
//!
//! Counts framing errors (bad CRC, oversize) in fixed windows of
//! `link_error_window_ms`.  Reaching `link_error_threshold` inside one
//! window degrades the link; a full window below the threshold restores
//! it.

use log::{info, warn};

use crate::config::SystemConfig;

/// Change in link health reported by [`LinkMonitor::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    Raised,
    Cleared,
}

#[derive(Debug, Default)]
pub struct LinkMonitor {
    window_start_ms: u64,
    errors_in_window: u16,
    total_errors: u32,
    degraded: bool,
}

impl LinkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&mut self) {
        self.errors_in_window = self.errors_in_window.saturating_add(1);
        self.total_errors = self.total_errors.saturating_add(1);
    }

    /// Evaluate the current window.  Call once per tick.
    pub fn poll(&mut self, now_ms: u64, cfg: &SystemConfig) -> Option<LinkHealth> {
        if !self.degraded && self.errors_in_window >= cfg.link_error_threshold {
            self.degraded = true;
            warn!(
                "LINK: degraded, {} framing errors in window",
                self.errors_in_window
            );
            return Some(LinkHealth::Raised);
        }

        if now_ms.saturating_sub(self.window_start_ms) < u64::from(cfg.link_error_window_ms) {
            return None;
        }
        let quiet = self.errors_in_window < cfg.link_error_threshold;
        self.window_start_ms = now_ms;
        self.errors_in_window = 0;
        if self.degraded && quiet {
            self.degraded = false;
            info!("LINK: recovered");
            return Some(LinkHealth::Cleared);
        }
        None
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Framing errors since boot.
    pub fn total_errors(&self) -> u32 {
        self.total_errors
    }
}
