//! Task Watchdog Timer (TWDT) driver.
//!
//! Wraps the ESP-IDF TWDT API to reset the controller if the control
//! loop stalls.  A reset drives every heater and valve output low during
//! boot, so a hung loop cannot keep a heater on.
//!
//! The control loop must call `feed()` on every tick.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

/// Default stall timeout.  Generous next to the 10 ms tick, short next
/// to the boiler's thermal time constant.
pub const DEFAULT_TIMEOUT_MS: u32 = 2_000;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    #[cfg(not(target_os = "espidf"))]
    feeds: core::cell::Cell<u64>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS)
    }
}

impl Watchdog {
    /// Initialise and subscribe the current task to the TWDT.
    pub fn new(timeout_ms: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: TWDT reconfiguration and subscription are called once
            // from the main task before the control loop starts.
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    log::warn!(
                        "TWDT reconfigure returned {} (may already be configured)",
                        ret
                    );
                }

                let ret = esp_task_wdt_add(core::ptr::null_mut());
                let subscribed = ret == ESP_OK;
                if subscribed {
                    info!("Watchdog: subscribed ({} ms timeout, panic on trigger)", timeout_ms);
                } else {
                    log::warn!("Watchdog: failed to subscribe ({})", ret);
                }

                Self { subscribed }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            log::info!("Watchdog(sim): {} ms timeout, no-op", timeout_ms);
            Self {
                feeds: core::cell::Cell::new(0),
            }
        }
    }

    /// Feed the watchdog.
    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        {
            if self.subscribed {
                // SAFETY: resets the TWDT for the subscribed current task.
                unsafe {
                    esp_task_wdt_reset();
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        self.feeds.set(self.feeds.get() + 1);
    }

    /// Number of feeds so far (host builds only).
    #[cfg(not(target_os = "espidf"))]
    pub fn feed_count(&self) -> u64 {
        self.feeds.get()
    }
}
