//! System clock adapter.
//!
//! - **`target_os = "espidf"`**: wraps `esp_timer_get_time()` for uptime
//!   and `gettimeofday()` / `localtime_r()` for the wall clock (set by the
//!   hub or SNTP).
//! - **`not(target_os = "espidf")`**: `std::time::Instant` for uptime;
//!   the wall clock is whatever a test injects.

use crate::scheduler::WallTime;

/// Anything before 2020-01-01 means the wall clock was never set.
#[cfg(target_os = "espidf")]
const EPOCH_2020: i64 = 1_577_836_800;

const SECS_PER_DAY: i64 = 86_400;

pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
    #[cfg(not(target_os = "espidf"))]
    wall: Option<WallTime>,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
            #[cfg(not(target_os = "espidf"))]
            wall: None,
        }
    }

    /// Milliseconds since boot (monotonic).
    #[cfg(target_os = "espidf")]
    pub fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    /// Milliseconds since boot (monotonic).
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Local day and hour.  `None` while the wall clock is not synced.
    #[cfg(target_os = "espidf")]
    pub fn wall_time(&self) -> Option<WallTime> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        let secs = i64::from(tv.tv_sec);
        if secs < EPOCH_2020 {
            return None;
        }
        let t = tv.tv_sec as esp_idf_svc::sys::time_t;
        let mut tm: esp_idf_svc::sys::tm = unsafe { core::mem::zeroed() };
        if unsafe { esp_idf_svc::sys::localtime_r(&t, &mut tm) }.is_null() {
            return None;
        }
        let hour = u8::try_from(tm.tm_hour).ok().filter(|h| *h < 24)?;
        Some(WallTime {
            day: day_number(secs),
            hour,
        })
    }

    /// Local day and hour.  `None` until a test calls [`Self::set_wall_time`].
    #[cfg(not(target_os = "espidf"))]
    pub fn wall_time(&self) -> Option<WallTime> {
        self.wall
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn set_wall_time(&mut self, wall: Option<WallTime>) {
        self.wall = wall;
    }
}

/// Days since the Unix epoch for a timestamp in seconds.
pub fn day_number(epoch_secs: i64) -> u32 {
    u32::try_from(epoch_secs.max(0) / SECS_PER_DAY).unwrap_or(u32::MAX)
}
