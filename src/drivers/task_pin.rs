//! Core-pinned thread spawning for the ESP32-S3.
//!
//! Wraps `esp_pthread_set_cfg()` so that the next `std::thread` spawn
//! creates a FreeRTOS task pinned to a given core with explicit priority
//! and stack size.  The config applies to the *next* `pthread_create()`
//! from the calling thread, so the config→spawn pair must not be
//! interleaved with other thread creation.
//!
//! On non-ESP targets this is a plain named thread.

use std::io;
use std::thread::JoinHandle;

/// CPU cores of the ESP32-S3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU): protocol stacks and the hub UART pump.
    Pro = 0,
    /// Core 1 (APP_CPU): the control loop.
    App = 1,
}

/// Spawn a thread pinned to `core`.
///
/// `name` must be NUL-terminated (e.g. `"hub-rx\0"`).
#[cfg(target_os = "espidf")]
pub fn spawn_on_core(
    core: Core,
    priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    use esp_idf_svc::sys::{ESP_OK, esp_create_default_pthread_config, esp_pthread_set_cfg};

    // SAFETY: the config struct is fully initialised by the IDF helper and
    // `name` is a NUL-terminated static string.
    let ret = unsafe {
        let mut cfg = esp_create_default_pthread_config();
        cfg.pin_to_core = core as i32;
        cfg.prio = i32::from(priority);
        cfg.stack_size = i32::try_from(stack_kb * 1024).unwrap_or(i32::MAX);
        cfg.thread_name = name.as_ptr().cast();
        esp_pthread_set_cfg(&cfg)
    };
    if ret != ESP_OK {
        return Err(io::Error::other(format!("esp_pthread_set_cfg failed: {ret}")));
    }

    let display_name = name.trim_end_matches('\0');
    log::info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name,
        core,
        priority,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .spawn(f)
}

/// Simulation fallback: no core affinity or priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_on_core(
    _core: Core,
    _priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    let display_name = name.trim_end_matches('\0');
    log::info!(
        "Spawning '{}' (sim, no core pinning, stack={}KB)",
        display_name,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
}
