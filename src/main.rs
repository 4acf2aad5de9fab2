//! crema firmware: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareAdapter   LogEventSink   NvsAdapter    EspOtaFirmware │
//! │  (Sensor+Actuator) (EventSink)    (Config+Store) (FirmwarePort)│
//! │  UartTransport + hub-rx task      SystemClock   ModbusPowerMeter│
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  ControlLoop                                           │    │
//! │  │  AppService (FSM · Safety · PID · Maintenance)         │    │
//! │  │  Decoder · Dispatcher · OTA · OutboundQueue · Stream   │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Scheduler (wake times, delegate-driven)                       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::time::{Duration, Instant};

use anyhow::Result;
use log::{error, info, warn};

use crema::adapters::firmware::EspOtaFirmware;
use crema::adapters::hardware::HardwareAdapter;
use crema::adapters::log_sink::LogEventSink;
use crema::adapters::nvs::NvsAdapter;
use crema::adapters::power_meter::{ModbusPowerMeter, PZEM_ADDR};
use crema::adapters::time::SystemClock;
use crema::adapters::uart::{self, UartTransport};
use crema::app::control_loop::ControlLoop;
use crema::app::ports::ConfigPort;
use crema::config::SystemConfig;
use crema::drivers::{hw_init, watchdog::Watchdog};
use crema::pins;
use crema::rpc::{ota, ring::RxRing};
use crema::scheduler::Scheduler;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("crema v{} starting", env!("CARGO_PKG_VERSION"));

    // ── 2. OTA rollback check ─────────────────────────────────
    ota::check_rollback();

    // ── 3. Hardware peripherals + watchdog ────────────────────
    if let Err(e) = hw_init::init_peripherals() {
        // Outputs stay low; the watchdog resets us if we hang here.
        error!("hw_init failed: {}, halting", e);
        return Err(anyhow::anyhow!("peripheral init: {}", e));
    }
    if let Err(e) = hw_init::init_isr_service() {
        warn!("ISR service init failed: {}, flow meter disabled", e);
    }
    let watchdog = Watchdog::default();

    // ── 4. Config from NVS (or defaults) ──────────────────────
    let mut nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init: {}", e))?;
    let config = nvs.load().unwrap_or_else(|e| {
        warn!("NVS config load failed ({}), using defaults", e);
        SystemConfig::default()
    });
    let period = Duration::from_millis(u64::from(config.control_loop_interval_ms));

    // ── 5. Adapters + control loop ────────────────────────────
    let mut hw = HardwareAdapter::new(&config);
    let mut sink = LogEventSink::new();
    let mut firmware = EspOtaFirmware::new();
    let clock = SystemClock::new();
    let mut scheduler = Scheduler::from_config(&config);

    let mut control = ControlLoop::new(config);
    control.restore(&nvs);
    control.start(&mut sink);

    // ── 6. Hub link ───────────────────────────────────────────
    let mut uart_tx = UartTransport::open().map_err(|e| anyhow::anyhow!("UART: {:?}", e))?;
    let ring: &'static mut RxRing = Box::leak(Box::new(RxRing::new()));
    let (producer, mut rx) = ring.split();
    uart::spawn_rx_pump(uart_tx, producer)?;

    // ── 7. Mains power meter ─────────────────────────────────
    let mut meter = match UartTransport::open_port(
        pins::METER_UART_PORT,
        pins::METER_UART_TX_GPIO,
        pins::METER_UART_RX_GPIO,
        pins::METER_UART_BAUD,
        0,
    ) {
        Ok(link) => Some(ModbusPowerMeter::new(link, PZEM_ADDR)),
        Err(e) => {
            warn!("Power meter UART failed ({:?}), running without mains readings", e);
            None
        }
    };

    info!("System ready. Entering control loop ({} ms).", period.as_millis());

    // ── 8. Fixed-period loop ──────────────────────────────────
    let mut next = Instant::now();
    loop {
        control.tick(&mut hw, &mut meter, &mut rx, &mut nvs, &mut firmware, &mut sink);
        scheduler.tick(clock.wall_time(), &mut control);
        control.flush(&mut uart_tx);
        watchdog.feed();

        if control.reboot_pending() {
            info!("OTA: image committed, rebooting");
            ota::reboot();
        }

        next += period;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            // Overran: account for the whole periods lost so loop time stays
            // on wall time, then run the next period straight away.
            let missed = ((now - next).as_millis() / period.as_millis().max(1)) as u32;
            control.skip_intervals(u64::from(missed));
            next += period * missed;
        }
    }
}
