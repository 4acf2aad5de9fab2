//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (UART0 / USB-CDC in production).  The hub link is a
//! second sink; the control loop fans events out to both.

use log::{info, warn};

use crate::alarms::Severity;
use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Telemetry(t) => {
                let mut temps = heapless::String::<48>::new();
                for b in &t.boilers {
                    let _ = match b.temp_c {
                        Some(c) => core::fmt::write(
                            &mut temps,
                            format_args!(" {}={:.1}/{:.1}\u{00b0}C@{:.0}%", b.id.0, c, b.setpoint_c, b.duty * 100.0),
                        ),
                        None => core::fmt::write(&mut temps, format_args!(" {}=--", b.id.0)),
                    };
                }
                let mains = t.power.map_or(0.0, |p| p.current_a);
                info!(
                    "TELEM | state={:?} |{} | P={:.1}bar | mains={:.2}A | tank={} level={} | alarms={} | ota={}",
                    t.state,
                    temps,
                    t.pressure_bar.unwrap_or(0.0),
                    mains,
                    if t.tank_ok { "OK" } else { "LOW" },
                    if t.level_ok { "OK" } else { "LOW" },
                    t.active_alarms.len(),
                    t.ota_active,
                );
            }
            AppEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            AppEvent::AlarmChanged(rec) => {
                if rec.active && rec.severity == Severity::Critical {
                    warn!("ALARM | {} {:?} raised", rec.code, rec.severity);
                } else if rec.active {
                    info!("ALARM | {} {:?} raised", rec.code, rec.severity);
                } else {
                    info!("ALARM | {} cleared after {} ms", rec.code, rec.duration_ms);
                }
            }
            AppEvent::BrewCompleted(s) => {
                info!(
                    "BREW  | {} ms | peak {:.1} bar {:.1}\u{00b0}C | {:.0} mL | counted={}",
                    s.duration_ms, s.peak_pressure_bar, s.peak_temp_c, s.volume_ml, s.counted
                );
            }
            AppEvent::CommandRejected { event, state } => {
                info!("CMD   | {:?} rejected in {:?}", event, state);
            }
            AppEvent::Started(state) => {
                info!("START | initial_state={:?}", state);
            }
        }
    }
}
