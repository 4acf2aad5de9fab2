//! Mock adapters and a host harness for integration tests.
//!
//! [`MockHardware`] records every actuator command and serves a sensor
//! snapshot the test controls.  [`Harness`] wires a full [`ControlLoop`]
//! to the mocks, an rx ring the test writes hub frames into, and a
//! capturing transport that collects every response frame.

use std::collections::HashMap;

use crema::adapters::firmware::MemoryFirmware;
use crema::adapters::power_meter::SimPowerMeter;
use crema::app::control_loop::ControlLoop;
use crema::app::events::AppEvent;
use crema::app::ports::{ActuatorPort, EventSink, SensorPort, StorageError, StoragePort};
use crema::config::SystemConfig;
use crema::control::boiler::{BoilerId, MAX_BOILERS};
use crema::fsm::StateId;
use crema::fsm::context::{Sample, SensorSnapshot};
use crema::rpc::codec::{Frame, FrameDecoder};
use crema::rpc::message::{InboundMessage, msg_type};
use crema::rpc::ring::{RxConsumer, RxProducer, RxRing};
use crema::rpc::transport::Transport;

// ── MockHardware ──────────────────────────────────────────────

/// Sensor values served to the service, plus the last commanded outputs.
pub struct MockHardware {
    pub temps: [Option<f32>; MAX_BOILERS],
    pub pressure_bar: Option<f32>,
    pub tank_ok: bool,
    pub level_ok: bool,
    pub flow_pulses: u32,

    pub heater: [f32; MAX_BOILERS],
    pub pump: f32,
    pub valve: bool,
    pub all_off_calls: u32,
}

#[allow(dead_code)]
impl MockHardware {
    /// Both boilers sitting exactly on their default targets.
    pub fn at_temperature(cfg: &SystemConfig) -> Self {
        Self {
            temps: [Some(cfg.brew_target_c), Some(cfg.steam_target_c)],
            pressure_bar: Some(1.0),
            tank_ok: true,
            level_ok: true,
            flow_pulses: 0,
            heater: [0.0; MAX_BOILERS],
            pump: 0.0,
            valve: false,
            all_off_calls: 0,
        }
    }

    pub fn heater_duty(&self, id: BoilerId) -> f32 {
        self.heater[usize::from(id.0)]
    }

    pub fn any_heater_on(&self) -> bool {
        self.heater.iter().any(|&d| d > 0.0)
    }
}

impl SensorPort for MockHardware {
    fn read_all(&mut self, now_ms: u64) -> SensorSnapshot {
        let mut snap = SensorSnapshot::default();
        for (slot, t) in snap.boiler_temps.iter_mut().zip(self.temps) {
            *slot = t.map(|c| Sample::new(c, now_ms));
        }
        snap.pressure_bar = self.pressure_bar.map(|b| Sample::new(b, now_ms));
        snap.tank_water_ok = self.tank_ok;
        snap.boiler_level_ok = self.level_ok;
        snap.flow_pulses = self.flow_pulses;
        snap
    }
}

impl ActuatorPort for MockHardware {
    fn set_heater(&mut self, id: BoilerId, duty: f32) {
        if let Some(h) = self.heater.get_mut(usize::from(id.0)) {
            *h = duty;
        }
    }

    fn set_pump(&mut self, duty: f32) {
        self.pump = duty;
    }

    fn set_brew_valve(&mut self, open: bool) {
        self.valve = open;
    }

    fn all_off(&mut self) {
        self.heater = [0.0; MAX_BOILERS];
        self.pump = 0.0;
        self.valve = false;
        self.all_off_calls += 1;
    }
}

// ── MockNvs ───────────────────────────────────────────────────

/// Namespaced blob store.  Clones share nothing; clone to "power cycle".
#[derive(Clone, Default)]
pub struct MockNvs {
    pub data: HashMap<(String, String), Vec<u8>>,
    pub fail_writes: bool,
    pub writes: u32,
}

#[allow(dead_code)]
impl MockNvs {
    pub fn get(&self, ns: &str, key: &str) -> Option<&Vec<u8>> {
        self.data.get(&(ns.to_string(), key.to_string()))
    }

    /// Flip one byte of a stored blob.
    pub fn corrupt(&mut self, ns: &str, key: &str, index: usize) {
        if let Some(v) = self.data.get_mut(&(ns.to_string(), key.to_string())) {
            v[index] ^= 0xFF;
        }
    }
}

impl StoragePort for MockNvs {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let v = self.get(ns, key).ok_or(StorageError::NotFound)?;
        let n = v.len().min(buf.len());
        buf[..n].copy_from_slice(&v[..n]);
        Ok(n)
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::IoError);
        }
        self.writes += 1;
        self.data
            .insert((ns.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        self.data.remove(&(ns.to_string(), key.to_string()));
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.get(ns, key).is_some()
    }
}

// ── LogSink ───────────────────────────────────────────────────

/// Collects every emitted event.
#[derive(Default)]
pub struct LogSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl LogSink {
    pub fn brews(&self) -> Vec<crema::fsm::context::BrewSummary> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::BrewCompleted(s) => Some(*s),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for LogSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Wire capture ──────────────────────────────────────────────

/// Transport that keeps every written byte.
#[derive(Default)]
pub struct CaptureTransport {
    pub bytes: Vec<u8>,
}

impl Transport for CaptureTransport {
    type Error = ();

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        self.bytes.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub control: ControlLoop,
    pub hw: MockHardware,
    pub meter: SimPowerMeter,
    pub nvs: MockNvs,
    pub fw: MemoryFirmware,
    pub sink: LogSink,
    tx: RxProducer<'static>,
    rx: RxConsumer<'static>,
    wire: CaptureTransport,
    decoder: FrameDecoder,
    /// Every frame the device has sent, in order.
    pub sent: Vec<Frame>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with(SystemConfig::default(), MockNvs::default())
    }

    /// Boot a fresh control loop over `nvs` (restoring what it holds).
    pub fn with(config: SystemConfig, nvs: MockNvs) -> Self {
        let ring: &'static mut RxRing = Box::leak(Box::new(RxRing::new()));
        let (tx, rx) = ring.split();
        let hw = MockHardware::at_temperature(&config);
        let mut control = ControlLoop::new(config);
        let mut sink = LogSink::default();
        control.restore(&nvs);
        control.start(&mut sink);
        Self {
            control,
            hw,
            meter: SimPowerMeter::new(),
            nvs,
            fw: MemoryFirmware::new(),
            sink,
            tx,
            rx,
            wire: CaptureTransport::default(),
            decoder: FrameDecoder::new(),
            sent: Vec::new(),
        }
    }

    pub fn state(&self) -> StateId {
        self.control.app().state()
    }

    /// One control period, then flush and decode whatever was sent.
    pub fn tick(&mut self) {
        self.control.tick(
            &mut self.hw,
            &mut self.meter,
            &mut self.rx,
            &mut self.nvs,
            &mut self.fw,
            &mut self.sink,
        );
        self.control.flush(&mut self.wire);
        let bytes = std::mem::take(&mut self.wire.bytes);
        for frame in self.decoder.feed_slice(&bytes) {
            self.sent.push(frame.expect("device sent a bad frame"));
        }
    }

    /// One control period with nothing flushed; frames stay queued.
    pub fn tick_unflushed(&mut self) {
        self.control.tick(
            &mut self.hw,
            &mut self.meter,
            &mut self.rx,
            &mut self.nvs,
            &mut self.fw,
            &mut self.sink,
        );
    }

    pub fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// Tick until `state` is reached, up to `max` ticks.
    pub fn run_until(&mut self, state: StateId, max: usize) -> bool {
        for _ in 0..max {
            if self.state() == state {
                return true;
            }
            self.tick();
        }
        self.state() == state
    }

    pub fn inject_bytes(&mut self, bytes: &[u8]) {
        assert_eq!(self.tx.push_slice(bytes), bytes.len(), "rx ring full");
    }

    pub fn inject(&mut self, msg: &InboundMessage) {
        let bytes = msg.encode().unwrap().to_bytes();
        self.inject_bytes(&bytes);
    }

    /// Send one command and run the tick that handles it.  Returns the
    /// frames sent during that tick.
    pub fn command(&mut self, msg: &InboundMessage) -> Vec<Frame> {
        let before = self.sent.len();
        self.inject(msg);
        self.tick();
        self.sent[before..].to_vec()
    }

    /// Drive from boot to Ready with both boilers on target.
    pub fn to_ready(&mut self) {
        self.tick();
        assert_eq!(self.state(), StateId::Idle);
        let resp = self.command(&InboundMessage::PowerOn);
        assert!(is_ack(&resp, msg_type::POWER_ON), "PowerOn not acked: {resp:?}");
        assert!(self.run_until(StateId::Ready, 2_000), "never reached Ready");
    }
}

/// Frames of one type.
#[allow(dead_code)]
pub fn of_type(frames: &[Frame], ty: u8) -> Vec<&Frame> {
    frames.iter().filter(|f| f.msg_type == ty).collect()
}

#[allow(dead_code)]
pub fn is_ack(frames: &[Frame], ref_type: u8) -> bool {
    frames
        .iter()
        .any(|f| f.msg_type == msg_type::ACK && f.payload[..] == [ref_type])
}

/// Reason code of the `Rejected` answer to `ref_type`, if any.
#[allow(dead_code)]
pub fn rejection(frames: &[Frame], ref_type: u8) -> Option<u8> {
    frames
        .iter()
        .find(|f| f.msg_type == msg_type::REJECTED && f.payload[0] == ref_type)
        .map(|f| f.payload[1])
}
