//! End-to-end control loop scenarios: hub frames in, outputs and
//! response frames out.

use crate::mock_hw::{Harness, MockNvs, is_ack, of_type, rejection};
use crema::alarms::AlarmCode;
use crema::app::events::AppEvent;
use crema::app::ports::SchedulerDelegate;
use crema::config::SystemConfig;
use crema::control::boiler::BoilerId;
use crema::error::RejectReason;
use crema::fsm::{StateId, StopReason};
use crema::rpc::codec::{Frame, FrameDecoder};
use crema::rpc::message::{InboundMessage, msg_type};
use crema::rpc::transport::Transport;
use crema::scheduler::{Scheduler, WallTime};

#[test]
fn boots_into_idle_with_outputs_off() {
    let mut h = Harness::new();
    h.tick();
    assert_eq!(h.state(), StateId::Idle);
    assert!(!h.hw.any_heater_on());
    assert_eq!(h.hw.pump, 0.0);
    assert!(!h.hw.valve);
    // The state change is streamed right away.
    assert!(!of_type(&h.sent, msg_type::STATUS).is_empty());
}

#[test]
fn brew_shot_duration_and_counter_survive_power_cycle() {
    let mut h = Harness::new();
    h.to_ready();

    let resp = h.command(&InboundMessage::StartBrew);
    assert!(is_ack(&resp, msg_type::START_BREW));
    assert_eq!(h.state(), StateId::Brewing);
    // Outputs follow on the next tick.
    h.tick();
    assert!(h.hw.pump > 0.0);
    assert!(h.hw.valve);

    // StopBrew lands 2840 ticks (28.4 s) after StartBrew.
    h.ticks(2_838);
    let resp = h.command(&InboundMessage::StopBrew(StopReason::User));
    assert!(is_ack(&resp, msg_type::STOP_BREW));
    assert_eq!(h.state(), StateId::Ready);

    // Published (and persisted) on the following tick.
    h.tick();
    assert_eq!(h.hw.pump, 0.0);
    assert!(!h.hw.valve);
    let brews = h.sink.brews();
    assert_eq!(brews.len(), 1);
    assert_eq!(brews[0].duration_ms, 28_400);
    assert!(brews[0].counted);

    let frames = of_type(&h.sent, msg_type::BREW_COMPLETED);
    assert_eq!(frames.len(), 1);
    assert_eq!(
        u32::from_le_bytes(frames[0].payload[..4].try_into().unwrap()),
        28_400
    );
    assert_eq!(h.control.app().maintenance().shots_since_backflush, 1);

    // Power cycle.
    let rebooted = Harness::with(SystemConfig::default(), h.nvs.clone());
    let m = rebooted.control.app().maintenance();
    assert_eq!(m.shots_since_backflush, 1);
    assert_eq!(m.shots_since_group_clean, 1);
    assert_eq!(m.shots_since_descale, 1);
}

#[test]
fn start_brew_rejected_in_idle_and_nothing_moves() {
    let mut h = Harness::new();
    h.tick();
    let resp = h.command(&InboundMessage::StartBrew);
    assert_eq!(
        rejection(&resp, msg_type::START_BREW),
        Some(RejectReason::InvalidState.code())
    );
    assert_eq!(h.state(), StateId::Idle);
    assert_eq!(h.hw.pump, 0.0);
    assert!(!h.hw.valve);
    assert!(h.sink.events.iter().any(|e| matches!(
        e,
        AppEvent::CommandRejected {
            state: StateId::Idle,
            ..
        }
    )));
}

#[test]
fn empty_tank_rejects_brew_with_interlock() {
    let mut h = Harness::new();
    h.to_ready();
    h.hw.tank_ok = false;
    h.tick();
    let resp = h.command(&InboundMessage::StartBrew);
    assert_eq!(
        rejection(&resp, msg_type::START_BREW),
        Some(RejectReason::Interlock.code())
    );
    assert_eq!(h.hw.pump, 0.0);
}

/// Drive a fresh harness into `state`.
fn harness_in(state: StateId) -> Harness {
    let mut cfg = SystemConfig::default();
    if state == StateId::Sleep {
        cfg.idle_timeout_ms = 1_000;
    }
    let mut h = Harness::with(cfg, MockNvs::default());
    match state {
        StateId::Idle => h.tick(),
        StateId::Heating => {
            h.hw.temps = [Some(60.0), Some(60.0)];
            h.tick();
            h.command(&InboundMessage::PowerOn);
        }
        StateId::Ready => h.to_ready(),
        StateId::Brewing => {
            h.to_ready();
            h.command(&InboundMessage::StartBrew);
        }
        StateId::Steaming => {
            h.to_ready();
            h.command(&InboundMessage::StartSteam);
        }
        StateId::Backflush => {
            h.to_ready();
            h.command(&InboundMessage::StartBackflush);
        }
        StateId::Sleep => {
            h.tick();
            assert!(h.run_until(StateId::Sleep, 200));
        }
        StateId::Init | StateId::Alarm => unreachable!(),
    }
    assert_eq!(h.state(), state);
    h
}

#[test]
fn over_temperature_cuts_everything_in_every_state() {
    for state in [
        StateId::Idle,
        StateId::Heating,
        StateId::Ready,
        StateId::Brewing,
        StateId::Steaming,
        StateId::Backflush,
        StateId::Sleep,
    ] {
        let mut h = harness_in(state);
        h.hw.temps[0] = Some(150.0);
        h.tick();

        assert_eq!(h.state(), StateId::Alarm, "from {state:?}");
        assert!(!h.hw.any_heater_on(), "heaters on after over-temp in {state:?}");
        assert_eq!(h.hw.pump, 0.0, "pump on after over-temp in {state:?}");
        assert!(!h.hw.valve, "valve open after over-temp in {state:?}");
        let alarms = of_type(&h.sent, msg_type::ALARM);
        assert!(
            alarms
                .iter()
                .any(|f| f.payload[0] == AlarmCode::BrewOverTemp.code()),
            "no alarm frame from {state:?}"
        );
    }
}

#[test]
fn alarm_needs_cool_down_and_acknowledgement() {
    let mut h = harness_in(StateId::Ready);
    h.hw.temps[0] = Some(150.0);
    h.tick();
    assert_eq!(h.state(), StateId::Alarm);

    // Still hot: acknowledging alone does not leave Alarm.
    h.command(&InboundMessage::AlarmAck(AlarmCode::BrewOverTemp.code()));
    h.ticks(5);
    assert_eq!(h.state(), StateId::Alarm);

    h.hw.temps[0] = Some(93.0);
    h.ticks(5);
    assert_eq!(h.state(), StateId::Idle);
    assert!(h.control.app().alarm(AlarmCode::BrewOverTemp).is_none());
    assert!(!h.hw.any_heater_on());
}

#[test]
fn open_probe_is_a_sensor_fault() {
    let mut h = harness_in(StateId::Heating);
    h.hw.temps[0] = None;
    h.tick();
    assert_eq!(h.state(), StateId::Alarm);
    assert_eq!(h.hw.heater_duty(BoilerId(0)), 0.0);
    assert!(h.control.app().alarm(AlarmCode::BrewTempSensor).is_some());
}

#[test]
fn corrupted_frame_is_skipped_and_next_frame_applied() {
    let mut h = Harness::new();
    h.tick();

    let mut bad = InboundMessage::PowerOff.encode().unwrap().to_bytes();
    let last = bad.len() - 1;
    bad[last] ^= 0x01;
    let good = InboundMessage::PowerOn.encode().unwrap().to_bytes();

    let before = h.sent.len();
    h.inject_bytes(&bad);
    h.inject_bytes(&good);
    h.tick();
    let resp = &h.sent[before..];

    assert!(is_ack(resp, msg_type::POWER_ON));
    assert!(!is_ack(resp, msg_type::POWER_OFF));
    assert_eq!(h.control.link().total_errors(), 1);
    assert_eq!(h.control.dispatcher().handled(), 1);
    assert_eq!(h.state(), StateId::Heating);
}

#[test]
fn noisy_link_raises_then_clears_degraded_warning() {
    let mut h = Harness::new();
    h.tick();

    let mut bad = InboundMessage::RequestStatus.encode().unwrap().to_bytes();
    let last = bad.len() - 1;
    bad[last] ^= 0x01;
    for _ in 0..25 {
        h.inject_bytes(&bad);
    }
    h.tick();
    assert!(h.control.link().is_degraded());
    assert!(h.control.app().alarm(AlarmCode::LinkDegraded).is_some());
    // A warning never stops the machine.
    assert_eq!(h.state(), StateId::Idle);

    // One full quiet window after the noisy one.
    h.ticks(1_100);
    assert!(!h.control.link().is_degraded());
    assert!(h.control.app().alarm(AlarmCode::LinkDegraded).is_none());
}

#[test]
fn frame_budget_defers_excess_frames() {
    let mut h = Harness::new();
    h.tick();
    for _ in 0..6 {
        h.inject(&InboundMessage::RequestStatus);
    }
    h.tick();
    assert_eq!(h.control.dispatcher().handled(), 4);
    h.tick();
    assert_eq!(h.control.dispatcher().handled(), 6);
}

#[test]
fn status_streams_at_configured_interval() {
    let mut h = Harness::new();
    h.tick();
    let start = of_type(&h.sent, msg_type::STATUS).len();
    // 1 s interval at 10 ms per tick.
    h.ticks(300);
    let streamed = of_type(&h.sent, msg_type::STATUS).len() - start;
    assert!((2..=4).contains(&streamed), "{streamed} status frames in 3 s");
}

#[test]
fn wake_schedule_heats_idle_machine() {
    let mut cfg = SystemConfig::default();
    cfg.wake_hours.push(7).unwrap();
    let mut scheduler = Scheduler::from_config(&cfg);
    let mut h = Harness::with(cfg, MockNvs::default());
    h.hw.temps = [Some(20.0), Some(20.0)];
    h.tick();

    scheduler.tick(Some(WallTime { day: 1, hour: 6 }), &mut h.control);
    h.tick();
    assert_eq!(h.state(), StateId::Idle);

    scheduler.tick(Some(WallTime { day: 1, hour: 7 }), &mut h.control);
    h.tick();
    assert_eq!(h.state(), StateId::Heating);
    assert!(h.hw.heater_duty(BoilerId(0)) > 0.0);
}

#[test]
fn schedule_ignored_while_brewing() {
    let mut h = harness_in(StateId::Brewing);
    h.control.on_schedule_fired("wake 1");
    h.tick();
    assert_eq!(h.state(), StateId::Brewing);
}

#[test]
fn wake_slot_during_update_leaves_transfer_running() {
    let mut h = Harness::new();
    h.hw.temps = [Some(20.0), Some(20.0)];
    h.tick();
    let resp = h.command(&InboundMessage::OtaBegin { image_size: 4_096 });
    assert!(is_ack(&resp, msg_type::OTA_BEGIN));

    h.control.on_schedule_fired("wake 1");
    h.ticks(5);
    assert_eq!(h.state(), StateId::Idle);
    assert!(h.control.ota().is_active());
    assert!(!h.hw.any_heater_on());
}

// ── Transmit path ─────────────────────────────────────────────

/// Accepts at most `limit` bytes per write, or fails every write.
struct Trickle {
    limit: usize,
    fail: bool,
    bytes: Vec<u8>,
}

impl Trickle {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            fail: false,
            bytes: Vec::new(),
        }
    }

    fn frames(&self) -> Vec<Frame> {
        FrameDecoder::new()
            .feed_slice(&self.bytes)
            .into_iter()
            .map(|r| r.expect("frame corrupted on the wire"))
            .collect()
    }
}

impl Transport for Trickle {
    type Error = ();

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        if self.fail {
            return Err(());
        }
        let n = data.len().min(self.limit);
        self.bytes.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }
}

/// Boot, then queue three status replies without sending them.
fn queued_status_replies() -> (Harness, usize) {
    let mut h = Harness::new();
    h.tick();
    for _ in 0..3 {
        h.inject(&InboundMessage::RequestStatus);
    }
    h.tick_unflushed();
    let queued = h.control.outbound().len();
    assert!(queued >= 3, "{queued} frames queued");
    (h, queued)
}

#[test]
fn short_writes_resume_where_they_stopped() {
    let (mut h, queued) = queued_status_replies();
    let mut wire = Trickle::new(7);
    let mut completed = 0;
    for _ in 0..1_000 {
        completed += h.control.flush(&mut wire);
        if h.control.outbound().is_empty() && h.control.tx_backlog() == 0 {
            break;
        }
    }
    assert_eq!(completed, queued);
    let frames = wire.frames();
    assert_eq!(frames.len(), queued);
    assert!(of_type(&frames, msg_type::STATUS).len() >= 3);
    assert_eq!(h.control.tx_lost(), 0);
}

#[test]
fn write_error_counts_the_lost_frame() {
    let (mut h, queued) = queued_status_replies();
    let mut wire = Trickle::new(usize::MAX);
    wire.fail = true;
    assert_eq!(h.control.flush(&mut wire), 0);
    assert_eq!(h.control.tx_lost(), 1);
    assert_eq!(h.control.tx_backlog(), 0);

    // The rest still go out whole.
    wire.fail = false;
    assert_eq!(h.control.flush(&mut wire), queued - 1);
    assert_eq!(wire.frames().len(), queued - 1);
}

#[test]
fn mains_reading_streams_and_overdraw_raises_warning() {
    use crema::app::ports::PowerReading;

    let mut h = Harness::new();
    h.tick();
    let reading = |current_a: f32| PowerReading {
        voltage_v: 229.8,
        current_a,
        power_w: 229.8 * current_a,
        energy_wh: 0,
        frequency_hz: 50.0,
        power_factor: 1.0,
    };

    // Default budget is 16 A with 5 % headroom.
    h.meter.set(Some(reading(17.5)));
    let resp = h.command(&InboundMessage::RequestStatus);
    let status = &of_type(&resp, msg_type::STATUS)[0].payload;
    // Two boilers put the mains fields at 23..29.
    assert_eq!(u16::from_le_bytes([status[23], status[24]]), 2298);
    assert_eq!(u16::from_le_bytes([status[25], status[26]]), 17_500);
    assert!(status[30..].contains(&AlarmCode::PowerOverBudget.code()));
    assert!(h.control.app().alarm(AlarmCode::PowerOverBudget).is_some_and(|r| r.active));
    // A warning only: heating stays allowed.
    assert_eq!(h.state(), StateId::Idle);

    // Inside the budget but above the clear ratio: still latched.
    h.meter.set(Some(reading(14.8)));
    h.tick();
    assert!(h.control.app().alarm(AlarmCode::PowerOverBudget).is_some_and(|r| r.active));

    h.meter.set(Some(reading(4.0)));
    h.tick();
    assert!(!h.control.app().alarm(AlarmCode::PowerOverBudget).is_some_and(|r| r.active));

    h.meter.set(None);
    let resp = h.command(&InboundMessage::RequestStatus);
    let status = &of_type(&resp, msg_type::STATUS)[0].payload;
    assert_eq!(&status[23..29], &[0xFF; 6]);
}
