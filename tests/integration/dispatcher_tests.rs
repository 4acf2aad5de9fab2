//! Command handling over the wire: acknowledgements, rejections with
//! reason codes, and firmware updates.

use crate::mock_hw::{Harness, is_ack, of_type, rejection};
use crema::alarms::AlarmCode;
use crema::config::PidGains;
use crema::control::boiler::BoilerId;
use crema::error::RejectReason;
use crema::fsm::StateId;
use crema::rpc::codec::Frame;
use crema::rpc::message::{InboundMessage, OTA_CHUNK_MAX, msg_type};

fn reason(r: RejectReason) -> Option<u8> {
    Some(r.code())
}

fn idle() -> Harness {
    let mut h = Harness::new();
    h.tick();
    assert_eq!(h.state(), StateId::Idle);
    h
}

// ── Plain commands ────────────────────────────────────────────

#[test]
fn request_status_answers_with_status_frame() {
    let mut h = idle();
    let resp = h.command(&InboundMessage::RequestStatus);
    let status = of_type(&resp, msg_type::STATUS);
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].payload[0], StateId::Idle as u8);
}

#[test]
fn unknown_type_is_unsupported() {
    let mut h = idle();
    let frame = Frame::new(0x7F, &[]).unwrap();
    h.inject_bytes(&frame.to_bytes());
    let before = h.sent.len();
    h.tick();
    let resp = &h.sent[before..];
    let unsupported = of_type(resp, msg_type::UNSUPPORTED);
    assert_eq!(unsupported.len(), 1);
    assert_eq!(unsupported[0].payload[..], [0x7F]);
    assert_eq!(h.control.dispatcher().rejected(), 1);
}

#[test]
fn short_setpoint_payload_is_malformed() {
    let mut h = idle();
    let frame = Frame::new(msg_type::SET_SETPOINT, &[0x00, 0x01]).unwrap();
    h.inject_bytes(&frame.to_bytes());
    let before = h.sent.len();
    h.tick();
    assert_eq!(
        rejection(&h.sent[before..], msg_type::SET_SETPOINT),
        reason(RejectReason::Malformed)
    );
    assert_eq!(h.control.app().config().brew_target_c, 93.0);
}

#[test]
fn setpoint_is_applied_and_persisted() {
    let mut h = idle();
    let resp = h.command(&InboundMessage::SetSetpoint {
        boiler: BoilerId(0),
        deci_c: 945,
    });
    assert!(is_ack(&resp, msg_type::SET_SETPOINT));
    assert!((h.control.app().config().brew_target_c - 94.5).abs() < 1e-3);

    let rebooted = Harness::with(Default::default(), h.nvs.clone());
    assert!((rebooted.control.app().config().brew_target_c - 94.5).abs() < 1e-3);
}

#[test]
fn setpoint_for_missing_boiler_rejected() {
    let mut h = idle();
    let resp = h.command(&InboundMessage::SetSetpoint {
        boiler: BoilerId(7),
        deci_c: 930,
    });
    assert_eq!(
        rejection(&resp, msg_type::SET_SETPOINT),
        reason(RejectReason::UnknownBoiler)
    );
}

#[test]
fn setpoint_above_range_rejected() {
    let mut h = idle();
    let resp = h.command(&InboundMessage::SetSetpoint {
        boiler: BoilerId(0),
        deci_c: 2_500,
    });
    assert_eq!(
        rejection(&resp, msg_type::SET_SETPOINT),
        reason(RejectReason::OutOfRange)
    );
    // Under 200 but over the brew ceiling.
    let resp = h.command(&InboundMessage::SetSetpoint {
        boiler: BoilerId(0),
        deci_c: 1_250,
    });
    assert_eq!(
        rejection(&resp, msg_type::SET_SETPOINT),
        reason(RejectReason::OutOfRange)
    );
    assert_eq!(h.control.app().config().brew_target_c, 93.0);
}

#[test]
fn setpoint_not_applied_when_flash_fails() {
    let mut h = idle();
    h.nvs.fail_writes = true;
    let resp = h.command(&InboundMessage::SetSetpoint {
        boiler: BoilerId(0),
        deci_c: 950,
    });
    assert_eq!(
        rejection(&resp, msg_type::SET_SETPOINT),
        reason(RejectReason::Storage)
    );
    assert_eq!(h.control.app().config().brew_target_c, 93.0);
    assert!(
        of_type(&resp, msg_type::ALARM)
            .iter()
            .any(|f| f.payload[0] == AlarmCode::StorageFault.code())
    );
}

#[test]
fn pid_gains_validated() {
    let mut h = idle();
    let good = PidGains {
        kp: 3.0,
        ki: 0.2,
        kd: 1.0,
    };
    let resp = h.command(&InboundMessage::SetPidGains {
        boiler: BoilerId(1),
        gains: good,
    });
    assert!(is_ack(&resp, msg_type::SET_PID_GAINS));
    assert_eq!(h.control.app().config().steam_pid, good);

    let resp = h.command(&InboundMessage::SetPidGains {
        boiler: BoilerId(0),
        gains: PidGains {
            kp: f32::NAN,
            ..good
        },
    });
    assert_eq!(
        rejection(&resp, msg_type::SET_PID_GAINS),
        reason(RejectReason::OutOfRange)
    );
}

#[test]
fn unknown_alarm_ack_rejected() {
    let mut h = idle();
    let resp = h.command(&InboundMessage::AlarmAck(0x99));
    assert_eq!(
        rejection(&resp, msg_type::ALARM_ACK),
        reason(RejectReason::UnknownAlarm)
    );
    // Known code, but nothing raised.
    let resp = h.command(&InboundMessage::AlarmAck(AlarmCode::OverPressure.code()));
    assert_eq!(
        rejection(&resp, msg_type::ALARM_ACK),
        reason(RejectReason::UnknownAlarm)
    );
}

#[test]
fn power_off_from_heating_returns_to_idle() {
    let mut h = idle();
    h.hw.temps = [Some(40.0), Some(40.0)];
    h.command(&InboundMessage::PowerOn);
    h.tick();
    assert_eq!(h.state(), StateId::Heating);
    assert!(h.hw.any_heater_on());

    let resp = h.command(&InboundMessage::PowerOff);
    assert!(is_ack(&resp, msg_type::POWER_OFF));
    h.tick();
    assert_eq!(h.state(), StateId::Idle);
    assert!(!h.hw.any_heater_on());
}

#[test]
fn wake_leaves_sleep() {
    let cfg = crema::config::SystemConfig {
        idle_timeout_ms: 500,
        ..Default::default()
    };
    let mut h = Harness::with(cfg, Default::default());
    h.tick();
    assert!(h.run_until(StateId::Sleep, 100));
    let resp = h.command(&InboundMessage::Wake);
    assert!(is_ack(&resp, msg_type::WAKE));
    assert_eq!(h.state(), StateId::Idle);
}

// ── Firmware update ───────────────────────────────────────────

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn chunk_msg(seq: u16, offset: usize, data: &[u8]) -> InboundMessage {
    InboundMessage::OtaChunk {
        seq,
        offset: offset as u32,
        data: heapless::Vec::from_slice(data).unwrap(),
    }
}

/// Stream `img` chunk by chunk, asserting every chunk is acknowledged.
fn send_image(h: &mut Harness, img: &[u8]) {
    for (seq, chunk) in img.chunks(OTA_CHUNK_MAX).enumerate() {
        let resp = h.command(&chunk_msg(seq as u16, seq * OTA_CHUNK_MAX, chunk));
        let progress = of_type(&resp, msg_type::OTA_PROGRESS);
        assert_eq!(progress.len(), 1, "chunk {seq} not acknowledged");
        let next = u16::from_le_bytes([progress[0].payload[0], progress[0].payload[1]]);
        assert_eq!(usize::from(next), seq + 1);
    }
}

#[test]
fn ota_full_transfer_commits_and_requests_reboot() {
    let mut h = idle();
    let img = image(1_000);

    let resp = h.command(&InboundMessage::OtaBegin {
        image_size: img.len() as u32,
    });
    assert!(is_ack(&resp, msg_type::OTA_BEGIN));
    assert!(h.control.ota().is_active());
    assert!(h.fw.is_staging());

    send_image(&mut h, &img);

    let sha256 = hmac_sha256::Hash::hash(&img);
    let resp = h.command(&InboundMessage::OtaComplete { sha256 });
    assert!(is_ack(&resp, msg_type::OTA_COMPLETE));
    assert!(h.control.reboot_pending());
    assert_eq!(h.fw.committed(), Some(&img[..]));
}

#[test]
fn ota_duplicate_chunk_reacknowledged() {
    let mut h = idle();
    let img = image(500);
    h.command(&InboundMessage::OtaBegin { image_size: 500 });

    let first = h.command(&chunk_msg(0, 0, &img[..OTA_CHUNK_MAX]));
    let again = h.command(&chunk_msg(0, 0, &img[..OTA_CHUNK_MAX]));
    let p1 = of_type(&first, msg_type::OTA_PROGRESS)[0].payload.clone();
    let p2 = of_type(&again, msg_type::OTA_PROGRESS)[0].payload.clone();
    assert_eq!(p1, p2);

    // The transfer carries on as if the retry never happened.
    let resp = h.command(&chunk_msg(1, OTA_CHUNK_MAX, &img[OTA_CHUNK_MAX..2 * OTA_CHUNK_MAX]));
    assert_eq!(of_type(&resp, msg_type::OTA_PROGRESS).len(), 1);
    let resp = h.command(&chunk_msg(2, 2 * OTA_CHUNK_MAX, &img[2 * OTA_CHUNK_MAX..]));
    assert_eq!(of_type(&resp, msg_type::OTA_PROGRESS).len(), 1);

    let resp = h.command(&InboundMessage::OtaComplete {
        sha256: hmac_sha256::Hash::hash(&img),
    });
    assert!(is_ack(&resp, msg_type::OTA_COMPLETE));
    assert_eq!(h.fw.committed(), Some(&img[..]));
}

#[test]
fn machine_commands_refused_while_updating() {
    let mut h = idle();
    h.command(&InboundMessage::OtaBegin { image_size: 4_096 });

    let resp = h.command(&InboundMessage::PowerOn);
    assert_eq!(rejection(&resp, msg_type::POWER_ON), reason(RejectReason::OtaBusy));
    let resp = h.command(&InboundMessage::StartBrew);
    assert_eq!(rejection(&resp, msg_type::START_BREW), reason(RejectReason::OtaBusy));
    assert_eq!(h.state(), StateId::Idle);
    assert!(!h.hw.any_heater_on());
    assert_eq!(h.hw.pump, 0.0);

    // Status requests still work.
    let resp = h.command(&InboundMessage::RequestStatus);
    assert_eq!(of_type(&resp, msg_type::STATUS).len(), 1);
}

#[test]
fn ota_refused_outside_idle() {
    let mut h = Harness::new();
    h.to_ready();
    let resp = h.command(&InboundMessage::OtaBegin { image_size: 1_024 });
    assert_eq!(
        rejection(&resp, msg_type::OTA_BEGIN),
        reason(RejectReason::InvalidState)
    );
    assert!(!h.control.ota().is_active());
}

#[test]
fn ota_chunk_without_session_rejected() {
    let mut h = idle();
    let resp = h.command(&chunk_msg(0, 0, &[1, 2, 3]));
    assert_eq!(
        rejection(&resp, msg_type::OTA_CHUNK),
        reason(RejectReason::OtaNotActive)
    );
}

#[test]
fn ota_checksum_mismatch_discards_image() {
    let mut h = idle();
    let img = image(300);
    h.command(&InboundMessage::OtaBegin { image_size: 300 });
    send_image(&mut h, &img);

    let mut wrong = hmac_sha256::Hash::hash(&img);
    wrong[0] ^= 0xFF;
    let resp = h.command(&InboundMessage::OtaComplete { sha256: wrong });
    assert_eq!(
        rejection(&resp, msg_type::OTA_COMPLETE),
        reason(RejectReason::OtaChecksum)
    );
    assert!(!h.control.reboot_pending());
    assert!(h.fw.committed().is_none());
    assert!(!h.fw.is_staging());
    assert!(
        of_type(&resp, msg_type::ALARM)
            .iter()
            .any(|f| f.payload[0] == AlarmCode::OtaFailed.code())
    );

    // A fresh begin clears the warning.
    h.command(&InboundMessage::OtaBegin { image_size: 300 });
    assert!(h.control.app().alarm(AlarmCode::OtaFailed).is_none());
}

#[test]
fn ota_sequence_gap_aborts_session() {
    let mut h = idle();
    let img = image(600);
    h.command(&InboundMessage::OtaBegin { image_size: 600 });
    h.command(&chunk_msg(0, 0, &img[..OTA_CHUNK_MAX]));
    let resp = h.command(&chunk_msg(2, 2 * OTA_CHUNK_MAX, &img[2 * OTA_CHUNK_MAX..]));
    assert_eq!(
        rejection(&resp, msg_type::OTA_CHUNK),
        reason(RejectReason::OtaSequence)
    );
    assert!(!h.control.ota().is_active());
    assert!(!h.fw.is_staging());
}

#[test]
fn ota_stalls_out_after_chunk_timeout() {
    let mut h = idle();
    h.command(&InboundMessage::OtaBegin { image_size: 2_048 });
    // 5 s chunk timeout at 10 ms per tick.
    h.ticks(499);
    assert!(h.control.ota().is_active());
    h.ticks(5);
    assert!(!h.control.ota().is_active());
    assert!(!h.fw.is_staging());
    assert!(h.control.app().alarm(AlarmCode::OtaFailed).is_some());
}

#[test]
fn ota_abort_acknowledged_then_not_active() {
    let mut h = idle();
    h.command(&InboundMessage::OtaBegin { image_size: 2_048 });
    let resp = h.command(&InboundMessage::OtaAbort);
    assert!(is_ack(&resp, msg_type::OTA_ABORT));
    let resp = h.command(&InboundMessage::OtaAbort);
    assert_eq!(
        rejection(&resp, msg_type::OTA_ABORT),
        reason(RejectReason::OtaNotActive)
    );
}
