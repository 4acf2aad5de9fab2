//! Shot counting, cleaning reminders and counter durability.

use crate::mock_hw::{Harness, MockNvs, is_ack, of_type};
use crema::alarms::{AlarmCode, Severity};
use crema::app::service::MAINT_NAMESPACE;
use crema::config::SystemConfig;
use crema::fsm::{StateId, StopReason};
use crema::rpc::message::{InboundMessage, msg_type};

/// Pull one shot lasting `ticks` control periods, then run the tick that
/// publishes it.
fn pull_shot(h: &mut Harness, ticks: usize) {
    let resp = h.command(&InboundMessage::StartBrew);
    assert!(is_ack(&resp, msg_type::START_BREW));
    h.ticks(ticks.saturating_sub(1));
    h.command(&InboundMessage::StopBrew(StopReason::TargetWeight));
    assert_eq!(h.state(), StateId::Ready);
    h.tick();
}

fn ready_with(cfg: SystemConfig, nvs: MockNvs) -> Harness {
    let mut h = Harness::with(cfg, nvs);
    h.to_ready();
    h
}

#[test]
fn short_shot_reported_but_not_counted() {
    let mut h = ready_with(SystemConfig::default(), MockNvs::default());
    pull_shot(&mut h, 500);

    let brews = h.sink.brews();
    assert_eq!(brews.len(), 1);
    assert_eq!(brews[0].duration_ms, 5_000);
    assert!(!brews[0].counted);
    assert_eq!(of_type(&h.sent, msg_type::BREW_COMPLETED).len(), 1);
    assert_eq!(h.control.app().maintenance().shots_since_backflush, 0);
    assert!(h.nvs.get(MAINT_NAMESPACE, "commit").is_none());
}

#[test]
fn backflush_reminder_raised_and_cleared() {
    let cfg = SystemConfig {
        backflush_threshold: 1,
        ..Default::default()
    };
    let mut h = ready_with(cfg, MockNvs::default());
    pull_shot(&mut h, 1_600);

    let rec = h.control.app().alarm(AlarmCode::BackflushDue).copied();
    assert!(rec.is_some_and(|r| r.active && r.severity == Severity::Info));
    assert!(
        of_type(&h.sent, msg_type::ALARM)
            .iter()
            .any(|f| f.payload[0] == AlarmCode::BackflushDue.code())
    );
    // A reminder never interrupts the machine.
    assert_eq!(h.state(), StateId::Ready);

    let resp = h.command(&InboundMessage::MaintenanceDone(0));
    assert!(is_ack(&resp, msg_type::MAINTENANCE_DONE));
    assert!(h.control.app().alarm(AlarmCode::BackflushDue).is_none());
    let m = *h.control.app().maintenance();
    assert_eq!(m.shots_since_backflush, 0);
    assert_eq!(m.shots_since_group_clean, 1);

    // The reset survives a power cycle.
    let rebooted = Harness::with(SystemConfig::default(), h.nvs.clone());
    let m = rebooted.control.app().maintenance();
    assert_eq!(m.shots_since_backflush, 0);
    assert_eq!(m.shots_since_group_clean, 1);
    assert_eq!(m.shots_since_descale, 1);
}

#[test]
fn maintenance_done_all_and_unknown_kind() {
    let mut h = ready_with(SystemConfig::default(), MockNvs::default());
    pull_shot(&mut h, 1_600);
    pull_shot(&mut h, 1_600);
    assert_eq!(h.control.app().maintenance().shots_since_descale, 2);

    let resp = h.command(&InboundMessage::MaintenanceDone(0x05));
    assert_eq!(
        crate::mock_hw::rejection(&resp, msg_type::MAINTENANCE_DONE),
        Some(crema::error::RejectReason::OutOfRange.code())
    );
    assert_eq!(h.control.app().maintenance().shots_since_descale, 2);

    let resp = h.command(&InboundMessage::MaintenanceDone(0xFF));
    assert!(is_ack(&resp, msg_type::MAINTENANCE_DONE));
    let m = h.control.app().maintenance();
    assert_eq!(
        (m.shots_since_backflush, m.shots_since_group_clean, m.shots_since_descale),
        (0, 0, 0)
    );
}

#[test]
fn corrupted_latest_slot_falls_back_to_previous_record() {
    let mut h = ready_with(SystemConfig::default(), MockNvs::default());
    pull_shot(&mut h, 1_600); // seq 1 → slot_a
    pull_shot(&mut h, 1_600); // seq 2 → slot_b
    assert_eq!(h.control.app().maintenance().shots_since_backflush, 2);

    let mut nvs = h.nvs.clone();
    nvs.corrupt(MAINT_NAMESPACE, "slot_b", 9);
    let rebooted = Harness::with(SystemConfig::default(), nvs);
    assert_eq!(rebooted.control.app().maintenance().shots_since_backflush, 1);
}

#[test]
fn failed_save_retries_until_flash_recovers() {
    let mut h = ready_with(SystemConfig::default(), MockNvs::default());
    h.nvs.fail_writes = true;
    pull_shot(&mut h, 1_600);

    assert!(h.control.app().alarm(AlarmCode::StorageFault).is_some());
    assert!(h.nvs.get(MAINT_NAMESPACE, "commit").is_none());
    // Counting carries on in RAM.
    assert_eq!(h.control.app().maintenance().shots_since_backflush, 1);

    h.nvs.fail_writes = false;
    // Retried 5 s after the failure.
    h.ticks(501);
    assert!(h.control.app().alarm(AlarmCode::StorageFault).is_none());
    let rebooted = Harness::with(SystemConfig::default(), h.nvs.clone());
    assert_eq!(rebooted.control.app().maintenance().shots_since_backflush, 1);
}
