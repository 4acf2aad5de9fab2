//! Command dispatcher: applies validated hub frames to the [`AppService`].
//!
//! Every inbound frame gets exactly one response on the outbound queue:
//!
//! | outcome                | response                          |
//! |------------------------|-----------------------------------|
//! | applied                | `Ack`, `Status` or `OtaProgress`  |
//! | refused                | `Rejected{ref_type, reason}`      |
//! | unknown message type   | `Unsupported{ref_type}`           |
//! | payload does not parse | `Rejected{reason: Malformed}`     |
//!
//! A refusal never changes machine state.  Events the service emits while
//! handling a command reach both the log sink and the outbound queue.

use log::{debug, info, warn};

use crate::alarms::{AlarmCode, Severity};
use crate::app::ports::{EventSink, FirmwarePort, StoragePort, Tee};
use crate::app::service::AppService;
use crate::error::{Error, LinkError, OtaError, RejectReason};
use crate::fsm::{MachineEvent, StateId};
use crate::rpc::codec::Frame;
use crate::rpc::message::{InboundMessage, OutboundMessage, deci_to_celsius};
use crate::rpc::ota::{OtaProgress, OtaSession};
use crate::rpc::outbound::OutboundQueue;

/// Everything a command may touch besides the service itself.
pub struct LinkIo<'a, S: EventSink, St: StoragePort, F: FirmwarePort> {
    pub sink: &'a mut S,
    pub storage: &'a mut St,
    pub firmware: &'a mut F,
    pub ota: &'a mut OtaSession,
    pub outbound: &'a mut OutboundQueue,
}

/// What a successfully applied command answers with.
enum Reply {
    Ack,
    Status,
    Progress(OtaProgress),
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    handled: u32,
    rejected: u32,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames dispatched since boot.
    pub fn handled(&self) -> u32 {
        self.handled
    }

    /// Frames answered with `Rejected` or `Unsupported`.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Decode `frame`, apply it and queue the response.
    pub fn dispatch<S: EventSink, St: StoragePort, F: FirmwarePort>(
        &mut self,
        frame: &Frame,
        app: &mut AppService,
        io: &mut LinkIo<'_, S, St, F>,
    ) -> Result<(), Error> {
        self.handled = self.handled.wrapping_add(1);
        let ref_type = frame.msg_type;

        let msg = match InboundMessage::decode(frame) {
            Ok(msg) => msg,
            Err(LinkError::UnsupportedType(t)) => {
                warn!("RPC: unsupported message type 0x{:02X}", t);
                self.rejected = self.rejected.wrapping_add(1);
                respond(io.outbound, &OutboundMessage::Unsupported { ref_type });
                return Err(Error::Link(LinkError::UnsupportedType(t)));
            }
            Err(e) => {
                warn!("RPC: 0x{:02X} rejected: {}", ref_type, e);
                return Err(self.reject(io.outbound, ref_type, RejectReason::Malformed));
            }
        };

        match apply(msg, app, io) {
            Ok(Reply::Ack) => {
                respond(io.outbound, &OutboundMessage::Ack { ref_type });
                Ok(())
            }
            Ok(Reply::Status) => {
                let report = app.status_report(io.ota.is_active());
                respond(io.outbound, &OutboundMessage::Status(report));
                Ok(())
            }
            Ok(Reply::Progress(p)) => {
                respond(
                    io.outbound,
                    &OutboundMessage::OtaProgress {
                        next_seq: p.next_seq,
                        bytes_received: p.bytes_received,
                    },
                );
                Ok(())
            }
            Err(reason) => {
                info!("RPC: 0x{:02X} rejected in {:?}: {}", ref_type, app.state(), reason);
                Err(self.reject(io.outbound, ref_type, reason))
            }
        }
    }

    fn reject(&mut self, outbound: &mut OutboundQueue, ref_type: u8, reason: RejectReason) -> Error {
        self.rejected = self.rejected.wrapping_add(1);
        respond(outbound, &OutboundMessage::Rejected { ref_type, reason });
        Error::Rejected(reason)
    }
}

fn respond(outbound: &mut OutboundQueue, msg: &OutboundMessage) {
    if let Err(e) = outbound.push_message(msg) {
        debug!("RPC: response 0x{:02X} not queued: {}", msg.msg_type(), e);
    }
}

fn apply<S: EventSink, St: StoragePort, F: FirmwarePort>(
    msg: InboundMessage,
    app: &mut AppService,
    io: &mut LinkIo<'_, S, St, F>,
) -> Result<Reply, RejectReason> {
    let ota_active = io.ota.is_active();
    let now_ms = app.now_ms();
    let storage = &mut *io.storage;
    let firmware = &mut *io.firmware;
    let ota = &mut *io.ota;
    let mut sink = Tee(&mut *io.sink, &mut *io.outbound);

    // Nothing may start the pump or heat up while an image is streaming.
    let busy = |starts_machine: bool| {
        if ota_active && starts_machine {
            Err(RejectReason::OtaBusy)
        } else {
            Ok(())
        }
    };

    match msg {
        InboundMessage::SetSetpoint { boiler, deci_c } => {
            app.set_setpoint(boiler, deci_to_celsius(deci_c), storage, &mut sink)?;
            Ok(Reply::Ack)
        }
        InboundMessage::SetPidGains { boiler, gains } => {
            app.set_pid_gains(boiler, gains, storage, &mut sink)?;
            Ok(Reply::Ack)
        }
        InboundMessage::StartBrew => {
            busy(true)?;
            machine(app, MachineEvent::StartBrew, &mut sink)
        }
        InboundMessage::StopBrew(reason) => machine(app, MachineEvent::StopBrew(reason), &mut sink),
        InboundMessage::StartSteam => {
            busy(true)?;
            machine(app, MachineEvent::StartSteam, &mut sink)
        }
        InboundMessage::StopSteam => machine(app, MachineEvent::StopSteam, &mut sink),
        InboundMessage::StartBackflush => {
            busy(true)?;
            machine(app, MachineEvent::StartBackflush, &mut sink)
        }
        InboundMessage::StopBackflush => machine(app, MachineEvent::StopBackflush, &mut sink),
        InboundMessage::PowerOn => {
            busy(true)?;
            machine(app, MachineEvent::PowerOn, &mut sink)
        }
        InboundMessage::PowerOff => machine(app, MachineEvent::PowerOff, &mut sink),
        InboundMessage::Wake => {
            busy(true)?;
            machine(app, MachineEvent::Activity, &mut sink)
        }
        InboundMessage::RequestStatus => Ok(Reply::Status),
        InboundMessage::AlarmAck(code) => {
            app.acknowledge_alarm(code, &mut sink)?;
            Ok(Reply::Ack)
        }
        InboundMessage::MaintenanceDone(kind) => {
            app.maintenance_done(kind, storage, &mut sink)?;
            Ok(Reply::Ack)
        }

        // ── OTA ────────────────────────────────────────────
        InboundMessage::OtaBegin { image_size } => {
            if !matches!(app.state(), StateId::Idle | StateId::Sleep) {
                return Err(RejectReason::InvalidState);
            }
            ota.begin(image_size, firmware, now_ms)
                .map_err(|e| ota_failure(e, app, &mut sink))?;
            app.resolve_alarm(AlarmCode::OtaFailed, &mut sink);
            Ok(Reply::Ack)
        }
        InboundMessage::OtaChunk { seq, offset, data } => ota
            .chunk(seq, offset, &data, firmware, now_ms)
            .map(Reply::Progress)
            .map_err(|e| ota_failure(e, app, &mut sink)),
        InboundMessage::OtaComplete { sha256 } => {
            ota.complete(&sha256, firmware)
                .map_err(|e| ota_failure(e, app, &mut sink))?;
            Ok(Reply::Ack)
        }
        InboundMessage::OtaAbort => {
            ota.abort(firmware)
                .map_err(|e| ota_failure(e, app, &mut sink))?;
            Ok(Reply::Ack)
        }
    }
}

fn machine(
    app: &mut AppService,
    event: MachineEvent,
    sink: &mut impl EventSink,
) -> Result<Reply, RejectReason> {
    app.handle_event(event, sink)?;
    Ok(Reply::Ack)
}

/// A failure that ended the session leaves an `OtaFailed` warning until
/// the next `OtaBegin`.
fn ota_failure(err: OtaError, app: &mut AppService, sink: &mut impl EventSink) -> RejectReason {
    if err.aborts_session() {
        app.raise_alarm(AlarmCode::OtaFailed, Severity::Warning, sink);
    }
    err.reject_reason()
}
