//! The fixed-period control loop.
//!
//! [`ControlLoop`] is the single owner of machine state.  One call to
//! [`tick`](ControlLoop::tick) runs, in order:
//!
//! 1. the service tick (sensors → safety → FSM → PID → actuators),
//!    followed by a mains power meter poll,
//! 2. OTA supervision (timeouts, abort when the machine leaves Idle/Sleep),
//! 3. a bounded drain of the rx ring through the decoder and dispatcher,
//! 4. link health,
//! 5. the periodic status stream.
//!
//! Nothing in the tick blocks.  Outbound frames accumulate in the
//! [`OutboundQueue`] until the caller [`flush`](ControlLoop::flush)es them
//! to a [`Transport`].

use log::{debug, info, warn};

use crate::alarms::{AlarmCode, Severity};
use crate::config::SystemConfig;
use crate::fsm::StateId;
use crate::rpc::codec::{FrameDecoder, MAX_FRAME_LEN};
use crate::rpc::dispatcher::{Dispatcher, LinkIo};
use crate::rpc::link::{LinkHealth, LinkMonitor};
use crate::rpc::ota::OtaSession;
use crate::rpc::outbound::OutboundQueue;
use crate::rpc::ring::RxConsumer;
use crate::rpc::stream::StatusStreamer;
use crate::rpc::transport::Transport;

use super::events::AppEvent;
use super::ports::{
    ActuatorPort, EventSink, FirmwarePort, PowerMeterPort, SchedulerDelegate, SensorPort,
    StoragePort, Tee,
};
use super::service::AppService;

pub struct ControlLoop {
    app: AppService,
    ota: OtaSession,
    decoder: FrameDecoder,
    dispatcher: Dispatcher,
    outbound: OutboundQueue,
    link: LinkMonitor,
    streamer: StatusStreamer,
    last_state: StateId,
    /// Unsent tail of a frame the transport only partly accepted.
    tx_pending: heapless::Vec<u8, MAX_FRAME_LEN>,
    /// Frames abandoned on a transport error.
    tx_lost: u32,
}

impl ControlLoop {
    pub fn new(config: SystemConfig) -> Self {
        let streamer = StatusStreamer::new(config.status_interval_ms);
        let app = AppService::new(config);
        let last_state = app.state();
        Self {
            app,
            ota: OtaSession::new(),
            decoder: FrameDecoder::new(),
            dispatcher: Dispatcher::new(),
            outbound: OutboundQueue::new(),
            link: LinkMonitor::new(),
            tx_pending: heapless::Vec::new(),
            tx_lost: 0,
            streamer,
            last_state,
        }
    }

    /// Load persisted records into the service.
    pub fn restore(&mut self, storage: &impl StoragePort) {
        self.app.restore(storage);
    }

    pub fn start(&mut self, sink: &mut impl EventSink) {
        let mut sink = Tee(sink, &mut self.outbound);
        self.app.start(&mut sink);
        self.last_state = self.app.state();
    }

    /// Advance loop time over periods the caller could not run.
    pub fn skip_intervals(&mut self, missed: u64) {
        self.app.skip_intervals(missed);
    }

    /// Run one control period.
    pub fn tick<S: EventSink, St: StoragePort, F: FirmwarePort>(
        &mut self,
        hw: &mut (impl SensorPort + ActuatorPort),
        meter: &mut impl PowerMeterPort,
        rx: &mut RxConsumer<'_>,
        storage: &mut St,
        firmware: &mut F,
        sink: &mut S,
    ) {
        // 1. Machine
        let prev_ms = self.app.now_ms();
        self.app
            .tick(hw, &mut *storage, &mut Tee(&mut *sink, &mut self.outbound));
        let now_ms = self.app.now_ms();
        let reading = meter.poll(now_ms);
        self.app
            .record_power(reading, &mut Tee(&mut *sink, &mut self.outbound));

        // 2. OTA supervision
        self.supervise_ota(firmware, sink);

        // 3. Inbound frames
        let budget = usize::from(self.app.config().max_frames_per_tick);
        let mut dispatched = 0;
        while dispatched < budget {
            match self.decoder.poll(|| rx.pop()) {
                None => break,
                Some(Ok(frame)) => {
                    dispatched += 1;
                    let mut io = LinkIo {
                        sink: &mut *sink,
                        storage: &mut *storage,
                        firmware: &mut *firmware,
                        ota: &mut self.ota,
                        outbound: &mut self.outbound,
                    };
                    if let Err(e) = self.dispatcher.dispatch(&frame, &mut self.app, &mut io) {
                        debug!("LINK: frame 0x{:02X} not applied: {}", frame.msg_type, e);
                    }
                }
                Some(Err(e)) => {
                    debug!("LINK: framing error: {}", e);
                    self.link.record_error();
                }
            }
        }

        // 4. Link health
        let mut tee = Tee(&mut *sink, &mut self.outbound);
        match self.link.poll(now_ms, self.app.config()) {
            Some(LinkHealth::Raised) => {
                self.app
                    .raise_alarm(AlarmCode::LinkDegraded, Severity::Warning, &mut tee);
            }
            Some(LinkHealth::Cleared) => self.app.resolve_alarm(AlarmCode::LinkDegraded, &mut tee),
            None => {}
        }

        // 5. Status stream
        let state = self.app.state();
        if state != self.last_state {
            self.last_state = state;
            self.streamer.request_immediate();
        }
        let elapsed = now_ms.saturating_sub(prev_ms).min(u64::from(u32::MAX)) as u32;
        if self.streamer.tick(elapsed) {
            let report = self.app.status_report(self.ota.is_active());
            let before = self.outbound.dropped();
            Tee(&mut *sink, &mut self.outbound).emit(&AppEvent::Telemetry(report));
            if self.outbound.dropped() != before {
                self.streamer.record_drop();
            }
        }
    }

    /// Write every queued frame to `transport`.  Returns the number of
    /// frames completed.
    ///
    /// A short write keeps the unsent tail and the next flush resumes
    /// with it, so frames reach the wire whole and in order.  A transport
    /// error abandons the frame in flight and counts it in
    /// [`tx_lost`](Self::tx_lost).
    pub fn flush<T: Transport>(&mut self, transport: &mut T) -> usize {
        let mut sent = 0;
        let mut wrote = false;
        loop {
            if self.tx_pending.is_empty() {
                let Some(frame) = self.outbound.pop() else {
                    break;
                };
                self.tx_pending = frame.to_bytes();
            }
            let len = self.tx_pending.len();
            match transport.write(&self.tx_pending) {
                Ok(n) if n >= len => {
                    self.tx_pending.clear();
                    sent += 1;
                    wrote = true;
                }
                Ok(n) => {
                    debug!("LINK: short write ({}/{} bytes), resuming next flush", n, len);
                    self.tx_pending.rotate_left(n);
                    self.tx_pending.truncate(len - n);
                    wrote |= n > 0;
                    break;
                }
                Err(e) => {
                    self.tx_pending.clear();
                    self.tx_lost = self.tx_lost.saturating_add(1);
                    warn!("LINK: write failed, frame lost ({} total): {:?}", self.tx_lost, e);
                    break;
                }
            }
        }
        if wrote {
            if let Err(e) = transport.flush() {
                warn!("LINK: flush failed: {:?}", e);
            }
        }
        sent
    }

    /// Frames abandoned on transport errors since boot.
    pub fn tx_lost(&self) -> u32 {
        self.tx_lost
    }

    /// Bytes still waiting to go out, queued frames excluded.
    pub fn tx_backlog(&self) -> usize {
        self.tx_pending.len()
    }

    /// A verified image is committed; the caller should reboot.
    pub fn reboot_pending(&self) -> bool {
        self.ota.reboot_pending()
    }

    pub fn app(&self) -> &AppService {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut AppService {
        &mut self.app
    }

    pub fn ota(&self) -> &OtaSession {
        &self.ota
    }

    pub fn link(&self) -> &LinkMonitor {
        &self.link
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn streamer(&self) -> &StatusStreamer {
        &self.streamer
    }

    /// Transfers only run while the machine is idle or asleep; anything
    /// else ends them.
    fn supervise_ota<S: EventSink>(&mut self, firmware: &mut impl FirmwarePort, sink: &mut S) {
        if !self.ota.is_active() {
            return;
        }
        let failed = if matches!(self.app.state(), StateId::Idle | StateId::Sleep) {
            self.ota
                .check_timeouts(self.app.now_ms(), self.app.config(), firmware)
                .is_some()
        } else {
            warn!("OTA: machine left idle ({:?}), aborting", self.app.state());
            self.ota.abort(firmware).is_ok()
        };
        if failed {
            let mut tee = Tee(sink, &mut self.outbound);
            self.app
                .raise_alarm(AlarmCode::OtaFailed, Severity::Warning, &mut tee);
        }
    }
}

impl SchedulerDelegate for ControlLoop {
    /// A wake slot never interrupts a firmware transfer.
    fn on_schedule_fired(&mut self, label: &str) {
        if self.ota.is_active() {
            info!("Wake schedule '{}' ignored: OTA in progress", label);
            return;
        }
        self.app.on_schedule_fired(label);
    }
}
