//! Bounded two-priority outbound frame queue.
//!
//! Alarms go out ahead of everything else.  When the queue is full a new
//! alarm evicts the oldest normal frame; a new normal frame is dropped.
//! An alarm is only dropped when every queued frame is an alarm.  Every
//! drop is counted.

use heapless::Deque;
use log::{debug, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::error::LinkError;
use crate::rpc::codec::Frame;
use crate::rpc::message::OutboundMessage;

/// Total frames held across both priorities.
pub const OUTBOUND_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
}

pub struct OutboundQueue {
    high: Deque<Frame, OUTBOUND_CAPACITY>,
    normal: Deque<Frame, OUTBOUND_CAPACITY>,
    dropped: u32,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self {
            high: Deque::new(),
            normal: Deque::new(),
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames lost to back-pressure since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Encode and queue a message at its natural priority.
    pub fn push_message(&mut self, msg: &OutboundMessage) -> Result<(), LinkError> {
        let prio = if msg.is_high_priority() {
            Priority::High
        } else {
            Priority::Normal
        };
        let frame = msg.encode()?;
        self.push(frame, prio)
    }

    pub fn push(&mut self, frame: Frame, prio: Priority) -> Result<(), LinkError> {
        if self.len() >= OUTBOUND_CAPACITY {
            match prio {
                Priority::Normal => {
                    self.record_drop(frame.msg_type);
                    return Err(LinkError::QueueFull);
                }
                Priority::High => {
                    if let Some(evicted) = self.normal.pop_front() {
                        self.record_drop(evicted.msg_type);
                    } else {
                        self.record_drop(frame.msg_type);
                        return Err(LinkError::QueueFull);
                    }
                }
            }
        }
        let target = match prio {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
        };
        // Total occupancy is at most OUTBOUND_CAPACITY, so each deque has room.
        target.push_back(frame).map_err(|_| LinkError::QueueFull)
    }

    /// Next frame to transmit: alarms first, then FIFO.
    pub fn pop(&mut self) -> Option<Frame> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    fn record_drop(&mut self, msg_type: u8) {
        self.dropped = self.dropped.saturating_add(1);
        warn!(
            "outbound: dropped frame 0x{:02X} ({} total)",
            msg_type, self.dropped
        );
    }
}

/// Application events that the hub hears about directly.  State changes
/// and telemetry travel inside `Status`.
impl EventSink for OutboundQueue {
    fn emit(&mut self, event: &AppEvent) {
        let msg = match event {
            AppEvent::AlarmChanged(rec) => OutboundMessage::Alarm(*rec),
            AppEvent::BrewCompleted(summary) => OutboundMessage::BrewCompleted(*summary),
            AppEvent::Telemetry(report) => OutboundMessage::Status(report.clone()),
            AppEvent::Started(_)
            | AppEvent::StateChanged { .. }
            | AppEvent::CommandRejected { .. } => return,
        };
        if let Err(e) = self.push_message(&msg) {
            debug!("outbound: {} not queued: {}", msg.msg_type(), e);
        }
    }
}
