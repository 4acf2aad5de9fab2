//! Hub link: framing, commands, responses and firmware update.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Link Stack                            │
//! │                                                                  │
//! │  UART rx ──▶ RxRing ──▶ FrameDecoder ──▶ Dispatcher ──▶ AppService│
//! │  (task)      (spsc)     (CRC, resync)    (exhaustive)            │
//! │                                              │                   │
//! │  UART tx ◀── Transport ◀── OutboundQueue ◀───┘                   │
//! │                            (alarms first)  ◀── StatusStreamer    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod dispatcher;
pub mod link;
pub mod message;
pub mod ota;
pub mod outbound;
pub mod ring;
pub mod stream;
pub mod transport;
