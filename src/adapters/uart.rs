//! Hub UART link.
//!
//! [`UartTransport`] implements [`Transport`] over UART1 at 921 600 baud.
//! The mains power meter gets its own port through [`UartTransport::open_port`].
//! Reception runs on its own task: [`spawn_rx_pump`] reads whatever the
//! driver has buffered and pushes it into the rx ring, so the control loop
//! never blocks on the wire.  Transmission happens from the control loop
//! through the same transport type.
//!
//! ```text
//!   UART1 rx ──▶ hub-rx task ──▶ RxProducer ══ ring ══ RxConsumer ──▶ ControlLoop
//!   UART1 tx ◀── ControlLoop::flush ◀── OutboundQueue
//! ```
//!
//! On host builds the transport is an in-memory pair of byte queues.

use core::time::Duration;
use std::thread::JoinHandle;

use log::{info, warn};

use crate::drivers::task_pin::{self, Core};
use crate::rpc::ring::RxProducer;
use crate::rpc::transport::Transport;

/// Bytes pulled from the driver per read.
const RX_CHUNK: usize = 256;
/// Pause when the wire is idle.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

#[cfg(target_os = "espidf")]
mod imp {
    use esp_idf_svc::sys::*;
    use log::info;

    use crate::pins;

    /// Driver-side ring sizes.
    const DRIVER_RX_BUF: i32 = 2048;
    const DRIVER_TX_BUF: i32 = 2048;
    /// Longest a hub read may wait for the first byte.
    const HUB_READ_TIMEOUT_TICKS: u32 = 10;

    /// Handle to the installed UART driver.  Cheap to copy; the IDF driver
    /// serialises rx and tx internally.
    #[derive(Debug, Clone, Copy)]
    pub struct UartTransport {
        port: uart_port_t,
        read_timeout_ticks: u32,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct UartError(pub i32);

    impl UartTransport {
        /// Configure the hub link and install its driver.
        pub fn open() -> Result<Self, UartError> {
            Self::open_port(
                pins::HUB_UART_PORT,
                pins::HUB_UART_TX_GPIO,
                pins::HUB_UART_RX_GPIO,
                pins::HUB_UART_BAUD,
                HUB_READ_TIMEOUT_TICKS,
            )
        }

        /// Configure pins and install the driver on any UART.  A zero
        /// `read_timeout_ticks` makes reads return at once.
        pub fn open_port(
            port: uart_port_t,
            tx_gpio: i32,
            rx_gpio: i32,
            baud: i32,
            read_timeout_ticks: u32,
        ) -> Result<Self, UartError> {
            let cfg = uart_config_t {
                baud_rate: baud,
                data_bits: uart_word_length_t_UART_DATA_8_BITS,
                parity: uart_parity_t_UART_PARITY_DISABLE,
                stop_bits: uart_stop_bits_t_UART_STOP_BITS_1,
                flow_ctrl: uart_hw_flowcontrol_t_UART_HW_FLOWCTRL_DISABLE,
                ..Default::default()
            };
            // SAFETY: called once from main before the pump starts.
            unsafe {
                check(uart_param_config(port, &cfg))?;
                check(uart_set_pin(
                    port,
                    tx_gpio,
                    rx_gpio,
                    UART_PIN_NO_CHANGE,
                    UART_PIN_NO_CHANGE,
                ))?;
                check(uart_driver_install(
                    port,
                    DRIVER_RX_BUF,
                    DRIVER_TX_BUF,
                    0,
                    core::ptr::null_mut(),
                    0,
                ))?;
            }
            info!("LINK: UART{} up at {} baud", port, baud);
            Ok(Self {
                port,
                read_timeout_ticks,
            })
        }

        pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, UartError> {
            let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
            let n = unsafe {
                uart_read_bytes(self.port, buf.as_mut_ptr().cast(), len, self.read_timeout_ticks)
            };
            usize::try_from(n).map_err(|_| UartError(n))
        }

        pub fn write(&mut self, data: &[u8]) -> Result<usize, UartError> {
            let n = unsafe { uart_write_bytes(self.port, data.as_ptr().cast(), data.len()) };
            usize::try_from(n).map_err(|_| UartError(n))
        }

        pub fn flush(&mut self) -> Result<(), UartError> {
            // Wait at most one loop period; the driver keeps draining after.
            check(unsafe { uart_wait_tx_done(self.port, 1) })
        }
    }

    fn check(rc: esp_err_t) -> Result<(), UartError> {
        if rc == ESP_OK { Ok(()) } else { Err(UartError(rc)) }
    }
}

#[cfg(not(target_os = "espidf"))]
mod imp {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, PoisonError};

    #[derive(Default)]
    struct Wire {
        to_device: VecDeque<u8>,
        from_device: Vec<u8>,
    }

    /// In-memory stand-in for the UART.  Clones share the same wire.
    #[derive(Clone, Default)]
    pub struct UartTransport {
        wire: Arc<Mutex<Wire>>,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct UartError;

    impl UartTransport {
        pub fn open() -> Result<Self, UartError> {
            log::info!("LINK(sim): in-memory UART");
            Ok(Self::default())
        }

        /// Pins and timing have no meaning on the in-memory wire.
        pub fn open_port(port: i32, _tx: i32, _rx: i32, baud: i32, _ticks: u32) -> Result<Self, UartError> {
            log::info!("LINK(sim): in-memory UART{} at {} baud", port, baud);
            Ok(Self::default())
        }

        /// Queue bytes as if the hub had sent them.
        pub fn inject(&self, bytes: &[u8]) {
            let mut wire = self.wire.lock().unwrap_or_else(PoisonError::into_inner);
            wire.to_device.extend(bytes);
        }

        /// Everything the device has written since the last call.
        pub fn take_written(&self) -> Vec<u8> {
            let mut wire = self.wire.lock().unwrap_or_else(PoisonError::into_inner);
            core::mem::take(&mut wire.from_device)
        }

        pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, UartError> {
            let mut wire = self.wire.lock().map_err(|_| UartError)?;
            let n = buf.len().min(wire.to_device.len());
            for (dst, src) in buf.iter_mut().zip(wire.to_device.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }

        pub fn write(&mut self, data: &[u8]) -> Result<usize, UartError> {
            let mut wire = self.wire.lock().map_err(|_| UartError)?;
            wire.from_device.extend_from_slice(data);
            Ok(data.len())
        }

        pub fn flush(&mut self) -> Result<(), UartError> {
            Ok(())
        }
    }
}

pub use imp::{UartError, UartTransport};

impl Transport for UartTransport {
    type Error = UartError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, UartError> {
        UartTransport::read(self, buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, UartError> {
        UartTransport::write(self, data)
    }

    fn flush(&mut self) -> Result<(), UartError> {
        UartTransport::flush(self)
    }
}

/// Move everything `transport` has received into the ring.  Returns the
/// number of bytes read from the wire.
pub fn pump_once<T: Transport>(transport: &mut T, producer: &mut RxProducer<'_>) -> usize {
    let mut buf = [0u8; RX_CHUNK];
    match transport.read(&mut buf) {
        Ok(0) => 0,
        Ok(n) => {
            let accepted = producer.push_slice(&buf[..n]);
            if accepted < n {
                warn!("LINK: rx ring full, {} bytes dropped", n - accepted);
            }
            n
        }
        Err(e) => {
            warn!("LINK: rx read failed: {:?}", e);
            0
        }
    }
}

/// Spawn the receive task on the protocol core.
pub fn spawn_rx_pump<T>(mut transport: T, mut producer: RxProducer<'static>) -> std::io::Result<JoinHandle<()>>
where
    T: Transport + Send + 'static,
{
    task_pin::spawn_on_core(Core::Pro, 10, 4, "hub-rx\0", move || {
        info!("LINK: rx pump running");
        loop {
            if pump_once(&mut transport, &mut producer) == 0 {
                std::thread::sleep(IDLE_BACKOFF);
            }
        }
    })
}
