//! Transport abstraction: any byte-oriented channel to the hub.
//!
//! On target this is the UART link; host tests capture writes in memory.
//! The control loop only ever writes through this trait; reception goes
//! through the rx ring so the loop never waits on the wire.

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns 0 if no data is available.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data`.  Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Discards all writes and never reads.  Used when no hub is attached.
pub struct NullTransport;

impl Transport for NullTransport {
    type Error = ();

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }
}
