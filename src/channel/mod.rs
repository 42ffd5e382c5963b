//! Byte channels: opaque full-duplex byte I/O with timeout and close.
//!
//! Three implementations share this interface (spec.md §4.2): [`uart`],
//! [`i2c`] and [`spi`]. All I/O here is blocking — `transport.rs` is the
//! layer that gives it retry/ACK/timeout semantics.

pub mod i2c;
pub mod spi;
pub mod uart;

use std::time::Duration;

/// Which physical transport a channel speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Uart,
    I2c,
    Spi,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChannelKind::Uart => "uart",
            ChannelKind::I2c => "i2c",
            ChannelKind::Spi => "spi",
        })
    }
}

/// Errors a [`ByteChannel`] implementation is allowed to surface
/// (spec.md §4.2: "Implementations of the byte channel are allowed to fail
/// only with `{NotReady, Timeout, IO(kind), Closed}`").
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel not ready")]
    NotReady,
    #[error("channel read/write timed out")]
    Timeout,
    #[error("channel IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel is closed")]
    Closed,
}

/// Opaque full-duplex byte I/O, with the transport-specific readiness
/// wrinkles (I2C/SPI status polling) expressed through `poll_ready`.
pub trait ByteChannel: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Reads up to `buf.len()` bytes, honouring the channel's current read
    /// timeout, and returns the number of bytes actually read.
    fn read_exact_with_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ChannelError>;

    /// For I2C/SPI, polls the device's status byte until it reports ready
    /// (`0x01`) or `timeout` elapses, backing off 1 ms between polls. For
    /// UART this is a no-op that always returns `Ok(())` — the wire itself
    /// has no separate readiness signal.
    fn poll_ready(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        let _ = timeout;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ChannelError>;

    fn close(&mut self) -> Result<(), ChannelError>;

    fn is_open(&self) -> bool;

    fn kind(&self) -> ChannelKind;
}
