//! UART byte channel: 115 200 baud 8N1 by default, blocking read with a
//! deadline (spec.md §4.2). Grounded on `WMT-GmbH-pn532/src/serialport.rs`,
//! which wraps the same `serialport` crate for its HSU interface.

use std::time::Duration;

use log::trace;
use serialport::SerialPort;

use super::{ByteChannel, ChannelError, ChannelKind};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

pub struct UartChannel {
    port: Box<dyn SerialPort>,
    path: String,
    open: bool,
}

impl UartChannel {
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, ChannelError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(timeout)
            .open()?;
        Ok(Self {
            port,
            path: path.to_string(),
            open: true,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl From<serialport::Error> for ChannelError {
    fn from(e: serialport::Error) -> Self {
        match e.kind {
            serialport::ErrorKind::Io(kind) => ChannelError::Io(std::io::Error::from(kind)),
            serialport::ErrorKind::NoDevice => ChannelError::Closed,
            _ => ChannelError::Io(std::io::Error::other(e.description)),
        }
    }
}

impl ByteChannel for UartChannel {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        use std::io::Write;
        trace!(target: "pn532_host::channel::uart", "-> {bytes:02X?}");
        self.port.write_all(bytes).map_err(ChannelError::Io)
    }

    fn read_exact_with_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ChannelError> {
        self.port
            .set_timeout(timeout)
            .map_err(ChannelError::from)?;
        use std::io::Read;
        match self.port.read(buf) {
            Ok(n) => {
                trace!(target: "pn532_host::channel::uart", "<- {:02X?}", &buf[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(ChannelError::Timeout),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        self.port.set_timeout(timeout).map_err(ChannelError::from)
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Uart
    }
}
