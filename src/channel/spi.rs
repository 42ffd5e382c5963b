//! SPI byte channel: a `ReadStatus` (`0x02`) opcode gates readiness,
//! transfers are LSB-first (spec.md §4.2). Grounded on the `spidev`-based
//! Linux transfer pattern in `rtxm-rust-nrf24l01`.

use std::thread::sleep;
use std::time::{Duration, Instant};

use log::trace;

#[cfg(target_os = "linux")]
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use super::{ByteChannel, ChannelError, ChannelKind};

const READ_STATUS: u8 = 0x02;
const DATA_WRITE: u8 = 0x01;
const DATA_READ: u8 = 0x03;
const READY_BYTE: u8 = 0x01;
const POLL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_SPEED_HZ: u32 = 5_000_000;

#[cfg(target_os = "linux")]
pub struct SpiChannel {
    dev: Spidev,
    path: String,
    read_timeout: Duration,
    open: bool,
}

#[cfg(target_os = "linux")]
impl SpiChannel {
    pub fn open(path: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let mut dev = Spidev::open(path).map_err(ChannelError::Io)?;
        let options = SpidevOptions::new()
            .max_speed_hz(MAX_SPEED_HZ)
            .mode(SpiModeFlags::SPI_MODE_0 | SpiModeFlags::SPI_LSB_FIRST)
            .bits_per_word(8)
            .build();
        dev.configure(&options).map_err(ChannelError::Io)?;
        Ok(Self {
            dev,
            path: path.to_string(),
            read_timeout: timeout,
            open: true,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn status_byte(&mut self) -> Result<u8, ChannelError> {
        let tx = [READ_STATUS, 0x00];
        let mut rx = [0u8; 2];
        {
            let mut transfer = SpidevTransfer::read_write(&tx, &mut rx);
            self.dev
                .transfer(&mut transfer)
                .map_err(ChannelError::Io)?;
        }
        Ok(rx[1])
    }
}

#[cfg(target_os = "linux")]
impl ByteChannel for SpiChannel {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        use std::io::Write;
        trace!(target: "pn532_host::channel::spi", "-> {bytes:02X?}");
        let mut tx = Vec::with_capacity(bytes.len() + 1);
        tx.push(DATA_WRITE);
        tx.extend_from_slice(bytes);
        self.dev.write_all(&tx).map_err(ChannelError::Io)
    }

    fn read_exact_with_timeout(
        &mut self,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, ChannelError> {
        let mut tx = vec![0u8; buf.len() + 1];
        tx[0] = DATA_READ;
        let mut rx = vec![0u8; buf.len() + 1];
        {
            let mut transfer = SpidevTransfer::read_write(&tx, &mut rx);
            self.dev
                .transfer(&mut transfer)
                .map_err(ChannelError::Io)?;
        }
        buf.copy_from_slice(&rx[1..]);
        trace!(target: "pn532_host::channel::spi", "<- {buf:02X?}");
        Ok(buf.len())
    }

    fn poll_ready(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.status_byte().map(|b| b == READY_BYTE).unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ChannelError::NotReady);
            }
            sleep(POLL_BACKOFF);
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Spi
    }
}

#[cfg(not(target_os = "linux"))]
pub struct SpiChannel;

#[cfg(not(target_os = "linux"))]
impl SpiChannel {
    pub fn open(_path: &str, _timeout: Duration) -> Result<Self, ChannelError> {
        Err(ChannelError::Io(std::io::Error::other(
            "SPI channel is only implemented on Linux",
        )))
    }
}
