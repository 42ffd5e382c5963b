//! I2C byte channel: 400 kHz max, a status byte (`0x01` == ready) must be
//! read successfully before the payload read proceeds (spec.md §4.2).
//! Grounded on `aep-pn532`'s use of the `i2cdev` crate for the same chip.

use std::thread::sleep;
use std::time::{Duration, Instant};

use log::trace;

#[cfg(target_os = "linux")]
use i2cdev::core::I2CDevice;
#[cfg(target_os = "linux")]
use i2cdev::linux::LinuxI2CDevice;

use super::{ByteChannel, ChannelError, ChannelKind};

/// PN532's 7-bit I2C address. The `0x48`/`0x49` bytes in spec.md §4.2 are
/// the 8-bit write/read forms of this same address with the R/W bit baked
/// in; the Linux I2C stack applies that bit for us.
pub const PN532_I2C_ADDRESS: u16 = 0x24;
const READY_BYTE: u8 = 0x01;
const POLL_BACKOFF: Duration = Duration::from_millis(1);

#[cfg(target_os = "linux")]
pub struct I2cChannel {
    dev: LinuxI2CDevice,
    path: String,
    read_timeout: Duration,
    open: bool,
}

#[cfg(target_os = "linux")]
impl I2cChannel {
    pub fn open(path: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let dev = LinuxI2CDevice::new(path, PN532_I2C_ADDRESS)
            .map_err(|e| ChannelError::Io(std::io::Error::other(e.to_string())))?;
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
}

#[cfg(target_os = "linux")]
impl ByteChannel for I2cChannel {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        trace!(target: "pn532_host::channel::i2c", "-> {bytes:02X?}");
        self.dev
            .write(bytes)
            .map_err(|e| ChannelError::Io(std::io::Error::other(e.to_string())))
    }

    fn read_exact_with_timeout(
        &mut self,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, ChannelError> {
        self.dev
            .read(buf)
            .map_err(|e| ChannelError::Io(std::io::Error::other(e.to_string())))?;
        trace!(target: "pn532_host::channel::i2c", "<- {buf:02X?}");
        Ok(buf.len())
    }

    fn poll_ready(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut status = [0u8; 1];
        loop {
            let ready = self
                .dev
                .read(&mut status)
                .map(|_| status[0] == READY_BYTE)
                .unwrap_or(false);
            if ready {
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
        ChannelKind::I2c
    }
}

#[cfg(not(target_os = "linux"))]
pub struct I2cChannel;

#[cfg(not(target_os = "linux"))]
impl I2cChannel {
    pub fn open(_path: &str, _timeout: Duration) -> Result<Self, ChannelError> {
        Err(ChannelError::Io(std::io::Error::other(
            "I2C channel is only implemented on Linux",
        )))
    }
}
