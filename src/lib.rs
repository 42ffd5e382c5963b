//! Host-side driver for the NXP PN532 NFC controller over UART, I2C and SPI.
//!
//! A [`Device`](device::Device) speaks the PN532 command set over any
//! [`ByteChannel`](channel::ByteChannel); a [`PollingSession`](session::PollingSession)
//! wraps one in a continuous detect/read/write loop with pause/resume and
//! card-removal callbacks. [`DeviceEnumerator`](enumerator::DeviceEnumerator)
//! finds candidate serial/I2C/SPI devices without committing to a platform
//! enumeration backend.

pub mod channel;
pub mod codec;
pub mod config;
pub mod context;
pub mod device;
pub mod enumerator;
pub mod error;
pub mod ndef;
pub mod session;
pub mod tag;
pub mod timer;
pub mod transport;

pub use channel::{ByteChannel, ChannelError, ChannelKind};
pub use config::{Config, DetectionMode};
pub use context::Context;
pub use device::{CommandChannel, Device, DetectedTag, FirmwareVersion, TagKind};
pub use enumerator::{Candidate, Confidence, DeviceEnumerator, Detector, UartDetector};
pub use error::{Error, HostResult};
pub use ndef::{NdefMessage, NdefRecord};
pub use session::{Callbacks, CardStateSnapshot, DetectionState, PollingSession, SessionConfig, SessionHandle};
pub use tag::{FelicaTag, MifareTag, NtagTag, Tag};
pub use transport::Transport;
