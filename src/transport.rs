//! Composes [`crate::codec`] with a [`ByteChannel`](crate::channel::ByteChannel):
//! ACK handshake, ready polling, read timeout, and the bounded retry loop
//! for corrupted frames (spec.md §4.3).

use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::channel::{ByteChannel, ChannelError, ChannelKind};
use crate::codec::{self, ParseOutcome};
use crate::context::Context;
use crate::error::{Error, HostResult};

/// Default command-level timeout (spec.md §4.4: device default is 5 s; the
/// transport itself defaults its ACK/response wait to the same figure
/// unless a shorter one is pushed down via a [`Context`]).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const ACK_TIMEOUT: Duration = Duration::from_millis(1000);
const MAX_RETRIES: u32 = 3;
const I2C_PROCESSING_DELAY: Duration = Duration::from_millis(6);
const CONTEXT_SAFETY_MARGIN: Duration = Duration::from_millis(5);

fn classify_channel_error(e: ChannelError, operation: &str, port: &str) -> Error {
    match e {
        ChannelError::NotReady => Error::NotReady {
            operation: operation.to_string(),
            port: port.to_string(),
        },
        ChannelError::Timeout => Error::Timeout {
            operation: operation.to_string(),
            port: port.to_string(),
        },
        ChannelError::Closed => Error::Closed {
            port: port.to_string(),
        },
        ChannelError::Io(source) => Error::Io {
            operation: operation.to_string(),
            port: port.to_string(),
            source,
        },
    }
}

/// Transport over a generic [`ByteChannel`]. Owns the current read timeout
/// and drives the retry loop; it does not know about PN532 command
/// semantics beyond the raw ACK/frame handshake.
pub struct Transport<C: ByteChannel> {
    channel: C,
    port: String,
    timeout: Duration,
}

impl<C: ByteChannel> Transport<C> {
    pub fn new(channel: C, port: impl Into<String>) -> Self {
        Self {
            channel,
            port: port.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn kind(&self) -> ChannelKind {
        self.channel.kind()
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn close(&mut self) -> HostResult<()> {
        self.channel
            .close()
            .map_err(|e| classify_channel_error(e, "close", &self.port))
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn needs_ready_poll(&self) -> bool {
        matches!(self.channel.kind(), ChannelKind::I2c | ChannelKind::Spi)
    }

    fn poll_ready(&mut self, timeout: Duration, operation: &str) -> HostResult<()> {
        if self.needs_ready_poll() {
            self.channel
                .poll_ready(timeout)
                .map_err(|e| classify_channel_error(e, operation, &self.port))?;
        }
        Ok(())
    }

    fn wait_ack(&mut self) -> HostResult<()> {
        self.poll_ready(ACK_TIMEOUT, "ack")?;
        let mut buf = [0u8; 6];
        self.channel
            .set_read_timeout(ACK_TIMEOUT)
            .map_err(|e| classify_channel_error(e, "ack", &self.port))?;
        let n = self
            .channel
            .read_exact_with_timeout(&mut buf, ACK_TIMEOUT)
            .map_err(|e| classify_channel_error(e, "ack", &self.port))?;
        if n != 6 || buf != codec::ACK {
            return Err(Error::NoAck {
                operation: "ack".to_string(),
                port: self.port.clone(),
            });
        }

        match self.channel.kind() {
            ChannelKind::I2c => std::thread::sleep(I2C_PROCESSING_DELAY),
            ChannelKind::Spi => self.poll_ready(self.timeout, "post-ack")?,
            ChannelKind::Uart => {}
        }
        Ok(())
    }

    fn send_nack(&mut self) -> HostResult<()> {
        debug!(target: "pn532_host::transport", "sending NACK on {}", self.port);
        self.channel
            .write_all(&codec::NACK)
            .map_err(|e| classify_channel_error(e, "nack", &self.port))
    }

    /// Reads one frame, accumulating bytes across reads until `codec::parse`
    /// recognises a complete frame or the deadline elapses.
    fn read_frame(&mut self, timeout: Duration) -> HostResult<ParseOutcome> {
        let deadline = Instant::now() + timeout;
        let mut buf = Vec::new();
        let mut scratch = [0u8; 64];

        loop {
            self.poll_ready(timeout, "response")?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout {
                    operation: "response".to_string(),
                    port: self.port.clone(),
                });
            }
            self.channel
                .set_read_timeout(remaining)
                .map_err(|e| classify_channel_error(e, "response", &self.port))?;
            let n = self
                .channel
                .read_exact_with_timeout(&mut scratch, remaining)
                .map_err(|e| classify_channel_error(e, "response", &self.port))?;
            if n == 0 {
                continue;
            }
            buf.extend_from_slice(&scratch[..n]);

            match codec::parse(&buf) {
                ParseOutcome::NeedMoreData => continue,
                other => return Ok(other),
            }
        }
    }

    /// Sends `cmd`/`args` and returns the PN532 response payload (the byte
    /// after TFI is the response code, `cmd + 1`).
    pub fn send_command(&mut self, cmd: u8, args: &[u8]) -> HostResult<Vec<u8>> {
        let frame = codec::encode(cmd, args).ok_or(Error::DataTooLarge {
            len: 2 + args.len(),
        })?;

        trace!(target: "pn532_host::transport", "send cmd=0x{cmd:02X} on {}", self.port);
        self.channel
            .write_all(&frame)
            .map_err(|e| classify_channel_error(e, "send", &self.port))?;
        self.wait_ack()?;

        let mut attempts = 0u32;
        loop {
            match self.read_frame(self.timeout)? {
                ParseOutcome::Frame { data, .. } => {
                    return Ok(codec::strip_tfi(&data).to_vec());
                }
                ParseOutcome::RetryNack => {
                    attempts += 1;
                    if attempts > MAX_RETRIES {
                        return Err(Error::FrameCorrupted {
                            operation: "response".to_string(),
                            port: self.port.clone(),
                        });
                    }
                    warn!(target: "pn532_host::transport", "retry {attempts}/{MAX_RETRIES} on {}", self.port);
                    self.send_nack()?;
                }
                ParseOutcome::Corrupted => {
                    return Err(Error::FrameCorrupted {
                        operation: "response".to_string(),
                        port: self.port.clone(),
                    });
                }
                ParseOutcome::NeedMoreData => unreachable!("read_frame loops until resolved"),
            }
        }
    }

    /// Context-aware variant: honours cancellation before sending and
    /// derives the response timeout from the context's deadline with a
    /// safety margin (spec.md §4.3). Real byte-channel I/O cannot be
    /// interrupted mid-syscall without platform-specific unsafety, so the
    /// bound here is enforced the honest way: by shortening the channel's
    /// own read timeout to the remaining budget rather than fabricating a
    /// cancellable worker thread around a borrowed channel. Genuine
    /// worker/abandonment semantics live at the session level
    /// ([`crate::session::PollingSession::write_to_tag`]), where the device
    /// really does run on its own long-lived thread.
    pub fn send_command_with_context(
        &mut self,
        ctx: &Context,
        cmd: u8,
        args: &[u8],
    ) -> HostResult<Vec<u8>> {
        if ctx.is_cancelled() {
            return Err(Error::ScannerStopped);
        }
        let previous = self.timeout;
        if let Some(bounded) = ctx.timeout_with_margin(CONTEXT_SAFETY_MARGIN) {
            self.timeout = bounded;
        }
        let result = self.send_command(cmd, args);
        self.timeout = previous;
        result
    }
}
