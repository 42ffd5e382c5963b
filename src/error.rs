use thiserror::Error;

/// Every error this crate can return, grouped the way `spec.md` §7 groups them:
/// transport failures, protocol-level failures, tag-level failures, and
/// session-coordination failures.
#[derive(Error, Debug)]
pub enum Error {
    // --- Transport ---
    #[error("timed out waiting for {operation} on {port}")]
    Timeout { operation: String, port: String },

    #[error("no ACK received for {operation} on {port}")]
    NoAck { operation: String, port: String },

    #[error("frame corrupted during {operation} on {port}")]
    FrameCorrupted { operation: String, port: String },

    #[error("{port} reported not ready during {operation}")]
    NotReady { operation: String, port: String },

    #[error("command payload too large for a normal frame ({len} bytes)")]
    DataTooLarge { len: usize },

    #[error("{port} is closed")]
    Closed { port: String },

    #[error("{transport} is not supported on this platform")]
    PlatformUnsupported { transport: String },

    #[error("IO error on {port} during {operation}: {source}")]
    Io {
        operation: String,
        port: String,
        #[source]
        source: std::io::Error,
    },

    // --- Protocol ---
    #[error("unexpected response code 0x{got:02X} (expected 0x{expected:02X}) for {operation}")]
    UnexpectedResponseCode {
        operation: String,
        expected: u8,
        got: u8,
    },

    #[error("tag reported error status 0x{0:02X}")]
    TagError(u8),

    #[error("no tag detected")]
    NoTagDetected,

    // --- Tag ---
    #[error("tag kind {0:?} cannot be used this way")]
    InvalidTag(crate::device::TagKind),

    #[error("authentication failed for sector {sector}")]
    AuthenticationFailed { sector: u8 },

    #[error("block {block} is write-protected")]
    WriteProtected { block: u8 },

    #[error("block {block} is out of range (tag has {max} blocks)")]
    BlockOutOfRange { block: u32, max: u32 },

    #[error("tag holds no NDEF message")]
    NoNDEF,

    // --- Session ---
    #[error("a write is already pending")]
    WriteAlreadyPending,

    #[error("scanner is not running")]
    ScannerNotRunning,

    #[error("scanner has stopped")]
    ScannerStopped,

    // --- Misc ---
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation has a chance of succeeding.
    ///
    /// Mirrors the propagation table in spec.md §7: everything except
    /// `Closed`, `DataTooLarge` and `PlatformUnsupported` is retryable.
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            Error::Closed { .. } | Error::DataTooLarge { .. } | Error::PlatformUnsupported { .. }
        )
    }

    pub fn operation(&self) -> Option<&str> {
        match self {
            Error::Timeout { operation, .. }
            | Error::NoAck { operation, .. }
            | Error::FrameCorrupted { operation, .. }
            | Error::NotReady { operation, .. }
            | Error::Io { operation, .. }
            | Error::UnexpectedResponseCode { operation, .. } => Some(operation),
            _ => None,
        }
    }

    pub fn port(&self) -> Option<&str> {
        match self {
            Error::Timeout { port, .. }
            | Error::NoAck { port, .. }
            | Error::FrameCorrupted { port, .. }
            | Error::NotReady { port, .. }
            | Error::Closed { port, .. }
            | Error::Io { port, .. } => Some(port),
            _ => None,
        }
    }
}

pub type HostResult<T> = Result<T, Error>;
