//! Platform-agnostic device enumeration: a registry of per-transport
//! `Detector`s, filtered by ignore list and USB blocklist, with a probe
//! step that escalates confidence (spec.md §4.7).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use crate::channel::uart::UartChannel;
use crate::channel::ChannelKind;
use crate::config::DetectionMode;
use crate::device::Device;
use crate::error::{Error, HostResult};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// One candidate device a `Detector` found, before or after probing
/// (spec.md §3).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub transport_kind: ChannelKind,
    pub path: String,
    pub name: String,
    pub vid_pid: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub confidence: Confidence,
    pub metadata: HashMap<String, String>,
}

impl Candidate {
    pub fn new(transport_kind: ChannelKind, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            transport_kind,
            path: path.into(),
            name: name.into(),
            vid_pid: None,
            manufacturer: None,
            product: None,
            serial: None,
            confidence: Confidence::Low,
            metadata: HashMap::new(),
        }
    }
}

/// A platform-specific way to find candidate devices for one transport
/// kind. Real implementations enumerate serial ports, `/dev/i2c-*`, or
/// `/dev/spidev*`; this crate supplies only the trait — platform glue is
/// explicitly out of scope (spec.md §1).
#[async_trait]
pub trait Detector: Send + Sync {
    fn transport_kind(&self) -> ChannelKind;
    async fn enumerate(&self) -> HostResult<Vec<Candidate>>;
    /// Opens a transport to `candidate` and runs `GetFirmwareVersion`;
    /// `Ok(true)` raises its confidence to `High`.
    async fn probe(&self, candidate: &Candidate) -> HostResult<bool>;
}

/// Known manufacturer substrings, VID:PID pairs, and serial-path substrings
/// used as the "positive signature" `Safe` mode probing requires (spec.md
/// §4.7's three signature kinds). Not exhaustive — an unmatched candidate
/// simply stays unprobed rather than being dropped.
const KNOWN_MANUFACTURER_HINTS: &[&str] = &["nxp", "adafruit", "sparkfun", "elechouse", "seeed"];

/// Common USB-to-serial bridge chips seen on PN532 breakout boards
/// (CP2102, CH340, FTDI, and a handful of Adafruit/Elechouse boards).
const KNOWN_VID_PIDS: &[&str] = &[
    "10C4:EA60", // Silicon Labs CP2102
    "1A86:7523", // QinHeng CH340
    "0403:6001", // FTDI FT232R
    "239A:800A", // Adafruit PN532 breakout
];

const KNOWN_PATH_HINTS: &[&str] = &["ttyusb", "ttyacm", "usbserial", "usbmodem"];

fn looks_promising(candidate: &Candidate) -> bool {
    let known_vid_pid = candidate
        .vid_pid
        .as_deref()
        .map(|v| KNOWN_VID_PIDS.iter().any(|known| known.eq_ignore_ascii_case(v)))
        .unwrap_or(false);
    if known_vid_pid {
        return true;
    }

    let path = normalize_path(&candidate.path);
    if KNOWN_PATH_HINTS.iter().any(|hint| path.contains(hint)) {
        return true;
    }

    candidate
        .manufacturer
        .as_deref()
        .map(|m| {
            let lower = m.to_lowercase();
            KNOWN_MANUFACTURER_HINTS.iter().any(|hint| lower.contains(hint))
        })
        .unwrap_or(false)
}

fn normalize_path(path: &str) -> String {
    path.to_lowercase().replace('\\', "/")
}

/// The one illustrative per-transport `Detector` the spec calls for
/// (spec.md §1 Non-goals: platform glue beyond this is out of scope).
/// Lists serial ports via the `serialport` crate's own OS backend and probes
/// a candidate by opening it and issuing `GetFirmwareVersion`.
pub struct UartDetector {
    pub baud_rate: u32,
    pub probe_timeout: Duration,
}

impl Default for UartDetector {
    fn default() -> Self {
        Self {
            baud_rate: crate::channel::uart::DEFAULT_BAUD_RATE,
            probe_timeout: Duration::from_millis(500),
        }
    }
}

impl UartDetector {
    /// Builds a detector whose probe timeout is `config.connect_timeout`
    /// (spec.md §6) instead of the hardcoded default.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            baud_rate: crate::channel::uart::DEFAULT_BAUD_RATE,
            probe_timeout: config.connect_timeout,
        }
    }
}

#[async_trait]
impl Detector for UartDetector {
    fn transport_kind(&self) -> ChannelKind {
        ChannelKind::Uart
    }

    async fn enumerate(&self) -> HostResult<Vec<Candidate>> {
        tokio::task::spawn_blocking(|| {
            let ports = serialport::available_ports().map_err(|e| Error::Other(e.to_string()))?;
            Ok(ports
                .into_iter()
                .map(|info| {
                    let mut candidate = Candidate::new(ChannelKind::Uart, info.port_name.clone(), info.port_name);
                    if let serialport::SerialPortType::UsbPort(usb) = info.port_type {
                        candidate.vid_pid = Some(format!("{:04X}:{:04X}", usb.vid, usb.pid));
                        candidate.manufacturer = usb.manufacturer;
                        candidate.product = usb.product;
                        candidate.serial = usb.serial_number;
                    }
                    candidate
                })
                .collect())
        })
        .await
        .map_err(|e| Error::Other(e.to_string()))?
    }

    async fn probe(&self, candidate: &Candidate) -> HostResult<bool> {
        let path = candidate.path.clone();
        let baud_rate = self.baud_rate;
        let timeout = self.probe_timeout;
        tokio::task::spawn_blocking(move || {
            let channel = UartChannel::open(&path, baud_rate, timeout)
                .map_err(|e| Error::Other(format!("opening {path}: {e}")))?;
            let mut device = Device::new(Transport::new(channel, path));
            device.get_firmware_version().map(|_| true)
        })
        .await
        .map_err(|e| Error::Other(e.to_string()))?
    }
}

pub struct DeviceEnumerator {
    detectors: HashMap<ChannelKind, Box<dyn Detector>>,
    ignore_paths: Vec<String>,
    usb_blocklist: Vec<String>,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
            ignore_paths: Vec::new(),
            usb_blocklist: Vec::new(),
        }
    }

    /// Builds an enumerator with its ignore list and USB blocklist sourced
    /// from `config` (spec.md §6). Detectors must still be registered.
    pub fn from_config(config: &crate::config::Config) -> Self {
        let mut enumerator = Self::new();
        enumerator.set_ignore_paths(config.ignore_paths.clone());
        enumerator.set_usb_blocklist(config.usb_blocklist.clone());
        enumerator
    }

    pub fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.insert(detector.transport_kind(), detector);
    }

    pub fn set_ignore_paths(&mut self, paths: Vec<String>) {
        self.ignore_paths = paths;
    }

    pub fn set_usb_blocklist(&mut self, blocklist: Vec<String>) {
        self.usb_blocklist = blocklist;
    }

    fn is_ignored(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        self.ignore_paths.iter().any(|p| normalize_path(p) == normalized)
    }

    fn is_blocked(&self, vid_pid: Option<&str>) -> bool {
        match vid_pid {
            Some(vid_pid) => self
                .usb_blocklist
                .iter()
                .any(|blocked| blocked.eq_ignore_ascii_case(vid_pid)),
            None => false,
        }
    }

    /// Filters `candidates` in place against the ignore list and USB
    /// blocklist. Exposed separately from [`Self::discover`] so tests can
    /// exercise filtering against an in-memory list without a real
    /// `Detector`.
    pub fn filter(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter(|c| !self.is_ignored(&c.path))
            .filter(|c| !self.is_blocked(c.vid_pid.as_deref()))
            .collect()
    }

    pub async fn discover(&self, kinds: &[ChannelKind], mode: DetectionMode) -> HostResult<Vec<Candidate>> {
        let mut out = Vec::new();
        for kind in kinds {
            let detector = self
                .detectors
                .get(kind)
                .ok_or_else(|| Error::PlatformUnsupported { transport: kind.to_string() })?;

            let mut candidates = self.filter(detector.enumerate().await?);
            debug!(target: "pn532_host::enumerator", "{} candidates for {kind}", candidates.len());

            for candidate in &mut candidates {
                let should_probe = match mode {
                    DetectionMode::Passive => false,
                    DetectionMode::Safe => looks_promising(candidate),
                    DetectionMode::Full => true,
                };
                if should_probe && detector.probe(candidate).await.unwrap_or(false) {
                    info!(target: "pn532_host::enumerator", "probed {} -> High confidence", candidate.path);
                    candidate.confidence = Confidence::High;
                }
            }
            out.extend(candidates);
        }
        Ok(out)
    }
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        Self::new()
    }
}
