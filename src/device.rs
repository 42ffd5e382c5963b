//! PN532 command layer: [`Device`] owns a [`Transport`] and exposes the
//! six core commands, tag classification, and dispatch into the
//! [`crate::tag`] family handles (spec.md §4.4).

use std::time::Instant;

use log::{debug, info, warn};

use crate::channel::ByteChannel;
use crate::context::Context;
use crate::error::{Error, HostResult};
use crate::tag::{FelicaTag, MifareTag, NtagTag, Tag};
use crate::transport::Transport;

const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
const CMD_SAM_CONFIGURATION: u8 = 0x14;
const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;
const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
const CMD_IN_SELECT: u8 = 0x54;
const CMD_IN_RELEASE: u8 = 0x52;

const SAM_MODE_NORMAL: u8 = 0x01;
const SAM_TIMEOUT_UNITS: u8 = 20; // 20 * 50ms = 1s
const SAM_IRQ_ON: u8 = 0x01;

/// Tag family as classified from UID length / ATQA / SAK (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    NTAG,
    MIFARE,
    FeliCa,
    Generic,
    Unknown,
    Any,
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One target returned by `InListPassiveTarget`, classified into a family.
#[derive(Debug, Clone)]
pub struct DetectedTag {
    pub kind: TagKind,
    pub uid: Vec<u8>,
    pub uid_hex: String,
    pub atqa: [u8; 2],
    pub sak: u8,
    pub target_number: u8,
    pub detected_at: Instant,
}

impl DetectedTag {
    fn new(target_number: u8, atqa: [u8; 2], sak: u8, uid: Vec<u8>) -> Self {
        let uid_hex = uid.iter().map(|b| format!("{b:02X}")).collect::<String>();
        let kind = classify(&uid, atqa, sak);
        Self {
            kind,
            uid,
            uid_hex,
            atqa,
            sak,
            target_number,
            detected_at: Instant::now(),
        }
    }
}

/// Classification rule from spec.md §3.
fn classify(uid: &[u8], atqa: [u8; 2], sak: u8) -> TagKind {
    if uid.len() == 7 && sak == 0x00 {
        TagKind::NTAG
    } else if matches!(sak, 0x08 | 0x18 | 0x28) {
        TagKind::MIFARE
    } else if is_felica_baud(atqa) {
        TagKind::FeliCa
    } else {
        TagKind::Generic
    }
}

/// FeliCa targets are enumerated at 212/424 kbps rather than 106 kbps; the
/// low two bits of the ATQA high byte carry that baud indication in the
/// PN532's `InListPassiveTarget` response.
fn is_felica_baud(atqa: [u8; 2]) -> bool {
    atqa[0] & 0x03 != 0
}

/// Narrow seam tag handles use to talk back to the device that produced
/// them, without making every tag type generic over the byte channel.
pub trait CommandChannel {
    fn data_exchange(&mut self, target: u8, args: &[u8]) -> HostResult<Vec<u8>>;
}

/// PN532 command layer over a generic [`ByteChannel`].
pub struct Device<C: ByteChannel> {
    transport: Transport<C>,
    default_timeout: std::time::Duration,
    debug: bool,
    validation: bool,
}

impl<C: ByteChannel> Device<C> {
    pub fn new(transport: Transport<C>) -> Self {
        Self {
            transport,
            default_timeout: crate::transport::DEFAULT_TIMEOUT,
            debug: false,
            validation: false,
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Enables read-back validation of writes on tag handles this device
    /// creates from here on (`Config::validation`, spec.md §6).
    pub fn set_validation(&mut self, validation: bool) {
        self.validation = validation;
    }

    pub fn set_default_timeout(&mut self, timeout: std::time::Duration) {
        self.default_timeout = timeout;
        self.transport.set_timeout(timeout);
    }

    pub fn port(&self) -> &str {
        self.transport.port()
    }

    /// Sends `cmd`/`args`, verifies the response code is `cmd + 1`, and
    /// returns the payload after that code byte.
    fn call(&mut self, cmd: u8, args: &[u8]) -> HostResult<Vec<u8>> {
        if self.debug {
            debug!(target: "pn532_host::device", "-> cmd=0x{cmd:02X} args={args:02X?}");
        }
        let response = self.transport.send_command(cmd, args)?;
        verify_response_code(cmd, &response)
    }

    fn call_with_context(&mut self, ctx: &Context, cmd: u8, args: &[u8]) -> HostResult<Vec<u8>> {
        let response = self.transport.send_command_with_context(ctx, cmd, args)?;
        verify_response_code(cmd, &response)
    }

    pub fn get_firmware_version(&mut self) -> HostResult<FirmwareVersion> {
        let data = self.call(CMD_GET_FIRMWARE_VERSION, &[])?;
        if data.len() < 4 {
            return Err(Error::Other("short GetFirmwareVersion response".into()));
        }
        Ok(FirmwareVersion {
            ic: data[0],
            version_major: data[1],
            version_minor: data[2],
            support_mask: data[3],
        })
    }

    pub fn sam_configuration(&mut self) -> HostResult<()> {
        self.call(
            CMD_SAM_CONFIGURATION,
            &[SAM_MODE_NORMAL, SAM_TIMEOUT_UNITS, SAM_IRQ_ON],
        )?;
        Ok(())
    }

    /// `GetFirmwareVersion` then `SAMConfiguration`; failure of either is
    /// fatal to the device (spec.md §4.4).
    pub fn init(&mut self) -> HostResult<FirmwareVersion> {
        let version = self.get_firmware_version()?;
        info!(target: "pn532_host::device", "firmware {version:?} on {}", self.transport.port());
        self.sam_configuration()?;
        Ok(version)
    }

    /// `InListPassiveTarget`, classifying each returned target.
    pub fn detect_tags(&mut self, max_targets: u8, baud_mod: u8) -> HostResult<Vec<DetectedTag>> {
        let data = self.call(CMD_IN_LIST_PASSIVE_TARGET, &[max_targets, baud_mod])?;
        parse_detected_tags(&data)
    }

    pub fn detect_tags_with_context(
        &mut self,
        ctx: &Context,
        max_targets: u8,
        baud_mod: u8,
    ) -> HostResult<Vec<DetectedTag>> {
        let data = self.call_with_context(ctx, CMD_IN_LIST_PASSIVE_TARGET, &[max_targets, baud_mod])?;
        parse_detected_tags(&data)
    }

    /// Convenience wrapper around repeated `InListPassiveTarget` calls; the
    /// native `InAutoPoll` opcode is not used (see DESIGN.md).
    pub fn auto_poll(
        &mut self,
        attempts: u32,
        max_targets: u8,
        baud_mod: u8,
    ) -> HostResult<Vec<DetectedTag>> {
        for _ in 0..attempts.max(1) {
            let tags = self.detect_tags(max_targets, baud_mod)?;
            if !tags.is_empty() {
                return Ok(tags);
            }
        }
        Ok(Vec::new())
    }

    pub fn in_select(&mut self, target_number: u8) -> HostResult<()> {
        self.call(CMD_IN_SELECT, &[target_number])?;
        Ok(())
    }

    pub fn in_release(&mut self, target_number: u8) -> HostResult<()> {
        self.call(CMD_IN_RELEASE, &[target_number])?;
        Ok(())
    }

    pub fn in_data_exchange(&mut self, target_number: u8, args: &[u8]) -> HostResult<Vec<u8>> {
        let mut payload = Vec::with_capacity(1 + args.len());
        payload.push(target_number);
        payload.extend_from_slice(args);
        let data = self.call(CMD_IN_DATA_EXCHANGE, &payload)?;
        let status = *data
            .first()
            .ok_or_else(|| Error::Other("empty InDataExchange response".into()))?;
        if status != 0x00 {
            warn!(target: "pn532_host::device", "tag error status 0x{status:02X} on {}", self.transport.port());
            return Err(Error::TagError(status));
        }
        Ok(data[1..].to_vec())
    }

    /// Dispatches a detected target into its typed tag handle, borrowing
    /// this device exclusively for the handle's lifetime.
    pub fn create_tag<'a>(&'a mut self, detected: &DetectedTag) -> HostResult<Box<dyn Tag + 'a>> {
        let validation = self.validation;
        match detected.kind {
            TagKind::NTAG => {
                let mut tag = NtagTag::new(self, detected.clone());
                tag.set_validation(validation);
                Ok(Box::new(tag))
            }
            TagKind::MIFARE => {
                let mut tag = MifareTag::new(self, detected.clone());
                tag.set_validation(validation);
                Ok(Box::new(tag))
            }
            TagKind::FeliCa => Ok(Box::new(FelicaTag::new(detected.clone()))),
            TagKind::Generic | TagKind::Unknown | TagKind::Any => {
                Err(Error::InvalidTag(detected.kind))
            }
        }
    }
}

impl<C: ByteChannel> CommandChannel for Device<C> {
    fn data_exchange(&mut self, target: u8, args: &[u8]) -> HostResult<Vec<u8>> {
        self.in_data_exchange(target, args)
    }
}

fn verify_response_code(cmd: u8, response: &[u8]) -> HostResult<Vec<u8>> {
    let expected = cmd.wrapping_add(1);
    let got = *response.first().ok_or(Error::UnexpectedResponseCode {
        operation: format!("cmd 0x{cmd:02X}"),
        expected,
        got: 0,
    })?;
    if got != expected {
        return Err(Error::UnexpectedResponseCode {
            operation: format!("cmd 0x{cmd:02X}"),
            expected,
            got,
        });
    }
    Ok(response[1..].to_vec())
}

fn parse_detected_tags(data: &[u8]) -> HostResult<Vec<DetectedTag>> {
    let mut tags = Vec::new();
    let nb_tg = *data.first().unwrap_or(&0) as usize;
    let mut cursor = 1usize;
    for _ in 0..nb_tg {
        if cursor + 4 > data.len() {
            break;
        }
        let target_number = data[cursor];
        let atqa = [data[cursor + 1], data[cursor + 2]];
        let sak = data[cursor + 3];
        let uid_len = data[cursor + 4] as usize;
        cursor += 5;
        if cursor + uid_len > data.len() {
            break;
        }
        let uid = data[cursor..cursor + uid_len].to_vec();
        cursor += uid_len;
        tags.push(DetectedTag::new(target_number, atqa, sak, uid));
    }
    Ok(tags)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub ic: u8,
    pub version_major: u8,
    pub version_minor: u8,
    pub support_mask: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::FakeByteChannel;

    fn ack() -> Vec<u8> {
        crate::codec::ACK.to_vec()
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0xD5u8];
        data.extend_from_slice(payload);
        let len = data.len() as u8;
        let lcs = (!len).wrapping_add(1);
        let sum = data.iter().fold(0u8, |a, &b| a.wrapping_add(b));
        let dcs = (!sum).wrapping_add(1);
        let mut frame = vec![0x00, 0x00, 0xFF, len, lcs];
        frame.extend_from_slice(&data);
        frame.push(dcs);
        frame.push(0x00);
        frame
    }

    fn device_with(reads: Vec<Vec<u8>>) -> Device<FakeByteChannel> {
        let channel = FakeByteChannel::new(reads);
        Device::new(Transport::new(channel, "fake0"))
    }

    #[test]
    fn init_reads_firmware_version_and_configures_sam() {
        let reads = vec![
            ack(),
            frame(&[0x03, 0x32, 0x01, 0x06, 0x07]),
            ack(),
            frame(&[0x15]),
        ];
        let mut device = device_with(reads);
        let version = device.init().unwrap();
        assert_eq!(version.ic, 0x32);
        assert_eq!(version.version_major, 1);
        assert_eq!(version.version_minor, 6);
        assert_eq!(version.support_mask, 7);
    }

    #[test]
    fn detect_tags_classifies_ntag_from_seven_byte_uid() {
        let reads = vec![
            ack(),
            frame(&[
                0x4B, 0x01, 0x01, 0x00, 0x44, 0x00, 0x07, 0x04, 0xAB, 0xCD, 0xEF, 0x12, 0x34, 0x56,
            ]),
        ];
        let mut device = device_with(reads);
        let tags = device.detect_tags(1, 0x00).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].kind, TagKind::NTAG);
        assert_eq!(tags[0].uid, vec![0x04, 0xAB, 0xCD, 0xEF, 0x12, 0x34, 0x56]);
        assert_eq!(tags[0].atqa, [0x00, 0x44]);
        assert_eq!(tags[0].sak, 0x00);
    }

    #[test]
    fn detect_tags_classifies_mifare_1k() {
        let reads = vec![
            ack(),
            frame(&[0x4B, 0x01, 0x01, 0x00, 0x04, 0x08, 0x04, 0x12, 0x34, 0x56, 0x78]),
        ];
        let mut device = device_with(reads);
        let tags = device.detect_tags(1, 0x00).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].kind, TagKind::MIFARE);
        assert_eq!(tags[0].sak, 0x08);
        assert_eq!(tags[0].uid, vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn detect_tags_returns_empty_when_no_targets_found() {
        let reads = vec![ack(), frame(&[0x4B, 0x00])];
        let mut device = device_with(reads);
        let tags = device.detect_tags(1, 0x00).unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn in_data_exchange_surfaces_tag_error_status() {
        let reads = vec![ack(), frame(&[0x41, 0x01])];
        let mut device = device_with(reads);
        let err = device.in_data_exchange(1, &[0x30, 0x04]).unwrap_err();
        assert!(matches!(err, Error::TagError(0x01)));
    }

    #[test]
    fn unexpected_response_code_is_rejected() {
        let reads = vec![ack(), frame(&[0x99])];
        let mut device = device_with(reads);
        let err = device.get_firmware_version().unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponseCode { .. }));
    }
}
