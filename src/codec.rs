//! PN532 normal-frame codec.
//!
//! Pure functions only — no I/O. `transport.rs` drives these against a
//! `ByteChannel`. Frame layout (spec.md §3):
//!
//! ```text
//! 00 00 FF LEN LCS TFI DATA... DCS 00
//! ```
//!
//! `LEN` counts `TFI` + `DATA`. `LCS = (!LEN) + 1`. `DCS` is the two's
//! complement of `TFI + sum(DATA)`. `TFI` is `0xD4` host→PN532 or `0xD5`
//! PN532→host.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

pub const PREAMBLE: u8 = 0x00;
pub const START_CODE: [u8; 2] = [0x00, 0xFF];
pub const POSTAMBLE: u8 = 0x00;

pub const ACK: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];
pub const NACK: [u8; 6] = [0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];

pub const MAX_DATA_LEN: usize = 255;

#[derive(FromPrimitive, ToPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Tfi {
    HostToPn532 = 0xD4,
    Pn532ToHost = 0xD5,
}

/// Outcome of [`parse`] on a possibly-incomplete or corrupted buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A well-formed frame was found; its data region (TFI + payload,
    /// DCS excluded) is returned along with the number of bytes it
    /// consumed from the front of `buf`.
    Frame { data: Vec<u8>, consumed: usize },
    /// The buffer doesn't yet contain a complete frame; read more bytes.
    NeedMoreData,
    /// The length checksum or data checksum failed — the transport must
    /// send a NACK and read again.
    RetryNack,
    /// The frame is unrecoverably malformed for this attempt (bad TFI,
    /// missing start bytes with no trailing postamble).
    Corrupted,
}

fn length_checksum(len: u8) -> u8 {
    (!len).wrapping_add(1)
}

fn data_checksum(tfi: u8, data: &[u8]) -> u8 {
    let sum = data.iter().fold(tfi, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

/// Build an outbound normal frame for `cmd` with trailing `args`.
///
/// Fails with `None` if `1 (TFI) + 1 (cmd) + args.len()` would exceed 255 —
/// extended-length frames are out of scope (spec.md §4.3).
pub fn encode(cmd: u8, args: &[u8]) -> Option<Vec<u8>> {
    let data_len = 2 + args.len();
    if data_len > MAX_DATA_LEN {
        return None;
    }
    let len = data_len as u8;
    let tfi = Tfi::HostToPn532 as u8;

    let mut buf = Vec::with_capacity(7 + args.len() + 2);
    buf.push(PREAMBLE);
    buf.extend_from_slice(&START_CODE);
    buf.push(len);
    buf.push(length_checksum(len));
    buf.push(tfi);
    buf.push(cmd);
    buf.extend_from_slice(args);

    let mut data_for_dcs = Vec::with_capacity(1 + args.len());
    data_for_dcs.push(cmd);
    data_for_dcs.extend_from_slice(args);
    buf.push(data_checksum(tfi, &data_for_dcs));
    buf.push(POSTAMBLE);
    Some(buf)
}

/// Scan `buf` for the start of a normal frame (`00 FF` following any number
/// of leading `00` preamble bytes) and attempt to parse it.
///
/// See spec.md §4.1 for the exact state table this implements.
pub fn parse(buf: &[u8]) -> ParseOutcome {
    let n = buf.len();

    let start = buf.windows(2).position(|w| w == START_CODE);
    let Some(start) = start else {
        return if n > 0 && buf[n - 1] == 0x00 {
            ParseOutcome::NeedMoreData
        } else {
            ParseOutcome::Corrupted
        };
    };

    let after_start = start + 2;
    if n < after_start + 2 {
        return ParseOutcome::NeedMoreData;
    }

    let len = buf[after_start];
    let lcs = buf[after_start + 1];
    if len.wrapping_add(lcs) != 0 {
        return ParseOutcome::RetryNack;
    }

    let tfi_offset = after_start + 2;
    let frame_len = len as usize;
    if n < tfi_offset + frame_len + 1 {
        return ParseOutcome::NeedMoreData;
    }

    let tfi = buf[tfi_offset];
    if Tfi::from_u8(tfi) != Some(Tfi::Pn532ToHost) {
        return ParseOutcome::Corrupted;
    }

    let dcs_offset = tfi_offset + frame_len;
    let dcs = buf[dcs_offset];
    let data = &buf[tfi_offset..dcs_offset];
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum.wrapping_add(dcs) != 0 {
        return ParseOutcome::RetryNack;
    }

    ParseOutcome::Frame {
        data: data.to_vec(),
        consumed: dcs_offset + 2,
    }
}

/// Strip the leading TFI byte from a parsed data region, returning the
/// PN532 response payload (which starts with `cmd + 1`).
pub fn strip_tfi(data: &[u8]) -> &[u8] {
    if data.is_empty() {
        data
    } else {
        &data[1..]
    }
}
