//! TLV framing and NDEF record codec shared by every tag family
//! (spec.md §4.1 NDEF layer, §6).
//!
//! Tag families hand this module the raw bytes they read from the card;
//! this module never touches a [`crate::device::CommandChannel`].

use crate::error::{Error, HostResult};

const TLV_NDEF_MESSAGE: u8 = 0x03;
const TLV_NULL: u8 = 0x00;
const TLV_TERMINATOR: u8 = 0xFE;
const TLV_LENGTH_EXTENDED_MARKER: u8 = 0xFF;

const TNF_WELL_KNOWN: u8 = 0x01;
const RECORD_TYPE_TEXT: u8 = b'T';
const RECORD_TYPE_URI: u8 = b'U';

const HEADER_MB: u8 = 0x80;
const HEADER_ME: u8 = 0x40;
const HEADER_SR: u8 = 0x10;
const HEADER_IL: u8 = 0x08;
const HEADER_TNF_MASK: u8 = 0x07;

/// The NFC Forum URI Record Type Definition abbreviation table
/// (spec.md §4.5/§6: "a one-byte abbreviation scheme").
const URI_PREFIXES: [&str; 0x24] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NdefRecord {
    Text { language: String, text: String },
    Uri { uri: String },
    Unknown { tnf: u8, record_type: Vec<u8>, payload: Vec<u8> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NdefMessage {
    pub records: Vec<NdefRecord>,
}

impl NdefMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            records: vec![NdefRecord::Text {
                language: "en".to_string(),
                text: text.into(),
            }],
        }
    }
}

/// Extracts the raw NDEF message bytes from a TLV stream (spec.md §4.5/§6).
///
/// Scans TLVs in order: `0x00` (null) is a single byte and is skipped;
/// `0x03` (NDEF Message) carries the payload we want, with either a 1-byte
/// length or, if that byte is `0xFF`, a following 2-byte big-endian length;
/// `0xFE` is the terminator; any other tag is skipped using its 1-byte
/// length.
pub fn extract_message_tlv(data: &[u8]) -> HostResult<Vec<u8>> {
    let mut cursor = 0usize;
    while cursor < data.len() {
        let tag = data[cursor];
        if tag == TLV_TERMINATOR {
            break;
        }
        if tag == TLV_NULL {
            cursor += 1;
            continue;
        }
        cursor += 1;
        if cursor >= data.len() {
            break;
        }
        let first_len = data[cursor];
        let (len, len_bytes) = if first_len == TLV_LENGTH_EXTENDED_MARKER {
            if cursor + 2 >= data.len() {
                return Err(Error::NoNDEF);
            }
            let hi = data[cursor + 1] as usize;
            let lo = data[cursor + 2] as usize;
            (hi << 8 | lo, 3)
        } else {
            (first_len as usize, 1)
        };
        cursor += len_bytes;
        if cursor + len > data.len() {
            return Err(Error::NoNDEF);
        }
        if tag == TLV_NDEF_MESSAGE {
            return Ok(data[cursor..cursor + len].to_vec());
        }
        cursor += len;
    }
    Err(Error::NoNDEF)
}

/// Wraps NDEF message bytes in a `0x03` TLV, terminated by `0xFE`.
pub fn wrap_message_tlv(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 4);
    out.push(TLV_NDEF_MESSAGE);
    if message.len() < TLV_LENGTH_EXTENDED_MARKER as usize {
        out.push(message.len() as u8);
    } else {
        out.push(TLV_LENGTH_EXTENDED_MARKER);
        out.push((message.len() >> 8) as u8);
        out.push((message.len() & 0xFF) as u8);
    }
    out.extend_from_slice(message);
    out.push(TLV_TERMINATOR);
    out
}

/// Parses a raw NDEF message (the bytes inside the `0x03` TLV).
pub fn parse_message(bytes: &[u8]) -> HostResult<NdefMessage> {
    let mut records = Vec::new();
    let mut cursor = 0usize;
    loop {
        if cursor >= bytes.len() {
            break;
        }
        let header = bytes[cursor];
        let sr = header & HEADER_SR != 0;
        let il = header & HEADER_IL != 0;
        let tnf = header & HEADER_TNF_MASK;
        cursor += 1;

        let type_len = *bytes.get(cursor).ok_or(Error::NoNDEF)? as usize;
        cursor += 1;

        let payload_len = if sr {
            let len = *bytes.get(cursor).ok_or(Error::NoNDEF)? as usize;
            cursor += 1;
            len
        } else {
            let slice = bytes.get(cursor..cursor + 4).ok_or(Error::NoNDEF)?;
            cursor += 4;
            u32::from_be_bytes(slice.try_into().unwrap()) as usize
        };

        let id_len = if il {
            let len = *bytes.get(cursor).ok_or(Error::NoNDEF)? as usize;
            cursor += 1;
            len
        } else {
            0
        };

        let record_type = bytes
            .get(cursor..cursor + type_len)
            .ok_or(Error::NoNDEF)?
            .to_vec();
        cursor += type_len;
        cursor += id_len; // ID bytes are not surfaced; spec scopes out ID-based records.

        let payload = bytes
            .get(cursor..cursor + payload_len)
            .ok_or(Error::NoNDEF)?
            .to_vec();
        cursor += payload_len;

        records.push(decode_record(tnf, &record_type, payload));

        let me = header & HEADER_ME != 0;
        if me {
            break;
        }
    }
    Ok(NdefMessage { records })
}

fn decode_record(tnf: u8, record_type: &[u8], payload: Vec<u8>) -> NdefRecord {
    if tnf == TNF_WELL_KNOWN && record_type == [RECORD_TYPE_TEXT] {
        if let Some(record) = decode_text(&payload) {
            return record;
        }
    }
    if tnf == TNF_WELL_KNOWN && record_type == [RECORD_TYPE_URI] {
        if let Some(record) = decode_uri(&payload) {
            return record;
        }
    }
    NdefRecord::Unknown {
        tnf,
        record_type: record_type.to_vec(),
        payload,
    }
}

fn decode_text(payload: &[u8]) -> Option<NdefRecord> {
    let status = *payload.first()?;
    let utf16 = status & 0x80 != 0;
    let lang_len = (status & 0x3F) as usize;
    let language = std::str::from_utf8(payload.get(1..1 + lang_len)?).ok()?.to_string();
    let text_bytes = payload.get(1 + lang_len..)?;
    let text = if utf16 {
        let utf16_units: Vec<u16> = text_bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&utf16_units).ok()?
    } else {
        std::str::from_utf8(text_bytes).ok()?.to_string()
    };
    Some(NdefRecord::Text { language, text })
}

fn decode_uri(payload: &[u8]) -> Option<NdefRecord> {
    let code = *payload.first()? as usize;
    let prefix = URI_PREFIXES.get(code)?;
    let rest = std::str::from_utf8(&payload[1..]).ok()?;
    Some(NdefRecord::Uri {
        uri: format!("{prefix}{rest}"),
    })
}

fn encode_record(record: &NdefRecord, mb: bool, me: bool) -> Vec<u8> {
    let (tnf, record_type, payload) = match record {
        NdefRecord::Text { language, text } => {
            let mut payload = Vec::with_capacity(1 + language.len() + text.len());
            payload.push(language.len() as u8);
            payload.extend_from_slice(language.as_bytes());
            payload.extend_from_slice(text.as_bytes());
            (TNF_WELL_KNOWN, vec![RECORD_TYPE_TEXT], payload)
        }
        NdefRecord::Uri { uri } => {
            let (code, rest) = best_uri_prefix(uri);
            let mut payload = Vec::with_capacity(1 + rest.len());
            payload.push(code);
            payload.extend_from_slice(rest.as_bytes());
            (TNF_WELL_KNOWN, vec![RECORD_TYPE_URI], payload)
        }
        NdefRecord::Unknown { tnf, record_type, payload } => (*tnf, record_type.clone(), payload.clone()),
    };

    let sr = payload.len() < 256;
    let mut header = tnf;
    if mb {
        header |= HEADER_MB;
    }
    if me {
        header |= HEADER_ME;
    }
    if sr {
        header |= HEADER_SR;
    }

    let mut out = vec![header, record_type.len() as u8];
    if sr {
        out.push(payload.len() as u8);
    } else {
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    }
    out.extend_from_slice(&record_type);
    out.extend_from_slice(&payload);
    out
}

fn best_uri_prefix(uri: &str) -> (u8, &str) {
    URI_PREFIXES
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, prefix)| uri.starts_with(**prefix))
        .max_by_key(|(_, prefix)| prefix.len())
        .map(|(code, prefix)| (code as u8, &uri[prefix.len()..]))
        .unwrap_or((0, uri))
}

/// Serializes a message back to raw NDEF bytes (not yet TLV-wrapped).
pub fn build_message(message: &NdefMessage) -> Vec<u8> {
    let mut out = Vec::new();
    let last = message.records.len().saturating_sub(1);
    for (i, record) in message.records.iter().enumerate() {
        out.extend_from_slice(&encode_record(record, i == 0, i == last));
    }
    out
}
