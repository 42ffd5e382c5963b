//! FeliCa stub: identity only (spec.md §4.5 — "stub; only advertises
//! identity"). Full FeliCa command support (Read/Write Without Encryption,
//! system code switching) is out of scope.

use crate::device::{DetectedTag, TagKind};
use crate::error::{Error, HostResult};
use crate::ndef::NdefMessage;

use super::Tag;

pub struct FelicaTag {
    uid: Vec<u8>,
}

impl FelicaTag {
    pub fn new(detected: DetectedTag) -> Self {
        Self { uid: detected.uid }
    }
}

fn unsupported() -> Error {
    Error::Other("FeliCa tag handle only exposes identification".to_string())
}

impl Tag for FelicaTag {
    fn uid(&self) -> &[u8] {
        &self.uid
    }

    fn kind(&self) -> TagKind {
        TagKind::FeliCa
    }

    fn read_block(&mut self, _block: u32) -> HostResult<Vec<u8>> {
        Err(unsupported())
    }

    fn write_block(&mut self, _block: u32, _data: &[u8]) -> HostResult<()> {
        Err(unsupported())
    }

    fn read_ndef(&mut self) -> HostResult<NdefMessage> {
        Err(unsupported())
    }

    fn write_ndef(&mut self, _message: &NdefMessage) -> HostResult<()> {
        Err(unsupported())
    }

    fn debug_info(&self) -> String {
        format!(
            "FeliCa uid={}",
            self.uid.iter().map(|b| format!("{b:02X}")).collect::<String>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn exposes_only_identity() {
        let mut tag = FelicaTag::new(DetectedTag {
            kind: TagKind::FeliCa,
            uid: vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
            uid_hex: "0102030405060708".to_string(),
            atqa: [0x01, 0x00],
            sak: 0x00,
            target_number: 1,
            detected_at: Instant::now(),
        });
        assert_eq!(tag.kind(), TagKind::FeliCa);
        assert!(tag.read_block(0).is_err());
        assert!(tag.read_ndef().is_err());
    }
}
