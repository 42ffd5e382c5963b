//! MIFARE Classic tag handle: sector-trailer arithmetic and automatic
//! key-provider authentication (spec.md §4.5, §6).

use std::collections::HashMap;

use crate::device::{CommandChannel, DetectedTag, TagKind};
use crate::error::{Error, HostResult};
use crate::ndef::{self, NdefMessage};

use super::Tag;

const READ: u8 = 0x30;
const WRITE: u8 = 0xA0;
const AUTH_A: u8 = 0x60;

/// Tried in order against key A; the first to authenticate wins and is
/// cached per sector (spec.md §4.5).
const FALLBACK_KEYS: [[u8; 6]; 4] = [
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
    [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
];

/// Safety bound covering a 4K card (256 blocks); 1K cards stop well short.
const MAX_BLOCK: u32 = 256;

/// `sector = block / 4` for sectors 0–31 (blocks 0–127, 4 blocks each);
/// above block 128, each sector is 16 blocks.
pub fn sector_of(block: u32) -> u8 {
    if block < 128 {
        (block / 4) as u8
    } else {
        (32 + (block - 128) / 16) as u8
    }
}

/// The trailer block of `sector` — the last block in that sector.
pub fn trailer_of(sector: u8) -> u32 {
    if sector < 32 {
        sector as u32 * 4 + 3
    } else {
        128 + (sector as u32 - 32) * 16 + 15
    }
}

pub struct MifareTag<'a> {
    channel: &'a mut dyn CommandChannel,
    target: u8,
    uid: Vec<u8>,
    sak: u8,
    key_cache: HashMap<u8, [u8; 6]>,
    validation: bool,
}

impl<'a> MifareTag<'a> {
    pub fn new(channel: &'a mut dyn CommandChannel, detected: DetectedTag) -> Self {
        Self {
            channel,
            target: detected.target_number,
            uid: detected.uid,
            sak: detected.sak,
            key_cache: HashMap::new(),
            validation: false,
        }
    }

    /// Enables read-back validation of writes (spec.md §6 `Config::validation`).
    pub fn set_validation(&mut self, validation: bool) {
        self.validation = validation;
    }

    /// The 4-byte UID form MIFARE authentication expects — a truncation of
    /// a longer cascaded UID (spec.md §6).
    fn uid4(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        let n = self.uid.len().min(4);
        out[..n].copy_from_slice(&self.uid[..n]);
        out
    }

    fn authenticate(&mut self, sector: u8) -> HostResult<()> {
        if self.key_cache.contains_key(&sector) {
            return Ok(());
        }
        let trailer = trailer_of(sector);
        let uid = self.uid4();
        for key in FALLBACK_KEYS {
            let mut args = vec![AUTH_A, trailer as u8];
            args.extend_from_slice(&uid);
            args.extend_from_slice(&key);
            if self.channel.data_exchange(self.target, &args).is_ok() {
                self.key_cache.insert(sector, key);
                return Ok(());
            }
        }
        Err(Error::AuthenticationFailed { sector })
    }
}

impl<'a> Tag for MifareTag<'a> {
    fn uid(&self) -> &[u8] {
        &self.uid
    }

    fn kind(&self) -> TagKind {
        TagKind::MIFARE
    }

    fn read_block(&mut self, block: u32) -> HostResult<Vec<u8>> {
        if block >= MAX_BLOCK {
            return Err(Error::BlockOutOfRange { block, max: MAX_BLOCK });
        }
        self.authenticate(sector_of(block))?;
        self.channel.data_exchange(self.target, &[READ, block as u8])
    }

    fn write_block(&mut self, block: u32, data: &[u8]) -> HostResult<()> {
        if block >= MAX_BLOCK {
            return Err(Error::BlockOutOfRange { block, max: MAX_BLOCK });
        }
        let sector = sector_of(block);
        if block == trailer_of(sector) {
            return Err(Error::WriteProtected { block });
        }
        if data.len() != 16 {
            return Err(Error::Other("MIFARE write_block expects exactly 16 bytes".into()));
        }
        self.authenticate(sector)?;
        let mut args = vec![WRITE, block as u8];
        args.extend_from_slice(data);
        self.channel.data_exchange(self.target, &args)?;

        if self.validation {
            let written = self.channel.data_exchange(self.target, &[READ, block as u8])?;
            if written.get(..16) != Some(data) {
                return Err(Error::Other(format!("read-back mismatch on block {block}")));
            }
        }
        Ok(())
    }

    fn read_ndef(&mut self) -> HostResult<NdefMessage> {
        let mut data = Vec::new();
        let mut block = 4u32; // sector 1 onwards
        loop {
            if block >= MAX_BLOCK {
                return Err(Error::NoNDEF);
            }
            let sector = sector_of(block);
            if block == trailer_of(sector) {
                block += 1;
                continue;
            }
            data.extend_from_slice(&self.read_block(block)?);
            block += 1;

            if let Ok(message) = ndef::extract_message_tlv(&data) {
                return ndef::parse_message(&message);
            }
        }
    }

    fn write_ndef(&mut self, message: &NdefMessage) -> HostResult<()> {
        self.key_cache.clear(); // reauthenticate per sector for this write session
        let wrapped = ndef::wrap_message_tlv(&ndef::build_message(message));
        let mut block = 4u32;
        for chunk in wrapped.chunks(16) {
            let sector = sector_of(block);
            if block == trailer_of(sector) {
                block += 1;
            }
            let mut buf = [0u8; 16];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.write_block(block, &buf)?;
            block += 1;
        }
        Ok(())
    }

    fn debug_info(&self) -> String {
        format!(
            "MIFARE uid={} sak=0x{:02X} target={}",
            self.uid.iter().map(|b| format!("{b:02X}")).collect::<String>(),
            self.sak,
            self.target
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sector_of_covers_1k_and_4k_regions() {
        assert_eq!(sector_of(0), 0);
        assert_eq!(sector_of(3), 0);
        assert_eq!(sector_of(4), 1);
        assert_eq!(sector_of(127), 31);
        assert_eq!(sector_of(128), 32);
        assert_eq!(sector_of(143), 32);
        assert_eq!(sector_of(144), 33);
    }

    #[test]
    fn trailer_of_matches_sector_boundaries() {
        assert_eq!(trailer_of(0), 3);
        assert_eq!(trailer_of(1), 7);
        assert_eq!(trailer_of(31), 127);
        assert_eq!(trailer_of(32), 143);
        assert_eq!(trailer_of(33), 159);
    }

    struct FakeChannel {
        accepted_key: [u8; 6],
        blocks: HashMap<u32, Vec<u8>>,
        auth_calls: u32,
    }

    impl CommandChannel for FakeChannel {
        fn data_exchange(&mut self, _target: u8, args: &[u8]) -> HostResult<Vec<u8>> {
            match args[0] {
                AUTH_A => {
                    self.auth_calls += 1;
                    let key = &args[args.len() - 6..];
                    if key == self.accepted_key {
                        Ok(vec![])
                    } else {
                        Err(Error::AuthenticationFailed { sector: 0 })
                    }
                }
                READ => Ok(self.blocks.get(&(args[1] as u32)).cloned().unwrap_or(vec![0u8; 16])),
                WRITE => {
                    self.blocks.insert(args[1] as u32, args[2..].to_vec());
                    Ok(vec![])
                }
                _ => panic!("unexpected opcode"),
            }
        }
    }

    fn detected() -> DetectedTag {
        DetectedTag {
            kind: TagKind::MIFARE,
            uid: vec![0x12, 0x34, 0x56, 0x78],
            uid_hex: "12345678".to_string(),
            atqa: [0x00, 0x04],
            sak: 0x08,
            target_number: 1,
            detected_at: Instant::now(),
        }
    }

    #[test]
    fn falls_back_through_keys_until_one_authenticates() {
        let mut channel = FakeChannel {
            accepted_key: FALLBACK_KEYS[2],
            blocks: HashMap::new(),
            auth_calls: 0,
        };
        let mut tag = MifareTag::new(&mut channel, detected());
        tag.read_block(4).unwrap();
        assert_eq!(channel.auth_calls, 3); // FF.. and 00.. rejected, A0A1.. accepted
    }

    #[test]
    fn caches_the_working_key_per_sector() {
        let mut channel = FakeChannel {
            accepted_key: FALLBACK_KEYS[0],
            blocks: HashMap::new(),
            auth_calls: 0,
        };
        let mut tag = MifareTag::new(&mut channel, detected());
        tag.read_block(4).unwrap();
        tag.read_block(5).unwrap();
        assert_eq!(channel.auth_calls, 1);
    }

    #[test]
    fn refuses_to_write_a_trailer_block() {
        let mut channel = FakeChannel {
            accepted_key: FALLBACK_KEYS[0],
            blocks: HashMap::new(),
            auth_calls: 0,
        };
        let mut tag = MifareTag::new(&mut channel, detected());
        let err = tag.write_block(7, &[0u8; 16]).unwrap_err();
        assert!(matches!(err, Error::WriteProtected { block: 7 }));
    }
}
