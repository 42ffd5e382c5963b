//! NTAG (NXP Type 2) tag handle: page-addressed memory, `READ`/`FAST_READ`
//! for bulk reads, `WRITE` for single-page writes (spec.md §4.5, §6).

use log::warn;

use crate::device::{CommandChannel, DetectedTag, TagKind};
use crate::error::{Error, HostResult};
use crate::ndef::{self, NdefMessage};

use super::Tag;

const READ: u8 = 0x30;
const FAST_READ: u8 = 0x3A;
const WRITE: u8 = 0xA2;

const CC_PAGE: u32 = 3;
const USER_AREA_START_PAGE: u32 = 4;
const CC_MAGIC: u8 = 0xE1;

/// CC byte 2 (memory-size) values for the three common variants, and the
/// total page count each one reports (spec.md §6: NTAG213=45, NTAG215=135,
/// NTAG216=231).
const NTAG213_CC_SIZE: u8 = 0x12;
const NTAG215_CC_SIZE: u8 = 0x3E;
const NTAG216_CC_SIZE: u8 = 0x6D;

/// Fallback bound for a CC that doesn't match a known variant — NTAG216
/// (the largest common one) tops out at 231 pages.
const MAX_PAGE: u32 = 231;

fn total_pages_from_cc_size(size_byte: u8) -> u32 {
    match size_byte {
        NTAG213_CC_SIZE => 45,
        NTAG215_CC_SIZE => 135,
        NTAG216_CC_SIZE => 231,
        _ => MAX_PAGE,
    }
}

pub struct NtagTag<'a> {
    channel: &'a mut dyn CommandChannel,
    target: u8,
    uid: Vec<u8>,
    max_page: Option<u32>,
    validation: bool,
}

impl<'a> NtagTag<'a> {
    pub fn new(channel: &'a mut dyn CommandChannel, detected: DetectedTag) -> Self {
        Self {
            channel,
            target: detected.target_number,
            uid: detected.uid,
            max_page: None,
            validation: false,
        }
    }

    /// Enables read-back validation of writes (spec.md §6 `Config::validation`).
    pub fn set_validation(&mut self, validation: bool) {
        self.validation = validation;
    }

    /// `READ 0x30 page` — the PN532 always returns 16 bytes (4 pages) of
    /// look-ahead regardless of how much of that range the caller wants.
    fn read_page(&mut self, page: u32) -> HostResult<Vec<u8>> {
        self.channel.data_exchange(self.target, &[READ, page as u8])
    }

    /// `FAST_READ 0x3A start end` — `4*(end-start+1)` bytes in one call.
    pub fn fast_read(&mut self, start: u32, end: u32) -> HostResult<Vec<u8>> {
        self.channel
            .data_exchange(self.target, &[FAST_READ, start as u8, end as u8])
    }

    /// Reads the capability container at page 3. A bad magic byte is
    /// logged but does not fail the read (spec.md §2 supplement). Caches
    /// the variant's total page count from the memory-size byte.
    fn read_capability_container(&mut self) -> HostResult<[u8; 4]> {
        let page = self.read_page(CC_PAGE)?;
        let cc: [u8; 4] = page.get(..4).ok_or(Error::NoNDEF)?.try_into().unwrap();
        if cc[0] != CC_MAGIC {
            warn!(target: "pn532_host::tag::ntag", "unexpected CC magic 0x{:02X} on {:02X?}", cc[0], self.uid);
        }
        self.max_page = Some(total_pages_from_cc_size(cc[2]));
        Ok(cc)
    }

    /// The attached tag's total page count, read from the capability
    /// container on first use and cached afterward.
    fn page_bound(&mut self) -> HostResult<u32> {
        match self.max_page {
            Some(max_page) => Ok(max_page),
            None => {
                self.read_capability_container()?;
                Ok(self.max_page.expect("just populated by read_capability_container"))
            }
        }
    }
}

impl<'a> Tag for NtagTag<'a> {
    fn uid(&self) -> &[u8] {
        &self.uid
    }

    fn kind(&self) -> TagKind {
        TagKind::NTAG
    }

    fn read_block(&mut self, block: u32) -> HostResult<Vec<u8>> {
        let max_page = self.page_bound()?;
        if block >= max_page {
            return Err(Error::BlockOutOfRange { block, max: max_page });
        }
        self.read_page(block)
    }

    fn write_block(&mut self, block: u32, data: &[u8]) -> HostResult<()> {
        let max_page = self.page_bound()?;
        if block >= max_page {
            return Err(Error::BlockOutOfRange { block, max: max_page });
        }
        if data.len() != 4 {
            return Err(Error::Other("NTAG write_block expects exactly 4 bytes".into()));
        }
        let mut args = vec![WRITE, block as u8];
        args.extend_from_slice(data);
        self.channel.data_exchange(self.target, &args)?;

        if self.validation {
            let written = self.read_page(block)?;
            if written.get(..4) != Some(data) {
                return Err(Error::Other(format!("read-back mismatch on page {block}")));
            }
        }
        Ok(())
    }

    fn read_ndef(&mut self) -> HostResult<NdefMessage> {
        self.read_capability_container()?;
        let max_page = self.page_bound()?;

        let mut data = Vec::new();
        let mut page = USER_AREA_START_PAGE;
        loop {
            if page >= max_page {
                return Err(Error::NoNDEF);
            }
            let end = (page + 3).min(max_page - 1);
            data.extend_from_slice(&self.fast_read(page, end)?);
            page = end + 1;

            if let Ok(message) = ndef::extract_message_tlv(&data) {
                return ndef::parse_message(&message);
            }
        }
    }

    fn write_ndef(&mut self, message: &NdefMessage) -> HostResult<()> {
        let wrapped = ndef::wrap_message_tlv(&ndef::build_message(message));
        for (i, chunk) in wrapped.chunks(4).enumerate() {
            let page = USER_AREA_START_PAGE + i as u32;
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.write_block(page, &buf)?;
        }
        Ok(())
    }

    fn debug_info(&self) -> String {
        format!(
            "NTAG uid={} target={}",
            self.uid.iter().map(|b| format!("{b:02X}")).collect::<String>(),
            self.target
        )
    }
}
