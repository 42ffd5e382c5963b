//! Tag-family polymorphism modelled as a sum type with a shared
//! capability, not inheritance (spec.md §4.5, Design Notes §9).

pub mod felica;
pub mod mifare;
pub mod ntag;

pub use felica::FelicaTag;
pub use mifare::MifareTag;
pub use ntag::NtagTag;

use crate::device::TagKind;
use crate::error::HostResult;
use crate::ndef::NdefMessage;

/// Shared contract every tag family implements; family-specific behaviour
/// (page arithmetic, sector authentication, FeliCa's identity-only stub)
/// lives on the concrete handle.
pub trait Tag {
    fn uid(&self) -> &[u8];
    fn kind(&self) -> TagKind;
    fn read_block(&mut self, block: u32) -> HostResult<Vec<u8>>;
    fn write_block(&mut self, block: u32, data: &[u8]) -> HostResult<()>;
    fn read_ndef(&mut self) -> HostResult<NdefMessage>;
    fn write_ndef(&mut self, message: &NdefMessage) -> HostResult<()>;

    fn write_text(&mut self, text: &str) -> HostResult<()> {
        self.write_ndef(&NdefMessage::text(text))
    }

    fn debug_info(&self) -> String;
}
