//! Seams to the outside world: QR rasterization, QR scanning and page
//! composition. The core only ever talks to these traits.
//!
//! [`MemoryChannel`] and [`MemorySink`] are deterministic in-memory stand-ins:
//! a "symbol image" is the payload itself and a "page" is the list of symbols
//! placed on it. The channel can lose, garble or corrupt symbols on the way
//! back, which is how damage is simulated without image libraries.

use crate::chunk::ChunkKey;
use crate::error::Result;
use crate::placement::Slot;
use crate::sizing::SymbolSpec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A symbol the scanner saw but could not read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unreadable symbol: {0}")]
pub struct ReadError(pub String);

pub type ScanResult = std::result::Result<Vec<u8>, ReadError>;

pub trait SymbolEncoder {
    type Image;

    fn encode(&self, payload: &[u8], spec: &SymbolSpec) -> Result<Self::Image>;
}

/// Decodes one page image into the symbols found on it, in no particular
/// order. Missing symbols are simply absent.
pub trait SymbolDecoder {
    type Image;

    fn decode(&self, page: &Self::Image) -> Vec<ScanResult>;
}

/// Text printed on every page.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PageLabel {
    /// 1-based.
    pub page: u32,
    pub pages: u32,
    pub title: String,
    pub created: String,
    /// Short hex prefix of the stream checksum, identifies the backup.
    pub backup_id: String,
}

impl PageLabel {
    pub fn caption(&self) -> String {
        let mut s = format!("Page {}/{}", self.page, self.pages);
        if !self.title.is_empty() {
            s.push_str(&format!(" | {}", self.title));
        }
        if !self.created.is_empty() {
            s.push_str(&format!(" | {}", self.created));
        }
        s.push_str(&format!(" | backup {}", self.backup_id));
        s
    }
}

pub trait PageSink {
    type Image;

    fn begin_page(&mut self, label: &PageLabel) -> Result<()>;
    fn place(&mut self, image: Self::Image, slot: &Slot) -> Result<()>;
    fn end_page(&mut self) -> Result<()>;
}

/// One symbol on an in-memory page.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MemorySymbol {
    pub slot: Slot,
    pub bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MemoryPage {
    pub label: PageLabel,
    pub symbols: Vec<MemorySymbol>,
}

#[derive(Default, Debug)]
pub struct MemorySink {
    pub pages: Vec<MemoryPage>,
}

impl PageSink for MemorySink {
    type Image = Vec<u8>;

    fn begin_page(&mut self, label: &PageLabel) -> Result<()> {
        self.pages.push(MemoryPage { label: label.clone(), symbols: Vec::new() });
        Ok(())
    }

    fn place(&mut self, image: Vec<u8>, slot: &Slot) -> Result<()> {
        if let Some(page) = self.pages.last_mut() {
            page.symbols.push(MemorySymbol { slot: *slot, bytes: image });
        }
        Ok(())
    }

    fn end_page(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What happens to one symbol between printing and scanning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Damage {
    Intact,
    /// Torn off or otherwise not found by the scanner.
    Lost,
    /// Found but reported as a read error.
    Unreadable,
    /// Read with the given bit flipped.
    FlipBit(usize),
}

type DamageFn = Box<dyn Fn(u32, &MemorySymbol) -> Damage + Send + Sync>;

/// Identity "QR codec" over [`MemorySink`] pages.
pub struct MemoryChannel {
    damage: DamageFn,
    reverse: bool,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self { damage: Box::new(|_, _| Damage::Intact), reverse: false }
    }
}

impl MemoryChannel {
    /// `damage` gets the 1-based page number and the symbol.
    pub fn with_damage(damage: impl Fn(u32, &MemorySymbol) -> Damage + Send + Sync + 'static) -> Self {
        Self { damage: Box::new(damage), reverse: false }
    }

    /// Report each page's symbols back to front.
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

impl SymbolEncoder for MemoryChannel {
    type Image = Vec<u8>;

    fn encode(&self, payload: &[u8], spec: &SymbolSpec) -> Result<Vec<u8>> {
        if payload.len() > spec.byte_capacity() {
            return Err(crate::error::QrbError::InvalidConfig(format!(
                "{} byte payload exceeds the {} byte symbol capacity",
                payload.len(),
                spec.byte_capacity()
            )));
        }
        Ok(payload.to_vec())
    }
}

impl SymbolDecoder for MemoryChannel {
    type Image = MemoryPage;

    fn decode(&self, page: &MemoryPage) -> Vec<ScanResult> {
        let mut out: Vec<ScanResult> = Vec::with_capacity(page.symbols.len());
        for sym in &page.symbols {
            match (self.damage)(page.label.page, sym) {
                Damage::Intact => out.push(Ok(sym.bytes.clone())),
                Damage::Lost => {}
                Damage::Unreadable => out.push(Err(ReadError(format!(
                    "symbol at ({}, {}) on page {}",
                    sym.slot.x, sym.slot.y, page.label.page
                )))),
                Damage::FlipBit(bit) => {
                    let mut bytes = sym.bytes.clone();
                    if !bytes.is_empty() {
                        let bit = bit % (bytes.len() * 8);
                        bytes[bit / 8] ^= 1 << (bit % 8);
                    }
                    out.push(Ok(bytes));
                }
            }
        }
        if self.reverse {
            out.reverse();
        }
        out
    }
}

/// Identity of a wire payload, or `None` if it does not parse as a chunk.
/// The full check runs, CRC included, so a corrupted payload gives `None`.
pub fn peek_key(bytes: &[u8]) -> Option<ChunkKey> {
    crate::chunk::Chunk::parse(bytes).ok().map(|c| c.key())
}
