//! TLV (Type-Length-Value) encoding used by login bodies
//!
//! Each entry is a big-endian `u16` tag, a `u16` length and the value. A TLV
//! block starts with a `u16` entry count.

use hashbrown::HashMap;

use crate::errors::{ImbotError, Result};
use crate::protocol::io::{ByteReader, ByteWriter};

/// A single TLV entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvEntry {
    pub tag: u16,
    pub value: Vec<u8>,
}

impl TlvEntry {
    pub fn new(tag: u16, value: Vec<u8>) -> Self {
        Self { tag, value }
    }

    /// Encode this TLV entry to bytes
    pub fn encode_into(&self, writer: &mut ByteWriter) -> Result<()> {
        if self.value.len() > u16::MAX as usize {
            return Err(ImbotError::invalid_packet(format!(
                "TLV {:#x} value too large: {} bytes",
                self.tag,
                self.value.len()
            )));
        }
        writer.write_u16(self.tag);
        writer.write_u16(self.value.len() as u16);
        writer.write_bytes(&self.value);
        Ok(())
    }
}

/// Ordered TLV block builder
#[derive(Debug, Clone, Default)]
pub struct TlvBlock {
    entries: Vec<TlvEntry>,
}

impl TlvBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: u16, value: Vec<u8>) -> &mut Self {
        self.entries.push(TlvEntry::new(tag, value));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count-prefixed encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = ByteWriter::new();
        writer.write_u16(self.entries.len() as u16);
        for entry in &self.entries {
            entry.encode_into(&mut writer)?;
        }
        Ok(writer.into_bytes())
    }
}

/// Decoded TLV block keyed by tag; later duplicates replace earlier ones
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvMap {
    entries: HashMap<u16, Vec<u8>>,
}

impl TlvMap {
    /// Decode a count-prefixed block
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        Self::read_from(&mut reader)
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.read_u16()?;
        let mut entries = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let tag = reader.read_u16()?;
            let value = reader.read_u16_lv()?;
            entries.insert(tag, value.to_vec());
        }
        Ok(Self { entries })
    }

    pub fn get(&self, tag: u16) -> Option<&[u8]> {
        self.entries.get(&tag).map(|v| v.as_slice())
    }

    pub fn contains(&self, tag: u16) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Value of a tag that must be present
    pub fn require(&self, tag: u16) -> Result<&[u8]> {
        self.get(tag)
            .ok_or_else(|| ImbotError::invalid_packet(format!("missing TLV {:#x}", tag)))
    }

    /// Value of a tag that must be a 16-byte key
    pub fn require_key(&self, tag: u16) -> Result<[u8; 16]> {
        let value = self.require(tag)?;
        value.try_into().map_err(|_| {
            ImbotError::invalid_packet(format!(
                "TLV {:#x} has length {}, expected 16",
                tag,
                value.len()
            ))
        })
    }

    pub fn insert(&mut self, tag: u16, value: Vec<u8>) {
        self.entries.insert(tag, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
