//! Big-endian byte reader and writer used by the frame and TLV codecs

use crate::errors::{ImbotError, PacketError, Result};

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// Cursor over a byte slice; every read is bounds checked
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ImbotError::InvalidPacket(PacketError::PayloadTooSmall {
                expected: self.offset + len,
                actual: self.bytes.len(),
            }));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.offset..];
        self.offset = self.bytes.len();
        slice
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    /// Field prefixed with a u32 length that counts its own four bytes
    pub fn read_u32_lv(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        if len < 4 {
            return Err(ImbotError::InvalidPacket(PacketError::MalformedHeader));
        }
        self.take(len - 4)
    }

    /// Field prefixed with a plain u16 length
    pub fn read_u16_lv(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u16()? as usize;
        self.take(len)
    }

    pub fn read_u32_lv_string(&mut self) -> Result<String> {
        let bytes = self.read_u32_lv()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ImbotError::invalid_packet("string field is not UTF-8"))
    }

    pub fn read_u16_lv_string(&mut self) -> Result<String> {
        let bytes = self.read_u16_lv()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ImbotError::invalid_packet("string field is not UTF-8"))
    }
}

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

/// Growable big-endian writer
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.write_u32(value as u32)
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(value);
        self
    }

    pub fn write_u32_lv(&mut self, value: &[u8]) -> &mut Self {
        self.write_u32(value.len() as u32 + 4);
        self.write_bytes(value)
    }

    pub fn write_u16_lv(&mut self, value: &[u8]) -> &mut Self {
        let len = value.len().min(u16::MAX as usize);
        self.write_u16(len as u16);
        self.write_bytes(&value[..len])
    }

    /// Write a placeholder u32, returning its offset for [`ByteWriter::patch_u32`]
    pub fn reserve_u32(&mut self) -> usize {
        let offset = self.bytes.len();
        self.write_u32(0);
        offset
    }

    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefixed_fields() {
        let mut writer = ByteWriter::new();
        writer
            .write_u32_lv(b"MessageSvc.PbSendMsg")
            .write_u16_lv(b"ab")
            .write_u8(9);
        let bytes = writer.into_bytes();

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u32_lv_string().unwrap(), "MessageSvc.PbSendMsg");
        assert_eq!(reader.read_u16_lv().unwrap(), b"ab");
        assert_eq!(reader.read_u8().unwrap(), 9);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_short_reads_fail() {
        let mut reader = ByteReader::new(&[0, 0, 0]);
        assert!(reader.read_u32().is_err());

        let mut reader = ByteReader::new(&[0, 0, 0, 2]);
        assert!(reader.read_u32_lv().is_err());
    }

    #[test]
    fn test_patching() {
        let mut writer = ByteWriter::new();
        let at = writer.reserve_u32();
        writer.write_bytes(&[1, 2, 3]);
        let len = writer.len() as u32;
        writer.patch_u32(at, len);
        assert_eq!(writer.into_bytes(), vec![0, 0, 0, 7, 1, 2, 3]);
    }
}
