//! Growable byte buffer with independent read and write cursors.
//!
//! This is the substrate every packet payload is built on. It knows nothing
//! about framing; it only provides typed little-endian access, both at the
//! cursor (`*_next`) and at an explicit offset (`*_at`). Reads past the end
//! fail with [`CodecError`] instead of panicking so a malformed datagram can
//! be dropped by the caller.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("read of {want} bytes at offset {offset} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        want: usize,
        capacity: usize,
    },
    #[error("seek to {0} is outside the buffer")]
    BadSeek(i64),
}

/// A growable byte buffer with a read cursor and a write cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read: usize,
    write: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps existing bytes; both cursors start at zero.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            read: 0,
            write: 0,
        }
    }

    /// Extends the buffer by `additional` zero bytes.
    pub fn grow(&mut self, additional: usize) {
        self.data.resize(self.data.len() + additional, 0);
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn read_offset(&self) -> usize {
        self.read
    }

    pub fn write_offset(&self) -> usize {
        self.write
    }

    /// Bytes left between the read cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read)
    }

    /// Moves the read cursor, absolutely or relative to its current position.
    pub fn seek(&mut self, offset: i64, relative: bool) -> Result<(), CodecError> {
        let base = if relative { self.read as i64 } else { 0 };
        let target = base + offset;
        if target < 0 || target as usize > self.data.len() {
            return Err(CodecError::BadSeek(offset));
        }
        self.read = target as usize;
        Ok(())
    }

    fn check(&self, offset: usize, want: usize) -> Result<(), CodecError> {
        if offset + want > self.data.len() {
            return Err(CodecError::OutOfBounds {
                offset,
                want,
                capacity: self.data.len(),
            });
        }
        Ok(())
    }

    fn ensure(&mut self, offset: usize, want: usize) {
        if offset + want > self.data.len() {
            self.data.resize(offset + want, 0);
        }
    }

    // Positional reads.

    pub fn read_u8_at(&self, offset: usize) -> Result<u8, CodecError> {
        self.check(offset, 1)?;
        Ok(self.data[offset])
    }

    pub fn read_i16_at(&self, offset: usize) -> Result<i16, CodecError> {
        self.check(offset, 2)?;
        Ok(LittleEndian::read_i16(&self.data[offset..]))
    }

    pub fn read_u16_at(&self, offset: usize) -> Result<u16, CodecError> {
        self.check(offset, 2)?;
        Ok(LittleEndian::read_u16(&self.data[offset..]))
    }

    pub fn read_i32_at(&self, offset: usize) -> Result<i32, CodecError> {
        self.check(offset, 4)?;
        Ok(LittleEndian::read_i32(&self.data[offset..]))
    }

    pub fn read_u32_at(&self, offset: usize) -> Result<u32, CodecError> {
        self.check(offset, 4)?;
        Ok(LittleEndian::read_u32(&self.data[offset..]))
    }

    pub fn read_i64_at(&self, offset: usize) -> Result<i64, CodecError> {
        self.check(offset, 8)?;
        Ok(LittleEndian::read_i64(&self.data[offset..]))
    }

    pub fn read_u64_at(&self, offset: usize) -> Result<u64, CodecError> {
        self.check(offset, 8)?;
        Ok(LittleEndian::read_u64(&self.data[offset..]))
    }

    pub fn read_f32_at(&self, offset: usize) -> Result<f32, CodecError> {
        self.check(offset, 4)?;
        Ok(LittleEndian::read_f32(&self.data[offset..]))
    }

    pub fn read_bytes_at(&self, offset: usize, len: usize) -> Result<&[u8], CodecError> {
        self.check(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    // Cursor reads.

    pub fn read_u8_next(&mut self) -> Result<u8, CodecError> {
        let v = self.read_u8_at(self.read)?;
        self.read += 1;
        Ok(v)
    }

    pub fn read_i16_next(&mut self) -> Result<i16, CodecError> {
        let v = self.read_i16_at(self.read)?;
        self.read += 2;
        Ok(v)
    }

    pub fn read_u16_next(&mut self) -> Result<u16, CodecError> {
        let v = self.read_u16_at(self.read)?;
        self.read += 2;
        Ok(v)
    }

    pub fn read_i32_next(&mut self) -> Result<i32, CodecError> {
        let v = self.read_i32_at(self.read)?;
        self.read += 4;
        Ok(v)
    }

    pub fn read_u32_next(&mut self) -> Result<u32, CodecError> {
        let v = self.read_u32_at(self.read)?;
        self.read += 4;
        Ok(v)
    }

    pub fn read_i64_next(&mut self) -> Result<i64, CodecError> {
        let v = self.read_i64_at(self.read)?;
        self.read += 8;
        Ok(v)
    }

    pub fn read_u64_next(&mut self) -> Result<u64, CodecError> {
        let v = self.read_u64_at(self.read)?;
        self.read += 8;
        Ok(v)
    }

    pub fn read_f32_next(&mut self) -> Result<f32, CodecError> {
        let v = self.read_f32_at(self.read)?;
        self.read += 4;
        Ok(v)
    }

    pub fn read_bytes_next(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        let v = self.read_bytes_at(self.read, len)?.to_vec();
        self.read += len;
        Ok(v)
    }

    // Positional writes. Writing past the end grows the buffer.

    pub fn write_u8_at(&mut self, offset: usize, value: u8) {
        self.ensure(offset, 1);
        self.data[offset] = value;
    }

    pub fn write_i16_at(&mut self, offset: usize, value: i16) {
        self.ensure(offset, 2);
        LittleEndian::write_i16(&mut self.data[offset..], value);
    }

    pub fn write_u16_at(&mut self, offset: usize, value: u16) {
        self.ensure(offset, 2);
        LittleEndian::write_u16(&mut self.data[offset..], value);
    }

    pub fn write_i32_at(&mut self, offset: usize, value: i32) {
        self.ensure(offset, 4);
        LittleEndian::write_i32(&mut self.data[offset..], value);
    }

    pub fn write_u32_at(&mut self, offset: usize, value: u32) {
        self.ensure(offset, 4);
        LittleEndian::write_u32(&mut self.data[offset..], value);
    }

    pub fn write_i64_at(&mut self, offset: usize, value: i64) {
        self.ensure(offset, 8);
        LittleEndian::write_i64(&mut self.data[offset..], value);
    }

    pub fn write_u64_at(&mut self, offset: usize, value: u64) {
        self.ensure(offset, 8);
        LittleEndian::write_u64(&mut self.data[offset..], value);
    }

    pub fn write_f32_at(&mut self, offset: usize, value: f32) {
        self.ensure(offset, 4);
        LittleEndian::write_f32(&mut self.data[offset..], value);
    }

    pub fn write_bytes_at(&mut self, offset: usize, bytes: &[u8]) {
        self.ensure(offset, bytes.len());
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    // Cursor writes.

    pub fn write_u8_next(&mut self, value: u8) {
        self.write_u8_at(self.write, value);
        self.write += 1;
    }

    pub fn write_i16_next(&mut self, value: i16) {
        self.write_i16_at(self.write, value);
        self.write += 2;
    }

    pub fn write_u16_next(&mut self, value: u16) {
        self.write_u16_at(self.write, value);
        self.write += 2;
    }

    pub fn write_i32_next(&mut self, value: i32) {
        self.write_i32_at(self.write, value);
        self.write += 4;
    }

    pub fn write_u32_next(&mut self, value: u32) {
        self.write_u32_at(self.write, value);
        self.write += 4;
    }

    pub fn write_i64_next(&mut self, value: i64) {
        self.write_i64_at(self.write, value);
        self.write += 8;
    }

    pub fn write_u64_next(&mut self, value: u64) {
        self.write_u64_at(self.write, value);
        self.write += 8;
    }

    pub fn write_f32_next(&mut self, value: f32) {
        self.write_f32_at(self.write, value);
        self.write += 4;
    }

    pub fn write_bytes_next(&mut self, bytes: &[u8]) {
        self.write_bytes_at(self.write, bytes);
        self.write += bytes.len();
    }

    // Vectored helpers for the wire layouts that carry arrays.

    pub fn write_u16s_next(&mut self, values: &[u16]) {
        for &v in values {
            self.write_u16_next(v);
        }
    }

    pub fn write_i32s_next(&mut self, values: &[i32]) {
        for &v in values {
            self.write_i32_next(v);
        }
    }

    pub fn write_u64s_next(&mut self, values: &[u64]) {
        for &v in values {
            self.write_u64_next(v);
        }
    }

    pub fn write_f32s_next(&mut self, values: &[f32]) {
        for &v in values {
            self.write_f32_next(v);
        }
    }

    pub fn read_u64s_next(&mut self, count: usize) -> Result<Vec<u64>, CodecError> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_u64_next()?);
        }
        Ok(out)
    }
}
