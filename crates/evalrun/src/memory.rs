//! # Guest Memory View
//!
//! A bounds-checked window over a guest's linear memory.
//!
//! A view borrows the memory's current byte slice, so it cannot outlive the
//! next call into the guest: any call may grow (and move) the memory. Build a
//! fresh view after every guest call and never keep raw offsets around as
//! pointers.

use std::ops::Range;

use crate::error::Error;
use crate::error::Result;

pub struct MemoryView<'a> {
    bytes: &'a mut [u8],
}

impl<'a> MemoryView<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Size of the memory in bytes at the time the view was taken.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn range(&self, offset: u64, len: u64) -> Result<Range<usize>> {
        let oob = || Error::OutOfBoundsAccess {
            offset,
            len,
            memory_size: self.size(),
        };
        let end = offset.checked_add(len).ok_or_else(oob)?;
        if end > self.size() {
            return Err(oob());
        }
        Ok(offset as usize..end as usize)
    }

    pub fn read(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let range = self.range(offset, data.len() as u64)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn read_u32(&self, offset: u64) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.read(offset, 4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn write_u32(&mut self, offset: u64, value: u32) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Returns the bytes from `offset` up to (not including) the first zero byte.
    ///
    /// A string of up to `max_scan` bytes is accepted, so the scan covers at most
    /// `max_scan + 1` bytes including the terminator. It also stops at the end
    /// of memory; hitting either limit without a terminator is `UnterminatedResult`.
    pub fn read_cstr(&self, offset: u64, max_scan: u64) -> Result<&[u8]> {
        if offset >= self.size() {
            return Err(Error::OutOfBoundsAccess {
                offset,
                len: 1,
                memory_size: self.size(),
            });
        }
        let available = self.size() - offset;
        let window = self.read(offset, available.min(max_scan.saturating_add(1)))?;
        match window.iter().position(|&b| b == 0) {
            Some(end) => Ok(&window[..end]),
            None => Err(Error::UnterminatedResult {
                offset,
                scanned: window.len() as u64,
            }),
        }
    }
}
