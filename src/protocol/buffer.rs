//! Positioned binary buffer access for protocol messages
//!
//! All integers on the wire are big-endian; strings are null-terminated
//! UTF-8. The reader keeps its cursor so that nested structures (an Update's
//! old tuple followed by its new tuple) parse without length prefixes.

use crate::core::errors::{ReplicationError, ReplicationResult};

/// A buffer reader that manages position and provides typed parsing methods
#[derive(Debug)]
pub struct BufferReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if at least `count` bytes remain
    pub fn has_bytes(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    fn take(&mut self, count: usize) -> ReplicationResult<&'a [u8]> {
        let bytes = self
            .buffer
            .get(self.position..self.position + count)
            .ok_or_else(|| {
                ReplicationError::parse(format!(
                    "Buffer truncated: need {count} bytes at position {}, {} remain",
                    self.position,
                    self.remaining()
                ))
            })?;
        self.position += count;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> ReplicationResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_char(&mut self) -> ReplicationResult<char> {
        Ok(self.take(1)?[0] as char)
    }

    pub fn read_i16(&mut self) -> ReplicationResult<i16> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> ReplicationResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> ReplicationResult<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> ReplicationResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> ReplicationResult<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Read a null-terminated UTF-8 string, consuming the terminator.
    pub fn read_cstr(&mut self) -> ReplicationResult<String> {
        let start = self.position;
        while self.position < self.buffer.len() && self.buffer[self.position] != 0 {
            self.position += 1;
        }

        if self.position >= self.buffer.len() {
            return Err(ReplicationError::parse("String not null-terminated"));
        }

        let value = String::from_utf8_lossy(&self.buffer[start..self.position]).into_owned();
        self.position += 1; // null terminator
        Ok(value)
    }

    /// Read `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> ReplicationResult<Vec<u8>> {
        Ok(self.take(count)?.to_vec())
    }

    /// Read everything from the cursor to the end of the buffer.
    pub fn read_rest(&mut self) -> Vec<u8> {
        let rest = self.buffer[self.position..].to_vec();
        self.position = self.buffer.len();
        rest
    }
}

/// A fixed-size buffer writer for outgoing protocol frames
#[derive(Debug)]
pub struct BufferWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> BufferWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    fn reserve(&mut self, count: usize) -> ReplicationResult<&mut [u8]> {
        if self.position + count > self.buffer.len() {
            return Err(ReplicationError::parse(format!(
                "Write buffer full: need {count} bytes at position {}",
                self.position
            )));
        }
        let slot = &mut self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slot)
    }

    pub fn write_u8(&mut self, value: u8) -> ReplicationResult<()> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> ReplicationResult<()> {
        self.reserve(8)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> ReplicationResult<()> {
        self.reserve(8)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Total bytes written so far
    pub fn bytes_written(&self) -> usize {
        self.position
    }
}
