//! A trivial UART-like output device: byte writes are concatenated into a string.

use crate::bus::Peripheral;
use crate::memory::{AccessSize, MemoryError};

/// Single-register write-only output device. Every byte written (regardless of access width, only
/// the low byte is taken) is appended to an internal buffer, mirroring the end-to-end scenarios'
/// trace device at 0x40000000.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Trace {
    output: Vec<u8>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything written so far, as a lossy UTF-8 string.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.output
    }
}

impl Peripheral for Trace {
    fn read(&mut self, _offset: u64, _size: AccessSize) -> Result<u32, MemoryError> {
        Ok(0)
    }

    fn write(&mut self, _offset: u64, value: u32, _size: AccessSize) -> Result<(), MemoryError> {
        self.output.push(value as u8);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_concatenate() {
        let mut trace = Trace::new();
        trace.write(0, b'h' as u32, AccessSize::Byte).unwrap();
        trace.write(0, b'i' as u32, AccessSize::Byte).unwrap();
        assert_eq!("hi", trace.output());
    }
}
