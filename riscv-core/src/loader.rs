//! Intel-HEX program loader.
//!
//! Grounded on the teacher's ELF loader (`red-planet-cli`'s use of `goblin`): same "parse with the
//! ecosystem crate, copy segments into RAM" shape, swapped to the `ihex` crate per the data
//! model's binary-input format (§6).

use ihex::{Reader, Record};
use thiserror::Error;

use crate::resources::ram::Ram;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("malformed intel-hex record: {0}")]
    Malformed(#[from] ihex::ReaderError),
    #[error("data record at {address:#010x} does not fit in the target memory")]
    OutOfRange { address: u32 },
    #[error("extended segment addressing is not supported")]
    UnsupportedExtendedSegmentAddress,
}

/// Result of loading an Intel-HEX image: the bytes it wrote into `ram`, and the entry point
/// derived from the End Of File record's start-address field, if one was present.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoadResult {
    pub entry_point: Option<u32>,
}

/// Loads `source` (the textual contents of an Intel-HEX file) into `ram`, returning the derived
/// entry point, if any. Addresses are relocated using `:02` extended linear address records; `:04`
/// extended segment address records are rejected as unsupported (flat RV32/RV64 address spaces
/// have no use for segment:offset addressing).
pub fn load(source: &str, ram: &mut Ram) -> Result<LoadResult, LoaderError> {
    let mut upper_linear_address: u32 = 0;
    let mut entry_point = None;

    for record in Reader::new(source) {
        match record? {
            Record::Data { offset, value } => {
                let address = (upper_linear_address << 16) | u32::from(offset);
                ram.load(address as usize, &value)
                    .map_err(|_| LoaderError::OutOfRange { address })?;
            }
            Record::ExtendedLinearAddress(upper) => {
                upper_linear_address = u32::from(upper);
            }
            Record::ExtendedSegmentAddress(_) => {
                return Err(LoaderError::UnsupportedExtendedSegmentAddress);
            }
            Record::StartLinearAddress(addr) => {
                entry_point = Some(addr);
            }
            Record::StartSegmentAddress { .. } => {
                return Err(LoaderError::UnsupportedExtendedSegmentAddress);
            }
            Record::EndOfFile => break,
        }
    }

    Ok(LoadResult { entry_point })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Peripheral;
    use crate::memory::AccessSize;

    #[test]
    fn test_loads_data_record() {
        let hex = ":03000000010203F7\n:00000001FF\n";
        let mut ram = Ram::new(16).unwrap();
        let result = load(hex, &mut ram).unwrap();
        assert_eq!(None, result.entry_point);
        assert_eq!(Ok(1), ram.read(0, AccessSize::Byte));
        assert_eq!(Ok(2), ram.read(1, AccessSize::Byte));
        assert_eq!(Ok(3), ram.read(2, AccessSize::Byte));
    }

    #[test]
    fn test_entry_point_from_start_linear_address() {
        let hex = ":0400000500001000E7\n:00000001FF\n";
        let mut ram = Ram::new(16).unwrap();
        let result = load(hex, &mut ram).unwrap();
        assert_eq!(Some(0x1000), result.entry_point);
    }

    #[test]
    fn test_out_of_range_data_is_an_error() {
        let hex = ":0200100001020D\n:00000001FF\n";
        let mut ram = Ram::new(16).unwrap();
        assert!(load(hex, &mut ram).is_err());
    }
}
