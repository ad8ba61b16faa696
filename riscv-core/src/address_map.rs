//! Generic map of non-overlapping 64-bit address ranges to values, used to route bus accesses.

use std::cmp::Ordering;
use thiserror::Error;

/// An inclusive range of byte addresses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AddressRange {
    start: u64,
    len: u64,
}

impl AddressRange {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.start + self.len - 1
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr <= self.end()
    }
}

/// Map of non-overlapping [`AddressRange`]s to values of type `T`.
#[derive(Debug)]
pub struct AddressMap<T> {
    ordered_ranges: Vec<(AddressRange, T)>,
}

impl<T> Default for AddressMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AddressMap<T> {
    pub fn new() -> Self {
        Self {
            ordered_ranges: Vec::new(),
        }
    }

    /// Maps `range` to `value`, rejecting the insertion if it overlaps an already-mapped range.
    pub fn insert(&mut self, range: AddressRange, value: T) -> Result<(), AddressMapError> {
        let index = self
            .ordered_ranges
            .partition_point(|(r, _)| r.start() < range.start());
        if let Some((prev, _)) = index.checked_sub(1).and_then(|i| self.ordered_ranges.get(i)) {
            if prev.end() >= range.start() {
                return Err(AddressMapError::OverlappingAddressRanges);
            }
        }
        if let Some((next, _)) = self.ordered_ranges.get(index) {
            if next.start() <= range.end() {
                return Err(AddressMapError::OverlappingAddressRanges);
            }
        }
        self.ordered_ranges.insert(index, (range, value));
        Ok(())
    }

    /// Returns the range containing `addr` and its mapped value, or `None` if `addr` is vacant.
    pub fn get(&self, addr: u64) -> Option<(AddressRange, &T)> {
        self.ordered_ranges
            .binary_search_by(|(range, _)| {
                if addr < range.start() {
                    Ordering::Greater
                } else if addr > range.end() {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()
            .map(|index| {
                let (range, value) = &self.ordered_ranges[index];
                (*range, value)
            })
    }

    /// Mutable counterpart to [`AddressMap::get`].
    pub fn get_mut(&mut self, addr: u64) -> Option<(AddressRange, &mut T)> {
        let index = self
            .ordered_ranges
            .binary_search_by(|(range, _)| {
                if addr < range.start() {
                    Ordering::Greater
                } else if addr > range.end() {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()?;
        let (range, value) = &mut self.ordered_ranges[index];
        Some((*range, value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.ordered_ranges.iter_mut().map(|(_, value)| value)
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AddressMapError {
    #[error("address range overlaps with a previously mapped address range")]
    OverlappingAddressRanges,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_vacant() {
        let map: AddressMap<u32> = AddressMap::new();
        assert!(map.get(0x1000).is_none());
    }

    #[test]
    fn test_insert_and_get() {
        let mut map = AddressMap::new();
        map.insert(AddressRange::new(0x1000, 0x100), "ram").unwrap();
        let (range, value) = map.get(0x1050).unwrap();
        assert_eq!(0x1000, range.start());
        assert_eq!(&"ram", value);
        assert!(map.get(0x2000).is_none());
    }

    #[test]
    fn test_rejects_overlap() {
        let mut map = AddressMap::new();
        map.insert(AddressRange::new(0x1000, 0x100), 1).unwrap();
        assert_eq!(
            Err(AddressMapError::OverlappingAddressRanges),
            map.insert(AddressRange::new(0x1080, 0x100), 2)
        );
    }
}
