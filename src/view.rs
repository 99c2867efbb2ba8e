//! Address-indexed, read-only views over section bytes.

use std::ops::Range;

use crate::{Address, DisassemblyError};

/// A contiguous run of bytes at a known load address.
///
/// The loader owns the bytes; a view only borrows them for one decode pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteView<'a> {
    base: Address,
    bytes: &'a [u8],
}

impl<'a> ByteView<'a> {
    /// Create a view of `bytes` loaded at `base`.
    ///
    /// Fails if the view would extend past the end of the address space.
    pub fn new(base: Address, bytes: &'a [u8]) -> Result<Self, DisassemblyError> {
        if base.checked_add(bytes.len() as u64).is_none() {
            return Err(DisassemblyError::AddressOverflow {
                base,
                len: bytes.len(),
            });
        }
        Ok(Self { base, bytes })
    }

    /// First address covered by the view
    pub fn base(&self) -> Address {
        self.base
    }

    /// One past the last covered address
    pub fn end(&self) -> Address {
        self.base + self.bytes.len() as Address
    }

    /// Number of bytes in the view
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the view covers no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The backing bytes
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Covered address range
    pub fn range(&self) -> Range<Address> {
        self.base..self.end()
    }

    /// Whether `addr` lies inside the view
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Offset of `addr` from the start of the view
    pub fn offset_of(&self, addr: Address) -> Option<usize> {
        if self.contains(addr) {
            Some((addr - self.base) as usize)
        } else {
            None
        }
    }

    /// Up to `max_len` bytes starting at `addr`; shorter near the end of the view.
    pub fn window(&self, addr: Address, max_len: usize) -> Option<&'a [u8]> {
        let start = self.offset_of(addr)?;
        let end = start.saturating_add(max_len).min(self.bytes.len());
        Some(&self.bytes[start..end])
    }

    /// Whether two views share at least one address
    pub fn overlaps(&self, other: &ByteView<'_>) -> bool {
        !self.is_empty() && !other.is_empty() && self.base < other.end() && other.base < self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_clamps_at_tail() {
        let bytes = [0x90, 0x31, 0xc0];
        let view = ByteView::new(0x1000, &bytes).unwrap();

        assert_eq!(view.window(0x1000, 15), Some(&bytes[..]));
        assert_eq!(view.window(0x1002, 15), Some(&bytes[2..]));
        assert_eq!(view.window(0x1001, 1), Some(&bytes[1..2]));
        assert_eq!(view.window(0x1003, 15), None);
        assert_eq!(view.window(0x0fff, 15), None);
    }

    #[test]
    fn test_bounds() {
        let bytes = [0u8; 16];
        let view = ByteView::new(0x2000, &bytes).unwrap();

        assert_eq!(view.end(), 0x2010);
        assert_eq!(view.range(), 0x2000..0x2010);
        assert!(view.contains(0x200f));
        assert!(!view.contains(0x2010));
        assert_eq!(view.offset_of(0x2004), Some(4));
    }

    #[test]
    fn test_rejects_address_overflow() {
        let bytes = [0u8; 4];
        assert!(ByteView::new(u64::MAX - 1, &bytes).is_err());
        assert!(ByteView::new(u64::MAX - 4, &bytes).is_ok());
    }

    #[test]
    fn test_overlap() {
        let a = [0u8; 8];
        let b = [0u8; 8];
        let first = ByteView::new(0x1000, &a).unwrap();
        let adjacent = ByteView::new(0x1008, &b).unwrap();
        let inside = ByteView::new(0x1004, &b).unwrap();

        assert!(!first.overlaps(&adjacent));
        assert!(first.overlaps(&inside));
        assert!(inside.overlaps(&first));
    }
}
