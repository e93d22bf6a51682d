use std::fmt::Display;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::Serialize;

use crate::{align_page_down, align_page_up, Word};

pub type RawPointer = *mut std::ffi::c_void;

/// An address in the traced process.
///
/// Target addresses are plain numbers to the debugger; they are never
/// dereferenced locally. The newtype keeps them apart from lengths and
/// register values in signatures and formats them as pointers.
#[derive(Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct Addr(u64);

impl Addr {
    pub const NULL: Addr = Addr(0);

    pub fn usize(self) -> usize {
        self.0 as usize
    }

    pub fn u64(self) -> u64 {
        self.0
    }

    pub fn raw_pointer(self) -> RawPointer {
        self.0 as RawPointer
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// AArch64 instructions are 32 bits wide and must be 4-byte aligned.
    pub fn is_instruction_aligned(self) -> bool {
        self.0 & 0x3 == 0
    }

    pub fn page_start(self) -> Addr {
        Addr(align_page_down(self.0))
    }

    pub fn page_end(self) -> Addr {
        Addr(align_page_up(self.0))
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", { self.0 })
    }
}

impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl Add<u64> for Addr {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Add<usize> for Addr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs as u64)
    }
}

impl AddAssign<u64> for Addr {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub for Addr {
    type Output = u64;
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl Sub<u64> for Addr {
    type Output = Self;
    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl SubAssign<u64> for Addr {
    fn sub_assign(&mut self, rhs: u64) {
        self.0 -= rhs;
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value)
    }
}

impl From<usize> for Addr {
    fn from(value: usize) -> Self {
        Addr(value as u64)
    }
}

impl From<RawPointer> for Addr {
    fn from(value: RawPointer) -> Self {
        Addr(value as u64)
    }
}

impl From<Addr> for u64 {
    fn from(value: Addr) -> Self {
        value.0
    }
}

impl From<Addr> for RawPointer {
    fn from(value: Addr) -> Self {
        value.raw_pointer()
    }
}

impl From<Word> for Addr {
    fn from(value: Word) -> Self {
        Addr(value as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addr_arithmetic() {
        let a = Addr::from(0x1000u64);
        assert_eq!((a + 0x20u64).u64(), 0x1020);
        assert_eq!((a - 0x800u64).u64(), 0x800);
        assert_eq!(a + 0x20u64 - a, 0x20);
    }

    #[test]
    fn test_addr_display() {
        let a = Addr::from(0x1234u64);
        assert_eq!(format!("{a}"), "0x0000000000001234");
    }

    #[test]
    fn test_instruction_alignment() {
        assert!(Addr::from(0x1000u64).is_instruction_aligned());
        assert!(Addr::from(0x1004u64).is_instruction_aligned());
        assert!(!Addr::from(0x1002u64).is_instruction_aligned());
        assert!(!Addr::from(0x1001u64).is_instruction_aligned());
    }

    #[test]
    fn test_page_rounding() {
        let page = crate::page_size();
        let a = Addr::from(page + 0x234);
        assert_eq!(a.page_start().u64(), page);
        assert_eq!(a.page_end().u64(), 2 * page);
        assert_eq!(a.page_start().u64() % page, 0);
        assert!(a.page_start() <= a && a <= a.page_end());
    }
}
