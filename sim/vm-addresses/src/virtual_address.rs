use core::fmt;

/// A 32-bit simulated virtual address.
///
/// The value is opaque to callers; only an [`AddressLayout`](crate::AddressLayout)
/// knows how to split it into directory index, table index and page offset.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

/// A virtual page number, i.e. the address with the offset bits shifted out.
///
/// The same number indexes the virtual slot bitmap and serves as the TLB tag.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageNumber(u32);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// `true` for address zero, which is never handed out by the allocator.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The address `bytes` further on, or `None` past the end of the 32-bit space.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, bytes: u32) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress(0x{:08X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<VirtualAddress> for u32 {
    #[inline]
    fn from(value: VirtualAddress) -> Self {
        value.0
    }
}

impl PageNumber {
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The page `n` pages further on, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u32) -> Option<Self> {
        match self.0.checked_add(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page #{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_fixed_width_hex() {
        let va = VirtualAddress::new(0x1000);
        assert_eq!(format!("{va}"), "0x00001000");
        assert_eq!(format!("{va:?}"), "VirtualAddress(0x00001000)");
    }

    #[test]
    fn checked_add_stops_at_the_end_of_the_address_space() {
        let va = VirtualAddress::new(u32::MAX - 1);
        assert_eq!(va.checked_add(1), Some(VirtualAddress::new(u32::MAX)));
        assert_eq!(va.checked_add(2), None);
        assert!(VirtualAddress::default().is_null());
    }
}
