/// Memory size with a binary unit.
///
/// Region providers report their block size with this type, and requests for
/// memory are expressed in it.
///
/// # Examples
///
/// ```
/// use smelt_core::util::Size;
///
/// assert_eq!(Size::GB(1).bytes(), 1 << 30);
/// assert!(Size::GB(2).is_multiple_of(Size::GB(1)));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Size {
    /// Size in bytes
    B(usize),
    /// Size in kilobytes (1 KB = 1024 bytes)
    KB(usize),
    /// Size in megabytes (1 MB = 1024 KB)
    MB(usize),
    /// Size in gigabytes (1 GB = 1024 MB)
    GB(usize),
}

impl Size {
    /// Converts this size to bytes.
    pub const fn bytes(&self) -> usize {
        match self {
            Size::B(bytes) => *bytes,
            Size::KB(kb) => *kb * (1 << 10),
            Size::MB(mb) => *mb * (1 << 20),
            Size::GB(gb) => *gb * (1 << 30),
        }
    }

    /// Whether this size is a non-zero multiple of `block`.
    pub const fn is_multiple_of(&self, block: Size) -> bool {
        let block = block.bytes();
        block != 0 && self.bytes() != 0 && self.bytes() % block == 0
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Size::B(bytes) => write!(f, "{} B", bytes),
            Size::KB(kb) => write!(f, "{} KB", kb),
            Size::MB(mb) => write!(f, "{} MB", mb),
            Size::GB(gb) => write!(f, "{} GB", gb),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::util::Size;

    #[test]
    fn size_multiples() {
        assert_eq!(Size::MB(3).bytes(), 3 * (1 << 20));
        assert!(Size::MB(2048).is_multiple_of(Size::GB(1)));
        assert!(!Size::MB(4).is_multiple_of(Size::GB(1)));
        assert!(!Size::B(0).is_multiple_of(Size::KB(4)));
    }
}
