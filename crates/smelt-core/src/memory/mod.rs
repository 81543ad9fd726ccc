//! The `memory` module provides abstractions over the region smelt works in
//! and the DRAM geometry of its addresses.
//!
//! The `memory` module provides the following abstractions:
//! - `Region`: The `(base, size)` window all addresses are drawn from.
//! - `Memory`: A managed, mapped memory block backing a region.
//! - `BytePointer`: A trait for accessing memory as a byte pointer.
//! - `Coordinate`, `CoordinateMap`, `CoordinateMaps`: Translation between addresses and DRAM coordinates.
//! - `Constraints`: Per-coordinate filters with wildcards.
//! - `MapConfig`: Bit mask configuration loaded from JSON or `.conf` files.
//! - `AddressPool`: A multiset of candidate addresses to draw from without replacement.
mod coord;
mod map_config;
mod memblock;
mod pool;

pub use self::coord::{
    Constraints, Coordinate, CoordinateMap, CoordinateMaps, MAX_NUM_MASKS, NUM_COORDINATES,
};
pub use self::map_config::{BitDef, ConfigError, MapConfig};
pub use self::memblock::Memory;
pub use self::pool::{AddressPool, MAX_POOL_SIZE, PoolError, free_bits};

use crate::util::CL_SIZE;

/// An address inside the mapped region.
pub type Address = usize;

/// A contiguous window of the address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// First address
    pub base: Address,
    /// Length in bytes
    pub size: usize,
}

impl Region {
    /// Creates a region of `size` bytes starting at `base`.
    pub const fn new(base: Address, size: usize) -> Self {
        Region { base, size }
    }

    /// One past the last address.
    pub const fn end(&self) -> Address {
        self.base + self.size
    }

    /// Whether `addr` lies inside the region.
    pub const fn contains(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Every cache-line address of the region in ascending order.
    pub fn lines(&self) -> impl Iterator<Item = Address> + use<> {
        (self.base..self.end()).step_by(CL_SIZE)
    }

    /// A uniformly random cache-line address of the region.
    pub fn random_line(&self, rng: &mut impl rand::Rng) -> Address {
        self.base + rng.random_range(0..self.size / CL_SIZE) * CL_SIZE
    }
}

/// Trait for accessing memory as a byte pointer.
///
/// Provides low-level access to memory regions with byte-level addressing.
#[allow(clippy::len_without_is_empty)]
pub trait BytePointer {
    /// Returns a mutable pointer to the byte at the given offset.
    ///
    /// # Safety
    ///
    /// The returned pointer is valid only while the memory region exists.
    /// Dereferencing requires unsafe code and proper synchronization.
    fn addr(&self, offset: usize) -> *mut u8;

    /// Returns a mutable pointer to the start of the memory region.
    fn ptr(&self) -> *mut u8;

    /// Returns the total length of the memory region in bytes.
    fn len(&self) -> usize;

    /// The region covered by this memory.
    fn region(&self) -> Region {
        Region::new(self.ptr() as Address, self.len())
    }
}
