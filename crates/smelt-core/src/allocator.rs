//! Memory region providers.
//!
//! This module defines the [`RegionAllocator`] trait and the [`alloc_memory`]
//! entry point for obtaining the large, physically contiguous region that
//! all pools and patterns are drawn from.

use crate::memory::Memory;
use crate::util::Size;
use crate::util::compact_mem;
use log::{info, warn};

/// Trait for providers of physically contiguous memory regions.
///
/// Address bits below the block size of a provider are physical address bits,
/// which is what makes the coordinate maps applicable to virtual addresses.
pub trait RegionAllocator {
    /// The error type returned by allocation operations.
    type Error: std::error::Error;

    /// Size of one physically contiguous block.
    fn block_size(&self) -> Size;

    /// Allocates a region of `size` bytes.
    ///
    /// # Arguments
    ///
    /// * `size` - The total size of memory to allocate. Must be a multiple of [`block_size()`](RegionAllocator::block_size).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying mapping fails.
    fn alloc_region(&mut self, size: Size) -> Result<Memory, Self::Error>;
}

/// Allocate memory using an allocation strategy.
///
/// Compacts memory first, so that huge page reservations are more likely to
/// succeed. A failed compaction is only logged.
///
/// # Panics
///
/// Panics if `size` is not a non-zero multiple of the allocator's block size.
///
/// # Errors
///
/// Returns the allocator's error if the allocation fails.
pub fn alloc_memory<E: std::error::Error>(
    allocator: &mut dyn RegionAllocator<Error = E>,
    size: Size,
) -> Result<Memory, E> {
    assert!(
        size.is_multiple_of(allocator.block_size()),
        "Size {} must be a non-zero multiple of block size {}",
        size,
        allocator.block_size()
    );

    if let Err(e) = compact_mem() {
        warn!("Memory compaction failed: {:?}", e);
    }
    let memory = allocator.alloc_region(size)?;
    info!("allocated {} at {:p}", size, memory.ptr);
    Ok(memory)
}
