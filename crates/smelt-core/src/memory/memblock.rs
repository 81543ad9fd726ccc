use std::ptr::null_mut;

use super::BytePointer;
use libc::{MAP_ANONYMOUS, MAP_POPULATE, MAP_PRIVATE};
use log::debug;

/// A managed memory region.
///
/// Represents a mapped memory block with pointer and length. Addresses handed
/// out by pools and patterns point into such a block.
#[derive(Clone, Debug)]
pub struct Memory {
    /// Block pointer
    pub ptr: *mut u8,
    /// Block length in bytes
    pub len: usize,
}

unsafe impl Send for Memory {}

impl Memory {
    /// Creates a new memory block with the given pointer and length.
    pub fn new(ptr: *mut u8, len: usize) -> Self {
        Memory { ptr, len }
    }

    /// Allocates memory using mmap.
    ///
    /// Creates an anonymous, populated and zeroed region of the specified
    /// size with read/write permissions.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if mmap fails.
    pub fn mmap(size: usize) -> std::result::Result<Self, std::io::Error> {
        let p = unsafe {
            libc::mmap(
                null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_POPULATE,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        unsafe { libc::memset(p, 0x00, size) };
        debug!("mapped {} bytes at {:p}", size, p);
        Ok(Memory::new(p as *mut u8, size))
    }

    /// Deallocates the memory block.
    ///
    /// Unmaps the memory region using munmap. Consumes self.
    pub fn dealloc(self) {
        unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
    }
}

impl BytePointer for Memory {
    fn addr(&self, offset: usize) -> *mut u8 {
        assert!(
            offset < self.len,
            "Memory::addr failed. Offset {} >= {}",
            offset,
            self.len
        );
        unsafe { self.ptr.byte_add(offset) }
    }
    fn ptr(&self) -> *mut u8 {
        self.ptr
    }
    fn len(&self) -> usize {
        self.len
    }
}
