/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Cache line size (64 bytes) for x86_64
pub const CL_SIZE: usize = 64;

/// Size of a pointer stored in a pointer-chase element
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Number of address bits covered by a 1 GiB huge page
pub const HUGE_1GB_OFFSET_BITS: u32 = 30;

/// Base address hint for huge page mappings
pub const BASE_MSB: *mut libc::c_void = 0x7f2300000000 as *mut libc::c_void;

/// DRAM refresh interval in nanoseconds
pub const T_REFI_NS: f64 = 7800.0;

/// Width of the label column in report rows
pub const LABEL_WIDTH: usize = 48;

/// Width of the value column in report rows
pub const COLUMN_WIDTH: usize = 16;

/// Maximum width of a histogram bar
pub const TERMINAL_WIDTH: usize = 180;
