use lazy_static::lazy_static;
use libc::{MAP_FIXED, MAP_HUGE_1GB, MAP_HUGETLB, MAP_POPULATE, MAP_PRIVATE, O_CREAT, O_RDWR};
use log::{debug, info};
use smelt_core::allocator::RegionAllocator;
use smelt_core::memory::Memory;
use smelt_core::util::{BASE_MSB, Size};
use std::ffi::{CString, c_void};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
// https://www.kernel.org/doc/Documentation/vm/hugetlbpage.txt
//
// The output of "cat /proc/meminfo" will include lines like:
// ...
// HugePages_Total: uuu
// HugePages_Free:  vvv
// HugePages_Rsvd:  www
// HugePages_Surp:  xxx
// Hugepagesize:    yyy kB
// Hugetlb:         zzz kB

const MEMINFO_PATH: &str = "/proc/meminfo";
const TOKEN: &str = "Hugepagesize:";

/// Default location of the backing file.
pub const DEFAULT_HUGEPAGE_PATH: &str = "/mnt/huge/1gb-file";

lazy_static! {
    static ref HUGEPAGE_SIZE: Option<usize> = {
        let buf = File::open(MEMINFO_PATH).map_or("".to_owned(), |mut f| {
            let mut s = String::new();
            let _ = f.read_to_string(&mut s);
            s
        });
        parse_hugepage_size(&buf)
    };
}

fn parse_hugepage_size(s: &str) -> Option<usize> {
    let line = s.lines().find(|line| line.starts_with(TOKEN))?;
    let mut parts = line.strip_prefix(TOKEN)?.split_whitespace();
    let size = parts.next()?.parse::<usize>().ok()?;
    let unit = match parts.next() {
        Some("kB") => 1024,
        _ => 1,
    };
    Some(size * unit)
}

/// The system's default huge page size, if `/proc/meminfo` reports one.
///
/// The allocator requests 1 GiB pages explicitly, so this may differ from its
/// block size.
pub fn default_hugepage_size() -> Option<Size> {
    HUGEPAGE_SIZE.map(Size::B)
}

/// Region provider mapping one 1 GiB huge page.
///
/// The page is backed by a hugetlbfs file and mapped privately at
/// [`BASE_MSB`]. [`HugepageAllocator::release`] unmaps it and removes the
/// file again.
#[derive(Debug, Clone)]
pub struct HugepageAllocator {
    path: PathBuf,
}

impl Default for HugepageAllocator {
    fn default() -> Self {
        Self::with_path(DEFAULT_HUGEPAGE_PATH)
    }
}

impl HugepageAllocator {
    /// Creates an allocator backed by the hugetlbfs file at `path`.
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        HugepageAllocator {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unmaps `memory` and removes the backing file.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the file cannot be removed.
    pub fn release(&self, memory: Memory) -> Result<(), std::io::Error> {
        memory.dealloc();
        std::fs::remove_file(&self.path)?;
        debug!("removed {}", self.path.display());
        Ok(())
    }
}

impl RegionAllocator for HugepageAllocator {
    type Error = std::io::Error;

    fn block_size(&self) -> Size {
        Size::GB(1)
    }

    fn alloc_region(&mut self, size: Size) -> Result<Memory, Self::Error> {
        if size.bytes() != self.block_size().bytes() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("only regions of {} are supported, got {}", self.block_size(), size),
            ));
        }
        if let Some(default) = default_hugepage_size() {
            debug!("default huge page size: {}", default);
        }
        let path = CString::new(self.path.as_os_str().as_encoded_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let fd = unsafe { libc::open(path.as_ptr(), O_RDWR | O_CREAT, 0o600) };
        if fd == -1 {
            return Err(std::io::Error::last_os_error());
        }
        let len = size.bytes();
        let p = unsafe {
            libc::mmap(
                BASE_MSB,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_PRIVATE | MAP_HUGETLB | MAP_HUGE_1GB | MAP_POPULATE | MAP_FIXED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if p == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        unsafe { libc::memset(p as *mut c_void, 0x00, len) };
        info!("mapped {} at {:p}-{:p}", size, p, unsafe { p.byte_add(len) });
        Ok(Memory::new(p as *mut u8, len))
    }
}
