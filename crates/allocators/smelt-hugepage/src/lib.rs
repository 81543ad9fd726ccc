//! 1 GiB huge page region provider.
//!
//! Maps one 1 GiB huge page from a hugetlbfs file at a fixed virtual
//! address. All 30 offset bits of an address in the page are physical
//! address bits, which the coordinate maps rely on.
//!
//! Implements the [`smelt_core::allocator::RegionAllocator`] trait.
//!
//! # Platform Requirements
//!
//! - x86_64 Linux with 1 GiB huge pages reserved, e.g. via
//!   `hugepagesz=1G hugepages=1` on the kernel command line
//! - hugetlbfs mounted at `/mnt/huge` (or another directory passed to
//!   [`HugepageAllocator::with_path`])

#![warn(missing_docs)]

mod hugepage;

pub use hugepage::*;
