//! Pointer chasing over access patterns.
//!
//! An access pattern is installed by writing into every element the address
//! of its successor `lanes` positions later, wrapping around. Each lane is
//! then a closed cycle that can be walked with dependent loads only, so the
//! processor can neither reorder nor skip an access.

use std::arch::asm;

use thiserror::Error;

use crate::memory::Address;

/// Errors of pattern installation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChaseError {
    /// Nothing to install
    #[error("cannot install an empty pattern")]
    Empty,
    /// The pattern does not split evenly into lanes
    #[error("pattern of length {len} does not split into {lanes} lanes")]
    LaneMismatch {
        /// Pattern length
        len: usize,
        /// Requested lanes
        lanes: usize,
    },
    /// Walking a lane did not visit the expected address
    #[error("lane {lane} broken at step {step}: expected {expected:#x}, found {found:#x}")]
    Broken {
        /// Lane index
        lane: usize,
        /// Step within the lane
        step: usize,
        /// Address the chain should lead to
        expected: Address,
        /// Address it led to
        found: Address,
    },
}

/// Installs `pattern` as a pointer chase with `lanes` interleaved lanes and
/// verifies every lane by walking it.
///
/// Element `i` receives the address of element `(i + lanes) % len`.
///
/// # Safety
///
/// Every address of `pattern` must be word-aligned, point into mapped
/// writable memory and not be aliased by live references.
///
/// # Errors
///
/// Fails if the pattern is empty, its length is not a multiple of `lanes`, or
/// a walk does not follow the pattern.
pub unsafe fn install(pattern: &[Address], lanes: usize) -> Result<(), ChaseError> {
    let len = pattern.len();
    if len == 0 {
        return Err(ChaseError::Empty);
    }
    if lanes == 0 || len % lanes != 0 {
        return Err(ChaseError::LaneMismatch { len, lanes });
    }
    for (i, &addr) in pattern.iter().enumerate() {
        unsafe { std::ptr::write_volatile(addr as *mut usize, pattern[(i + lanes) % len]) };
    }
    for lane in 0..lanes {
        let mut head = unsafe { std::ptr::read_volatile(pattern[lane] as *const usize) };
        for step in 1..len / lanes {
            let expected = pattern[(lane + step * lanes) % len];
            if head != expected {
                return Err(ChaseError::Broken {
                    lane,
                    step,
                    expected,
                    found: head,
                });
            }
            head = unsafe { std::ptr::read_volatile(head as *const usize) };
        }
        if head != pattern[lane] {
            return Err(ChaseError::Broken {
                lane,
                step: len / lanes,
                expected: pattern[lane],
                found: head,
            });
        }
    }
    Ok(())
}

/// One dependent load: returns the address stored at `addr`.
///
/// # Safety
///
/// `addr` must point to an installed chase element.
#[inline(always)]
pub unsafe fn step(addr: Address) -> Address {
    let mut p = addr;
    unsafe {
        asm!("mov {0}, [{0}]", inout(reg) p, options(nostack, readonly, preserves_flags));
    }
    p
}

/// Follows one lane for `steps` loads and returns where it ended.
///
/// # Safety
///
/// `head` must belong to an installed chase.
#[inline(always)]
pub unsafe fn walk_one(head: Address, steps: usize) -> Address {
    let mut a = head;
    for _ in 0..steps {
        unsafe {
            asm!("mov {0}, [{0}]", inout(reg) a, options(nostack, readonly, preserves_flags));
        }
    }
    a
}

/// Follows two lanes in lock step for `steps` loads each.
///
/// # Safety
///
/// `a` and `b` must belong to an installed chase.
#[inline(always)]
pub unsafe fn walk_two(a: Address, b: Address, steps: usize) -> (Address, Address) {
    let (mut a, mut b) = (a, b);
    for _ in 0..steps {
        unsafe {
            asm!(
                "mov {0}, [{0}]",
                "mov {1}, [{1}]",
                inout(reg) a,
                inout(reg) b,
                options(nostack, readonly, preserves_flags)
            );
        }
    }
    (a, b)
}

/// Executes `n` `nop` instructions.
#[inline(always)]
pub fn nops(n: usize) {
    for _ in 0..n {
        unsafe { asm!("nop", options(nomem, nostack, preserves_flags)) };
    }
}
