//! Platform timing primitives.
//!
//! All measurements in smelt go through the [`Timing`] trait, so that the
//! statistics and reverse-engineering code can run against simulated
//! hardware in tests and against [`X86Timing`] on a real machine.

use std::arch::asm;
use std::arch::x86_64::{__cpuid, _mm_clflush, _mm_lfence, _mm_mfence, _mm_sfence, _rdtsc};

use serde::{Deserialize, Serialize};

use crate::stats::{self, Distribution};

/// Cycle counter, cache flush and hardware event counter access.
pub trait Timing {
    /// Reads the cycle counter, ordered against all earlier loads, stores and flushes.
    fn read_cycle_counter(&self) -> u64;

    /// Evicts the cache line containing `addr` from all cache levels.
    ///
    /// # Safety
    ///
    /// `addr` must point into mapped memory.
    unsafe fn flush_cache_line(&self, addr: *const u8);

    /// Runs `region` and returns the increment of the programmed event counter.
    fn read_counter_delta(&self, region: &mut dyn FnMut()) -> u64;
}

/// Memory fence issued after flushes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fence {
    /// No fence
    None,
    /// `mfence`
    MFence,
    /// `lfence`
    LFence,
    /// `sfence`
    #[default]
    SFence,
}

impl Fence {
    /// Issues the fence.
    #[inline(always)]
    pub fn issue(self) {
        unsafe {
            match self {
                Fence::None => {}
                Fence::MFence => _mm_mfence(),
                Fence::LFence => _mm_lfence(),
                Fence::SFence => _mm_sfence(),
            }
        }
    }
}

/// [`Timing`] on x86_64 using `rdtsc`, `clflush` and `rdpmc`.
///
/// `read_counter_delta` reads a general purpose performance counter from
/// user space, which requires `rdpmc` to be enabled
/// (`/sys/bus/event_source/devices/cpu/rdpmc`) and the counter to be
/// programmed, see [`crate::counter`].
#[derive(Clone, Copy, Debug)]
pub struct X86Timing {
    counter: u32,
}

impl Default for X86Timing {
    fn default() -> Self {
        X86Timing { counter: 0 }
    }
}

impl X86Timing {
    /// Timing that reads general purpose counter `counter` in `read_counter_delta`.
    pub fn with_counter(counter: u32) -> Self {
        X86Timing { counter }
    }
}

#[inline(always)]
fn serialize() {
    #[allow(unused_unsafe)]
    unsafe {
        __cpuid(0);
    }
}

#[inline(always)]
unsafe fn rdpmc(counter: u32) -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        asm!(
            "rdpmc",
            in("ecx") counter,
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack, preserves_flags)
        );
    }
    ((hi as u64) << 32) | lo as u64
}

impl Timing for X86Timing {
    #[inline(always)]
    fn read_cycle_counter(&self) -> u64 {
        unsafe {
            _mm_mfence();
            _mm_lfence();
            let t = _rdtsc();
            _mm_lfence();
            t
        }
    }

    #[inline(always)]
    unsafe fn flush_cache_line(&self, addr: *const u8) {
        unsafe { _mm_clflush(addr) };
    }

    fn read_counter_delta(&self, region: &mut dyn FnMut()) -> u64 {
        serialize();
        let start = unsafe { rdpmc(self.counter) };
        serialize();
        region();
        serialize();
        let end = unsafe { rdpmc(self.counter) };
        serialize();
        end.wrapping_sub(start)
    }
}

/// Cycles spent in `region`, as a signed delta.
#[inline(always)]
pub fn measure_cycles<T: Timing + ?Sized>(timing: &T, region: impl FnOnce()) -> i64 {
    let start = timing.read_cycle_counter();
    region();
    let end = timing.read_cycle_counter();
    end.wrapping_sub(start) as i64
}

/// Cycles of a single read of `addr`.
///
/// # Safety
///
/// `addr` must point into mapped memory.
pub unsafe fn time_read_single<T: Timing + ?Sized>(timing: &T, addr: *const u8) -> i64 {
    measure_cycles(timing, || {
        std::hint::black_box(unsafe { std::ptr::read_volatile(addr) });
    })
}

/// Quantile count of pair timing distributions.
pub const PAIR_QUANTILES: usize = 100;

/// Times `repetitions` dependent reads of a two-element pointer chase.
///
/// `head` must hold the address of the second element. Each sample covers
/// loading `head` and then the element it points to. With `post_flush`, both
/// lines are flushed after every sample so each read goes to DRAM.
///
/// # Safety
///
/// `head` and the address stored in it must point into mapped memory.
///
/// # Errors
///
/// Fails if no sample is valid.
pub unsafe fn time_read_pair<T: Timing + ?Sized>(
    timing: &T,
    head: *const usize,
    repetitions: usize,
    post_flush: bool,
) -> stats::Result<Distribution> {
    let mut samples = Vec::with_capacity(repetitions);
    for _ in 0..repetitions {
        let mut second = 0usize;
        let cycles = measure_cycles(timing, || {
            second = unsafe { std::ptr::read_volatile(head) };
            std::hint::black_box(unsafe { std::ptr::read_volatile(second as *const usize) });
        });
        if post_flush {
            unsafe {
                timing.flush_cache_line(head as *const u8);
                timing.flush_cache_line(second as *const u8);
            }
        }
        samples.push(cycles);
    }
    stats::summarize(&samples, PAIR_QUANTILES)
}
