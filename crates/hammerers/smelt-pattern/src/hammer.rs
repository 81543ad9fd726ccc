//! Pointer-chase hammering and pattern timing.

use std::hint::black_box;
use std::time::Instant;

use log::{debug, info};
use serde::Serialize;
use smelt_core::chase::{self, nops, walk_one, walk_two};
use smelt_core::counter::CounterControl;
use smelt_core::hammerer::Hammering;
use smelt_core::memory::Address;
use smelt_core::stats::{Distribution, histogram, summarize};
use smelt_core::timing::{Fence, Timing, measure_cycles};
use smelt_core::util::yield_now;

use crate::config::{ClflushMode, PatternConfig};
use crate::{PatternError, Result};

const TIMING_QUANTILES: usize = 10;
const CYCLES_GRANULARITY: u64 = 4;
const MISSES_GRANULARITY: u64 = 1;
const NANOS_GRANULARITY: u64 = 1;

/// Per-traversal cost of a pattern.
#[derive(Clone, Debug, Serialize)]
pub struct ReadTimings {
    /// Time stamp counter cycles
    pub cycles: Distribution,
    /// Last-level cache misses
    pub misses: Distribution,
    /// Wall clock nanoseconds
    pub nanos: Distribution,
}

/// Hammers an installed access pattern.
///
/// The pattern is written into memory as a pointer chase when the hammerer
/// is created and traversed with dependent loads afterwards.
pub struct PatternHammerer<'a, T: Timing + ?Sized> {
    timing: &'a T,
    config: &'a PatternConfig,
    pattern: Vec<Address>,
}

impl<'a, T: Timing + ?Sized> PatternHammerer<'a, T> {
    /// Installs `pattern` with `config.lanes` lanes.
    ///
    /// # Safety
    ///
    /// Every pattern address must be word-aligned, point into mapped writable
    /// memory and stay mapped for the lifetime of the hammerer.
    ///
    /// # Errors
    ///
    /// [`PatternError::BrokenChain`] if the chase cannot be installed.
    pub unsafe fn install(
        timing: &'a T,
        config: &'a PatternConfig,
        pattern: Vec<Address>,
    ) -> Result<Self> {
        unsafe { chase::install(&pattern, config.lanes) }?;
        debug!("installed {} addresses on {} lane(s)", pattern.len(), config.lanes);
        Ok(PatternHammerer {
            timing,
            config,
            pattern,
        })
    }

    /// The installed pattern.
    pub fn pattern(&self) -> &[Address] {
        &self.pattern
    }

    fn heads(&self) -> (Address, Address) {
        let a = self.pattern[0];
        let b = if self.config.lanes == 2 { self.pattern[1] } else { a };
        (a, b)
    }

    /// Walks one step on every lane and flushes the lines reached.
    #[inline(always)]
    fn step_and_flush(&self, a: Address, b: Address, fence: Fence) -> (Address, Address) {
        // SAFETY: the chase was installed over mapped memory in `install`.
        unsafe {
            if self.config.lanes == 2 {
                let (a, b) = walk_two(a, b, 1);
                self.timing.flush_cache_line(a as *const u8);
                self.timing.flush_cache_line(b as *const u8);
                fence.issue();
                (a, b)
            } else {
                let a = walk_one(a, 1);
                self.timing.flush_cache_line(a as *const u8);
                fence.issue();
                (a, b)
            }
        }
    }

    #[inline(always)]
    fn walk(&self, a: Address, b: Address, steps: usize) -> (Address, Address) {
        // SAFETY: the chase was installed over mapped memory in `install`.
        unsafe {
            if self.config.lanes == 2 {
                walk_two(a, b, steps)
            } else {
                (walk_one(a, steps), b)
            }
        }
    }

    /// One traversal block: `coalesce` times a no-op slide followed by a
    /// full walk of every lane. Returns where the lanes stopped.
    #[inline(always)]
    fn core(&self) -> (Address, Address) {
        let (mut a, mut b) = self.heads();
        let steps = self.pattern.len() / self.config.lanes;
        for _ in 0..self.config.coalesce {
            nops(self.config.nops);
            match self.config.clflush {
                ClflushMode::Disabled => {
                    (a, b) = self.walk(a, b, steps);
                }
                ClflushMode::PerAccess { fence } => {
                    for _ in 0..steps {
                        (a, b) = self.step_and_flush(a, b, fence);
                    }
                }
                ClflushMode::Batch { fence } => {
                    for k in 0..steps {
                        (a, b) = self.walk(a, b, 1);
                        if matches!(k, 2 | 5 | 8) {
                            nops(self.config.inner_nops);
                        }
                    }
                    for &addr in &self.pattern {
                        // SAFETY: pattern addresses are mapped, see `install`.
                        unsafe { self.timing.flush_cache_line(addr as *const u8) };
                    }
                    fence.issue();
                }
            }
        }
        black_box((a, b))
    }

    /// Times `timing_repetitions` samples of `timing_sub_repetitions`
    /// traversals each and summarizes the per-traversal cost.
    ///
    /// `counter` is programmed to count last-level cache misses for the
    /// duration of the measurement.
    ///
    /// # Errors
    ///
    /// Fails if the counter cannot be programmed or no sample is valid.
    pub fn time_reads(&self, counter: &dyn CounterControl) -> Result<ReadTimings> {
        let repetitions = self.config.timing_repetitions;
        let sub = self.config.timing_sub_repetitions as i64;
        let mut cycles = Vec::with_capacity(repetitions);
        let mut misses = Vec::with_capacity(repetitions);
        let mut nanos = Vec::with_capacity(repetitions);

        counter.enable()?;
        yield_now();
        for _ in 0..repetitions {
            let start = Instant::now();
            let mut sample = 0;
            let missed = self.timing.read_counter_delta(&mut || {
                sample = measure_cycles(self.timing, || {
                    for _ in 0..sub {
                        black_box(self.core());
                    }
                });
            });
            let elapsed = start.elapsed().as_nanos() as i64;
            cycles.push(sample / sub);
            misses.push(missed as i64 / sub);
            nanos.push(elapsed / sub);
        }
        counter.disable()?;

        let timings = ReadTimings {
            cycles: summarize_logged("time stamp counter (delta)", &cycles, CYCLES_GRANULARITY)?,
            misses: summarize_logged("last level cache misses", &misses, MISSES_GRANULARITY)?,
            nanos: summarize_logged("monotonic clock ns (delta)", &nanos, NANOS_GRANULARITY)?,
        };
        Ok(timings)
    }
}

fn summarize_logged(name: &str, samples: &[i64], granularity: u64) -> Result<Distribution> {
    debug!("{}:\n{}", name, histogram(samples, granularity)?);
    let distribution = summarize(samples, TIMING_QUANTILES)?;
    info!("{}: {}", name, distribution);
    Ok(distribution)
}

impl<T: Timing + ?Sized> Hammering for PatternHammerer<'_, T> {
    type Error = PatternError;

    fn hammer(&self) -> Result<()> {
        yield_now();
        for _ in 0..self.config.activations {
            black_box(self.core());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smelt_core::counter::NoCounter;
    use std::cell::Cell;

    struct CountingTiming {
        clock: Cell<u64>,
        flushes: Cell<usize>,
    }

    impl CountingTiming {
        fn new() -> Self {
            CountingTiming {
                clock: Cell::new(0),
                flushes: Cell::new(0),
            }
        }
    }

    impl Timing for CountingTiming {
        fn read_cycle_counter(&self) -> u64 {
            self.clock.set(self.clock.get() + 400);
            self.clock.get()
        }

        unsafe fn flush_cache_line(&self, _addr: *const u8) {
            self.flushes.set(self.flushes.get() + 1);
        }

        fn read_counter_delta(&self, region: &mut dyn FnMut()) -> u64 {
            region();
            6
        }
    }

    fn pattern(buf: &mut [u64], n: usize) -> Vec<Address> {
        let base = buf.as_mut_ptr();
        (0..n).map(|i| base.wrapping_add(8 * i) as Address).collect()
    }

    fn config(clflush: ClflushMode, lanes: usize) -> PatternConfig {
        PatternConfig {
            aggressors_per_set: 2,
            lanes,
            activations: 3,
            nops: 10,
            coalesce: 2,
            clflush,
            timing_repetitions: 4,
            timing_sub_repetitions: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_hammer_walks_installed_chase() {
        let mut buf = vec![0u64; 64];
        let timing = CountingTiming::new();
        let config = config(ClflushMode::Disabled, 2);
        let addrs = pattern(&mut buf, 8);
        let hammerer = unsafe { PatternHammerer::install(&timing, &config, addrs.clone()) }.unwrap();
        assert_eq!(hammerer.pattern(), &addrs[..]);
        hammerer.hammer().unwrap();
        assert_eq!(timing.flushes.get(), 0);
        assert_eq!(buf[0] as Address, addrs[2]);
    }

    #[test]
    fn test_hammer_flushes() {
        let mut buf = vec![0u64; 64];
        let timing = CountingTiming::new();
        let per_access = config(ClflushMode::PerAccess { fence: Fence::SFence }, 1);
        let hammerer =
            unsafe { PatternHammerer::install(&timing, &per_access, pattern(&mut buf, 4)) }.unwrap();
        hammerer.hammer().unwrap();
        // 3 activations, 2 coalesced walks, 4 steps
        assert_eq!(timing.flushes.get(), 3 * 2 * 4);

        let timing = CountingTiming::new();
        let batch = config(ClflushMode::Batch { fence: Fence::MFence }, 2);
        let hammerer =
            unsafe { PatternHammerer::install(&timing, &batch, pattern(&mut buf, 4)) }.unwrap();
        hammerer.hammer().unwrap();
        assert_eq!(timing.flushes.get(), 3 * 2 * 4);
    }

    #[test]
    fn test_batch_flush_with_inner_nops() {
        let mut buf = vec![0u64; 256];
        let timing = CountingTiming::new();
        let config = PatternConfig {
            inner_nops: 25,
            ..config(ClflushMode::Batch { fence: Fence::LFence }, 2)
        };
        let addrs = pattern(&mut buf, 20);
        let hammerer = unsafe { PatternHammerer::install(&timing, &config, addrs.clone()) }.unwrap();
        // 10 steps per lane pass the padded steps and return to the heads
        assert_eq!(hammerer.core(), (addrs[0], addrs[1]));
        assert_eq!(timing.flushes.get(), 2 * 20);
    }

    #[test]
    fn test_install_rejects_odd_lanes() {
        let mut buf = vec![0u64; 64];
        let timing = CountingTiming::new();
        let config = config(ClflushMode::Disabled, 2);
        let result = unsafe { PatternHammerer::install(&timing, &config, pattern(&mut buf, 3)) };
        assert!(matches!(result, Err(PatternError::BrokenChain(_))));
    }

    #[test]
    fn test_time_reads() {
        let mut buf = vec![0u64; 64];
        let timing = CountingTiming::new();
        let config = config(ClflushMode::Disabled, 2);
        let hammerer =
            unsafe { PatternHammerer::install(&timing, &config, pattern(&mut buf, 4)) }.unwrap();
        let timings = hammerer.time_reads(&NoCounter).unwrap();
        // each sample spans two clock reads, divided by 2 sub-repetitions
        assert_eq!(timings.cycles.median(), 200.0);
        assert_eq!(timings.misses.median(), 3.0);
        assert_eq!(timings.cycles.sample_size(), 4);
        assert!(timings.nanos.min() >= 0);
    }
}
