//! Latency of address pairs.

use smelt_core::chase;
use smelt_core::memory::{Address, Memory, Region};
use smelt_core::timing::{Timing, time_read_pair};
use smelt_core::util::WORD_SIZE;

use crate::{Result, ReverseError};

/// Measures the latency of reading two addresses from DRAM back to back.
///
/// Same-bank, different-row pairs are slow because the second access has to
/// close the row opened by the first.
pub trait PairTimer {
    /// Median cycles of reading `a` and then `b`, both uncached.
    ///
    /// # Errors
    ///
    /// Fails if the pair cannot be probed.
    fn median_latency(&mut self, a: Address, b: Address) -> Result<f64>;
}

/// [`PairTimer`] on mapped memory.
///
/// Installs each pair as a two-element pointer chase and times dependent
/// reads with flushes in between.
pub struct ChasePairTimer<'a, T: Timing + ?Sized> {
    timing: &'a T,
    region: Region,
    repetitions: usize,
}

impl<'a, T: Timing + ?Sized> ChasePairTimer<'a, T> {
    /// Creates a timer probing addresses of `memory`.
    pub fn new(timing: &'a T, memory: &'a Memory, repetitions: usize) -> Self {
        ChasePairTimer {
            timing,
            region: Region::new(memory.ptr as Address, memory.len),
            repetitions,
        }
    }

    /// The region probes must lie in.
    pub fn region(&self) -> Region {
        self.region
    }

    fn check(&self, addr: Address) -> Result<()> {
        if addr % WORD_SIZE != 0 || !self.region.contains(addr) {
            return Err(ReverseError::InvalidProbe { addr });
        }
        Ok(())
    }
}

impl<T: Timing + ?Sized> PairTimer for ChasePairTimer<'_, T> {
    fn median_latency(&mut self, a: Address, b: Address) -> Result<f64> {
        self.check(a)?;
        self.check(b)?;
        // SAFETY: both addresses are word-aligned and inside the mapping
        // borrowed for the lifetime of the timer.
        unsafe { chase::install(&[a, b], 1) }?;
        let distribution =
            unsafe { time_read_pair(self.timing, a as *const usize, self.repetitions, true) }?;
        Ok(distribution.median())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;

    /// Every timed region costs a fixed number of cycles.
    pub(crate) struct FlatTiming {
        pub cost: u64,
        clock: Cell<u64>,
        reading: Cell<bool>,
    }

    impl FlatTiming {
        pub(crate) fn new(cost: u64) -> Self {
            FlatTiming {
                cost,
                clock: Cell::new(0),
                reading: Cell::new(false),
            }
        }
    }

    impl Timing for FlatTiming {
        fn read_cycle_counter(&self) -> u64 {
            if self.reading.get() {
                self.clock.set(self.clock.get() + self.cost);
            }
            self.reading.set(!self.reading.get());
            self.clock.get()
        }

        unsafe fn flush_cache_line(&self, _addr: *const u8) {}

        fn read_counter_delta(&self, region: &mut dyn FnMut()) -> u64 {
            region();
            0
        }
    }

    /// Pair latencies of a simulated DRAM: conflicts are same bank, other row.
    ///
    /// Bank `i` is the parity of the address bits in `banks[i]`.
    pub(crate) struct SimulatedDram {
        pub banks: Vec<usize>,
        pub row_mask: usize,
        pub hit: f64,
        pub conflict: f64,
        pub probes: usize,
    }

    impl SimulatedDram {
        pub(crate) fn new(banks: Vec<usize>, row_mask: usize) -> Self {
            SimulatedDram {
                banks,
                row_mask,
                hit: 250.0,
                conflict: 400.0,
                probes: 0,
            }
        }

        fn same_bank(&self, a: Address, b: Address) -> bool {
            self.banks.iter().all(|&mask| ((a ^ b) & mask).count_ones() % 2 == 0)
        }
    }

    impl PairTimer for SimulatedDram {
        fn median_latency(&mut self, a: Address, b: Address) -> Result<f64> {
            self.probes += 1;
            if self.same_bank(a, b) && (a & self.row_mask) != (b & self.row_mask) {
                Ok(self.conflict)
            } else {
                Ok(self.hit)
            }
        }
    }

    #[test]
    fn test_chase_pair_timer() {
        let memory = Memory::mmap(1 << 16).unwrap();
        let timing = FlatTiming::new(120);
        let mut timer = ChasePairTimer::new(&timing, &memory, 32);
        let base = timer.region().base;
        assert_eq!(timer.median_latency(base, base + 0x2000).unwrap(), 120.0);
        // the pair was installed as a closed chain
        let head = unsafe { std::ptr::read_volatile(base as *const usize) };
        assert_eq!(head, base + 0x2000);

        assert!(matches!(
            timer.median_latency(base + 3, base),
            Err(ReverseError::InvalidProbe { .. })
        ));
        assert!(matches!(
            timer.median_latency(base, base + (1 << 16)),
            Err(ReverseError::InvalidProbe { .. })
        ));
        memory.dealloc();
    }
}
