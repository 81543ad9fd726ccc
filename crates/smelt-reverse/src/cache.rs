//! Cache hit/miss threshold.

use log::info;
use serde::Serialize;
use smelt_core::stats::{Distribution, estimate_threshold, histogram, summarize};
use smelt_core::timing::{Timing, time_read_single};

use crate::{CalibrationConfig, Result};

/// Hit and miss latencies of one cache line and the threshold between them.
#[derive(Clone, Debug, Serialize)]
pub struct CacheThreshold {
    /// Reads of a cached line
    pub hits: Distribution,
    /// Reads right after flushing the line
    pub misses: Distribution,
    /// Cycles separating the two
    pub threshold: i64,
}

/// Times `config.cache_repetitions` cached and flushed reads of `line`.
///
/// # Errors
///
/// [`crate::ReverseError::QuantilesOverlap`] if the distributions do not
/// separate.
pub fn find_cache_threshold<T: Timing + ?Sized>(
    timing: &T,
    line: &u8,
    config: &CalibrationConfig,
) -> Result<CacheThreshold> {
    let addr = line as *const u8;
    let n = config.cache_repetitions;

    // SAFETY: `addr` comes from a live reference for every read and flush.
    let (hits, misses) = unsafe {
        time_read_single(timing, addr);
        let hits: Vec<i64> = (0..n).map(|_| time_read_single(timing, addr)).collect();
        let misses: Vec<i64> = (0..n)
            .map(|_| {
                timing.flush_cache_line(addr);
                time_read_single(timing, addr)
            })
            .collect();
        (hits, misses)
    };

    info!("cache hits:\n{}", histogram(&hits, config.granularity)?);
    let hits = summarize(&hits, config.quantiles)?;
    info!("cache hits: {}", hits);
    info!("cache misses:\n{}", histogram(&misses, config.granularity)?);
    let misses = summarize(&misses, config.quantiles)?;
    info!("cache misses: {}", misses);

    let threshold = estimate_threshold(&hits, &misses)?;
    Ok(CacheThreshold {
        hits,
        misses,
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReverseError;
    use std::cell::Cell;

    /// Reads cost `hit` cycles, or `miss` right after a flush.
    struct CacheTiming {
        hit: u64,
        miss: u64,
        clock: Cell<u64>,
        flushed: Cell<bool>,
        reading: Cell<bool>,
    }

    impl CacheTiming {
        fn new(hit: u64, miss: u64) -> Self {
            CacheTiming {
                hit,
                miss,
                clock: Cell::new(0),
                flushed: Cell::new(false),
                reading: Cell::new(false),
            }
        }
    }

    impl Timing for CacheTiming {
        fn read_cycle_counter(&self) -> u64 {
            if self.reading.get() {
                let cost = if self.flushed.replace(false) {
                    self.miss
                } else {
                    self.hit
                };
                self.clock.set(self.clock.get() + cost);
            }
            self.reading.set(!self.reading.get());
            self.clock.get()
        }

        unsafe fn flush_cache_line(&self, _addr: *const u8) {
            self.flushed.set(true);
        }

        fn read_counter_delta(&self, region: &mut dyn FnMut()) -> u64 {
            region();
            0
        }
    }

    fn config() -> CalibrationConfig {
        CalibrationConfig {
            cache_repetitions: 512,
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_threshold() {
        let line = 0u8;
        let result = find_cache_threshold(&CacheTiming::new(40, 200), &line, &config()).unwrap();
        assert_eq!(result.threshold, 120);
        assert_eq!(result.hits.median(), 40.0);
        assert_eq!(result.misses.median(), 200.0);
        assert_eq!(result.hits.quantiles().len(), 101);
    }

    #[test]
    fn test_cache_threshold_overlap() {
        let line = 0u8;
        let result = find_cache_threshold(&CacheTiming::new(90, 90), &line, &config());
        assert!(matches!(
            result,
            Err(ReverseError::QuantilesOverlap {
                lower: 90,
                upper: 90
            })
        ));
    }
}
