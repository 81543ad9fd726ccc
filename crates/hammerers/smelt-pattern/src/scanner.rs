//! Measurement rounds over target rows.

use std::fmt;
use std::time::Duration;

use indicatif::MultiProgress;
use log::{debug, info, warn};
use serde::Serialize;
use smelt_core::counter::CounterControl;
use smelt_core::hammerer::Hammering;
use smelt_core::memory::{Address, AddressPool, Constraints, Coordinate, CoordinateMaps};
use smelt_core::timing::Timing;
use smelt_core::util::{T_REFI_NS, format_row, named_bar};

use crate::config::{PatternConfig, Strategy};
use crate::generator::{AggressorSet, Generator};
use crate::hammer::{PatternHammerer, ReadTimings};
use crate::victims::{DataPattern, Flip, caused_flips, init_victims};
use crate::{PatternError, Result};

/// Outcome of one round of hammering a target row.
#[derive(Clone, Debug, Serialize)]
pub struct RoundReport {
    /// RFC 3339 timestamp of the end of the round
    pub date: String,
    /// Target row
    pub row: usize,
    /// Aggressor selection used
    pub strategy: Strategy,
    /// Aggressor coordinates as `r,c,b s,l`
    pub aggressors: Vec<String>,
    /// Hammer repetitions per data pattern
    pub repetitions: usize,
    /// (repetition, data pattern) combinations that flipped at least one bit
    pub flipped_rounds: usize,
    /// `100 * flipped_rounds / repetitions`, may exceed 100
    pub flip_percentage: f64,
    /// Every flip observed
    pub flips: Vec<Flip>,
    /// Per-traversal cost of the pattern
    pub timings: ReadTimings,
    /// Refresh interval divided by the median traversal time
    pub trefi_fit: f64,
}

impl fmt::Display for RoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", format_row("target row", self.row))?;
        writeln!(f, "{}", format_row("strategy", self.strategy))?;
        writeln!(f, "{}", format_row("flips", self.flips.len()))?;
        for flip in &self.flips {
            writeln!(f, "{}", flip)?;
        }
        writeln!(
            f,
            "{}",
            format_row("percentage of flips", format!("{:.2}", self.flip_percentage))
        )?;
        writeln!(
            f,
            "{}",
            format_row("cycles (median)", format!("{:.2}", self.timings.cycles.median()))
        )?;
        writeln!(
            f,
            "{}",
            format_row("misses (median)", format!("{:.2}", self.timings.misses.median()))
        )?;
        writeln!(
            f,
            "{}",
            format_row("nanos (median)", format!("{:.2}", self.timings.nanos.median()))
        )?;
        write!(f, "{}", format_row("tREFI fit", format!("{:.2}", self.trefi_fit)))
    }
}

/// Runs hammer rounds for one target row at a time.
///
/// A round builds a fresh pattern from a copy of the pool, hammers it with
/// every [`DataPattern`] `repetitions` times, checks the victims after each
/// run and finally times the pattern.
pub struct Scanner<'a, T: Timing + ?Sized> {
    maps: &'a CoordinateMaps,
    config: &'a PatternConfig,
    timing: &'a T,
    counter: &'a dyn CounterControl,
    target: Constraints,
    progress: Option<MultiProgress>,
}

impl<'a, T: Timing + ?Sized> Scanner<'a, T> {
    /// Creates a scanner.
    ///
    /// # Arguments
    ///
    /// * `maps` - Coordinate maps of the machine
    /// * `config` - Validated pattern configuration
    /// * `timing` - Timing primitives used for flushing and measuring
    /// * `counter` - Control of the cache miss counter read while timing
    /// * `target` - Coordinates shared by every target; must pin the bank
    pub fn new(
        maps: &'a CoordinateMaps,
        config: &'a PatternConfig,
        timing: &'a T,
        counter: &'a dyn CounterControl,
        target: Constraints,
    ) -> Self {
        Scanner {
            maps,
            config,
            timing,
            counter,
            target,
            progress: None,
        }
    }

    /// Reports round progress on `progress`.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn bank(&self) -> Result<usize> {
        self.target
            .get(Coordinate::Bank)
            .ok_or_else(|| PatternError::Config("scan target needs a bank".into()))
    }

    /// Selects aggressors and victims for `row` with the configured strategy.
    fn aggressor_set(
        &self,
        generator: &Generator<'_>,
        pool: &mut AddressPool,
        row: usize,
        rng: &mut impl rand::Rng,
    ) -> Result<AggressorSet> {
        match self.config.strategy {
            Strategy::Classic => generator.classic(pool, row, self.bank()?, rng),
            Strategy::NSided => {
                generator.n_sided(pool, self.target.with(Coordinate::Row, row), rng)
            }
            Strategy::Anvil => generator.anvil(pool.region(), row, self.bank()?, rng),
        }
    }

    /// Builds the full access pattern for `row`.
    ///
    /// Returns the aggressor set and the assembled pattern.
    ///
    /// # Errors
    ///
    /// Fails like the generator operations it runs.
    pub fn build(
        &self,
        pool: &AddressPool,
        row: usize,
        rng: &mut impl rand::Rng,
    ) -> Result<(AggressorSet, Vec<Address>)> {
        let generator = Generator::new(self.maps, self.config);
        let mut pool = pool.clone();
        let set = self.aggressor_set(&generator, &mut pool, row, rng)?;
        let evictions = match self.config.strategy {
            _ if self.config.clflush.is_enabled() => vec![],
            Strategy::Anvil => generator.anvil_eviction_set(pool.region(), &set.aggressors, rng)?,
            _ => generator.eviction_set(&mut pool, &set.aggressors, rng)?,
        };
        let pattern = generator.assemble(&set.aggressors, &evictions, self.config.schedule)?;
        for addr in &pattern {
            debug!("{:#x} {}", addr, self.maps.describe(*addr));
        }
        Ok((set, pattern))
    }

    /// Hammers `row` and reports flips and pattern timings.
    ///
    /// # Errors
    ///
    /// [`PatternError::Exhausted`] if no pattern can be built for `row`
    /// (recoverable), any other variant if the run must stop.
    pub fn scan_row(
        &self,
        pool: &AddressPool,
        row: usize,
        rng: &mut impl rand::Rng,
    ) -> Result<RoundReport> {
        let (set, pattern) = self.build(pool, row, rng)?;
        let num_columns = self.maps.num_columns();
        let repetitions = self.config.repetitions;
        let bar = named_bar(
            self.progress.as_ref(),
            &format!("row {}", row),
            (repetitions * DataPattern::ALL.len()) as u64,
        );

        let mut flipped_rounds = 0;
        let mut flips = Vec::new();
        let mut hammerer = None;
        for _ in 0..repetitions {
            for data in DataPattern::ALL {
                let byte = data.byte(rng);
                // SAFETY: victims and pattern were derived from the pool's region,
                // which the caller keeps mapped.
                let baseline = unsafe { init_victims(&set.victims, num_columns, byte) };
                let installed = unsafe {
                    PatternHammerer::install(self.timing, self.config, pattern.clone())
                }?;
                let settle = rng.random_range(0..4u64) * self.config.settle_ms;
                std::thread::sleep(Duration::from_millis(settle));
                installed.hammer()?;
                let found = unsafe { caused_flips(self.maps, &set.victims, num_columns, &baseline) };
                if !found.is_empty() {
                    flipped_rounds += 1;
                    for flip in &found {
                        info!("{:?} {}", data, flip);
                    }
                    flips.extend(found);
                }
                hammerer = Some(installed);
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
            }
        }
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        let hammerer = hammerer.ok_or_else(|| PatternError::Config("no repetitions".into()))?;
        let timings = hammerer.time_reads(self.counter)?;
        let nanos = timings.nanos.median();
        if nanos == 0.0 {
            warn!("median traversal time of row {} is 0 ns", row);
        }
        let report = RoundReport {
            date: chrono::Local::now().to_rfc3339(),
            row,
            strategy: self.config.strategy,
            aggressors: set.aggressors.iter().map(|&a| self.maps.describe(a)).collect(),
            repetitions,
            flipped_rounds,
            flip_percentage: 100.0 * flipped_rounds as f64 / repetitions as f64,
            flips,
            trefi_fit: T_REFI_NS / nanos,
            timings,
        };
        info!(
            "row {}: {} flips in {} rounds",
            row,
            report.flips.len(),
            report.flipped_rounds
        );
        Ok(report)
    }
}
