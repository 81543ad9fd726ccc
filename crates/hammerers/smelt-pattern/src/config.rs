use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use smelt_core::timing::Fence;
use smelt_core::util::format_row;

use crate::{PatternError, Result};

/// Number of cache sets a pattern spreads its aggressors over.
pub const NUM_SETS: usize = 2;

/// Hammering strategy used to pick aggressors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Consecutive double-sided aggressors in one bank
    Classic,
    /// Independent double-sided pairs in one bank, set and slice
    #[default]
    NSided,
    /// Double-sided pairs with auxiliary same-set accesses
    Anvil,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Classic => write!(f, "classic"),
            Strategy::NSided => write!(f, "n-sided"),
            Strategy::Anvil => write!(f, "anvil"),
        }
    }
}

/// How aggressors are evicted from the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ClflushMode {
    /// Evict through eviction sets interleaved with the aggressors
    #[default]
    Disabled,
    /// Flush the next targets right after loading them
    PerAccess {
        /// Fence after each flush
        #[serde(default)]
        fence: Fence,
    },
    /// Flush every aggressor after a full walk
    Batch {
        /// Fence after the flushes
        #[serde(default = "mfence")]
        fence: Fence,
    },
}

fn mfence() -> Fence {
    Fence::MFence
}

impl ClflushMode {
    /// Whether aggressors are flushed explicitly.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ClflushMode::Disabled)
    }
}

/// Parameters of access pattern construction and hammering.
///
/// A pattern consists of `cycles` cycles. Each cycle has `slots` aggressor
/// slots per set and fills the rest of the cache associativity with
/// evictions, unless aggressors are flushed explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Ways per last-level cache set
    pub cache_associativity: usize,
    /// Aggressors per cache set
    pub aggressors_per_set: usize,
    /// Aggressor slots per set in one cycle
    pub slots: usize,
    /// Cycles per pattern, `aggressors_per_set / slots` if unset
    pub cycles: Option<usize>,
    /// Interleaved pointer-chase lanes (1 or 2)
    pub lanes: usize,
    /// Bit `i` set means slot `i` of a cycle holds an aggressor
    pub schedule: u64,
    /// Full pattern traversals per hammer call
    pub activations: usize,
    /// Hammer rounds per target row and data pattern
    pub repetitions: usize,
    /// No-ops before each traversal
    pub nops: usize,
    /// No-ops after steps 2, 5 and 8 of a batch-flushed traversal
    pub inner_nops: usize,
    /// Traversals per no-op block
    pub coalesce: usize,
    /// Explicit flushing of aggressors
    pub clflush: ClflushMode,
    /// Aggressor selection
    pub strategy: Strategy,
    /// Victims settle for a random multiple (0..4) of this many milliseconds
    /// between initialization and hammering
    pub settle_ms: u64,
    /// Samples taken when timing a pattern
    pub timing_repetitions: usize,
    /// Traversals per timing sample
    pub timing_sub_repetitions: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        PatternConfig {
            cache_associativity: 16,
            aggressors_per_set: 9,
            slots: 3,
            cycles: None,
            lanes: 2,
            schedule: 0xC00C03,
            activations: 2_000_000,
            repetitions: 20,
            nops: 4000,
            inner_nops: 0,
            coalesce: 1,
            clflush: ClflushMode::Disabled,
            strategy: Strategy::NSided,
            settle_ms: 64,
            timing_repetitions: 8192,
            timing_sub_repetitions: 1024,
        }
    }
}

impl PatternConfig {
    /// Loads and validates configuration from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `filepath` - Path to the JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or is inconsistent
    pub fn from_jsonfile(filepath: &str) -> Result<PatternConfig> {
        let mut file = File::open(Path::new(filepath))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: PatternConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Total number of aggressors.
    pub fn num_aggressors(&self) -> usize {
        self.aggressors_per_set * NUM_SETS
    }

    /// Number of cycles.
    pub fn num_cycles(&self) -> usize {
        self.cycles.unwrap_or(self.aggressors_per_set / self.slots.max(1))
    }

    /// Aggressor slots per cycle.
    pub fn aggressors_per_cycle(&self) -> usize {
        self.slots * NUM_SETS
    }

    /// Eviction slots per cycle and set.
    pub fn evictions_per_cycle_per_set(&self) -> usize {
        self.cache_associativity.saturating_sub(self.slots)
    }

    /// Eviction slots per cycle.
    pub fn evictions_per_cycle(&self) -> usize {
        self.evictions_per_cycle_per_set() * NUM_SETS
    }

    /// Total number of evictions, 0 when aggressors are flushed.
    pub fn num_evictions(&self) -> usize {
        if self.clflush.is_enabled() {
            0
        } else {
            self.num_cycles() * self.evictions_per_cycle()
        }
    }

    /// Slots per cycle.
    pub fn cycle_len(&self) -> usize {
        self.aggressors_per_cycle() + self.evictions_per_cycle()
    }

    /// Number of addresses in an assembled pattern.
    pub fn pattern_len(&self) -> usize {
        if self.clflush.is_enabled() {
            self.num_aggressors()
        } else {
            self.num_cycles() * self.cycle_len()
        }
    }

    /// Checks that the parameters describe a pattern that can be assembled
    /// and traversed.
    ///
    /// # Errors
    ///
    /// [`PatternError::Config`] naming the first violated condition.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PatternError::Config(msg));
        if self.lanes != 1 && self.lanes != 2 {
            return fail(format!("lanes must be 1 or 2, got {}", self.lanes));
        }
        if self.aggressors_per_set == 0 {
            return fail("aggressors_per_set must be positive".into());
        }
        if self.activations == 0 || self.repetitions == 0 || self.coalesce == 0 {
            return fail("activations, repetitions and coalesce must be positive".into());
        }
        if self.timing_repetitions == 0 || self.timing_sub_repetitions == 0 {
            return fail("timing repetitions must be positive".into());
        }
        if self.strategy == Strategy::Anvil && self.aggressors_per_set % 2 != 0 {
            return fail(format!(
                "anvil needs an even number of aggressors per set, got {}",
                self.aggressors_per_set
            ));
        }
        if !self.clflush.is_enabled() {
            if self.slots == 0 || self.slots > self.cache_associativity {
                return fail(format!(
                    "slots ({}) must be in 1..={}",
                    self.slots, self.cache_associativity
                ));
            }
            if self.num_cycles() == 0 {
                return fail("pattern has no cycles".into());
            }
            let cycle_len = self.cycle_len();
            if cycle_len >= u64::BITS as usize || self.schedule >> cycle_len != 0 {
                return fail(format!(
                    "schedule {:#x} does not fit a cycle of {} slots",
                    self.schedule, cycle_len
                ));
            }
            if self.schedule.count_ones() as usize != self.aggressors_per_cycle() {
                return fail(format!(
                    "schedule {:#x} selects {} aggressors, cycles hold {}",
                    self.schedule,
                    self.schedule.count_ones(),
                    self.aggressors_per_cycle()
                ));
            }
            if (self.num_cycles() * self.aggressors_per_cycle()) % self.num_aggressors() != 0 {
                return fail(format!(
                    "{} cycles of {} aggressors do not cover {} aggressors evenly",
                    self.num_cycles(),
                    self.aggressors_per_cycle(),
                    self.num_aggressors()
                ));
            }
            if self.strategy == Strategy::Anvil && self.num_cycles() % 2 != 0 {
                return fail("anvil eviction sets need an even number of cycles".into());
            }
            if self.strategy == Strategy::Anvil
                && (self.num_cycles() / 2) * 4 > self.num_aggressors()
            {
                return fail("anvil eviction sets need one aggressor pair per two cycles".into());
            }
        }
        if self.pattern_len() % self.lanes != 0 {
            return fail(format!(
                "pattern of {} addresses does not split into {} lanes",
                self.pattern_len(),
                self.lanes
            ));
        }
        Ok(())
    }
}

impl fmt::Display for PatternConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<(&str, String)> = vec![
            ("cache associativity", self.cache_associativity.to_string()),
            ("sets", NUM_SETS.to_string()),
            ("aggressors per set", self.aggressors_per_set.to_string()),
            ("aggressors", self.num_aggressors().to_string()),
            ("pattern length", self.pattern_len().to_string()),
            ("coalesce", self.coalesce.to_string()),
            ("activations", self.activations.to_string()),
            ("repetitions", self.repetitions.to_string()),
            ("nops", self.nops.to_string()),
            ("inner nops", self.inner_nops.to_string()),
            ("lanes", self.lanes.to_string()),
            ("slots", self.slots.to_string()),
            ("cycles", self.num_cycles().to_string()),
            ("aggressors per cycle", self.aggressors_per_cycle().to_string()),
            ("evictions per cycle per set", self.evictions_per_cycle_per_set().to_string()),
            ("evictions per cycle", self.evictions_per_cycle().to_string()),
            ("evictions", self.num_evictions().to_string()),
            ("schedule", format!("{:#x}", self.schedule)),
            ("strategy", self.strategy.to_string()),
            (
                "clflush",
                match self.clflush {
                    ClflushMode::Disabled => "no".to_string(),
                    ClflushMode::PerAccess { fence } => format!("per access ({:?})", fence),
                    ClflushMode::Batch { fence } => format!("batch ({:?})", fence),
                },
            ),
        ];
        for (i, (label, value)) in rows.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", format_row(label, value))?;
        }
        Ok(())
    }
}
