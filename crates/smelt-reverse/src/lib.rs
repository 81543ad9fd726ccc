//! Calibration and DRAM geometry reverse engineering.
//!
//! Everything here is derived from access latencies:
//!
//! 1. [`find_cache_threshold`] separates cache hits from cache misses.
//! 2. [`ConflictSurvey`] times many address pairs; pairs in the same bank but
//!    different rows are slow (row buffer conflict). The operator picks the
//!    bank conflict threshold from the printed distribution via a
//!    [`ThresholdPrompt`].
//! 3. [`significant_bits`] and [`find_bank_functions`] recover the XOR
//!    functions that select the bank.
//! 4. [`find_row_and_column_bits`] tells row bits apart from column bits.
//!
//! Pair latencies are measured through the [`PairTimer`] trait, implemented
//! for real memory by [`ChasePairTimer`].

#![warn(missing_docs)]

mod bank;
mod cache;
mod config;
mod prompt;
mod rowcol;
mod timer;

pub use bank::{ConflictSurvey, find_bank_functions, significant_bits};
pub use cache::{CacheThreshold, find_cache_threshold};
pub use config::CalibrationConfig;
pub use prompt::{FixedThreshold, LinePrompt, StdinPrompt, ThresholdPrompt};
pub use rowcol::{RowColumnBits, find_row_and_column_bits};
pub use timer::{ChasePairTimer, PairTimer};

use smelt_core::chase::ChaseError;
use smelt_core::memory::Address;
use smelt_core::stats::StatsError;
use thiserror::Error;

/// Errors of calibration and reverse engineering.
#[derive(Debug, Error)]
pub enum ReverseError {
    /// Cache hits and misses cannot be told apart
    #[error("hit and miss quantiles overlap: {lower} >= {upper}")]
    QuantilesOverlap {
        /// Second-highest hit quantile
        lower: i64,
        /// Lowest miss quantile
        upper: i64,
    },
    /// No timed pair exceeded the bank conflict threshold
    #[error("no pair above the bank conflict threshold of {threshold} cycles")]
    NoConflictPair {
        /// Threshold in cycles
        threshold: i64,
    },
    /// The operator answer was not a number
    #[error("malformed threshold input: {0:?}")]
    MalformedInput(String),
    /// A probe address is unaligned or outside the mapped region
    #[error("probe address {addr:#x} is not a word-aligned address of the mapped region")]
    InvalidProbe {
        /// Offending address
        addr: Address,
    },
    /// Inconsistent calibration configuration
    #[error("invalid calibration configuration: {0}")]
    Config(String),
    /// Installing a probe pair failed
    #[error(transparent)]
    Chase(#[from] ChaseError),
    /// Summarizing timings failed
    #[error(transparent)]
    Stats(StatsError),
    /// Reading input or a configuration file failed
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// Parsing a configuration file failed
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl From<StatsError> for ReverseError {
    fn from(e: StatsError) -> Self {
        match e {
            StatsError::QuantilesOverlap { lower, upper } => {
                ReverseError::QuantilesOverlap { lower, upper }
            }
            e => ReverseError::Stats(e),
        }
    }
}

/// Result type for reverse engineering.
pub type Result<T> = std::result::Result<T, ReverseError>;
