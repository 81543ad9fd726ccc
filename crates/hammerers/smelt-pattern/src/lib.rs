//! Access pattern generation and pointer-chase hammering.
//!
//! This crate turns coordinate maps and address pools into concrete access
//! patterns: it selects aggressors and victims for a target row, draws
//! eviction sets, assembles both into timed cycles and installs the result as
//! a pointer chase that [`PatternHammerer`] walks.
//!
//! # Strategies
//!
//! - [`Strategy::Classic`]: consecutive double-sided aggressors in one bank
//! - [`Strategy::NSided`]: independent double-sided pairs sharing a cache set and slice
//! - [`Strategy::Anvil`]: double-sided pairs plus auxiliary same-set accesses
//!
//! [`Scanner`] runs complete measurement rounds per target row.

#![warn(missing_docs)]

mod config;
mod generator;
mod hammer;
mod scanner;
mod victims;

pub use config::{ClflushMode, NUM_SETS, PatternConfig, Strategy};
pub use generator::{AggressorSet, Generator};
pub use hammer::{PatternHammerer, ReadTimings};
pub use scanner::{RoundReport, Scanner};
pub use victims::{DataPattern, Flip, FlipDirection, baseline, caused_flips, diff, init_victims};

use smelt_core::chase::ChaseError;
use smelt_core::counter::CounterError;
use smelt_core::memory::{Address, PoolError};
use smelt_core::stats::StatsError;
use thiserror::Error;

/// Errors of pattern construction and execution.
#[derive(Debug, Error)]
pub enum PatternError {
    /// The pool ran out of addresses satisfying the constraints
    #[error("address pool exhausted")]
    Exhausted,
    /// Two aggressors share an adjacent-line prefetch pair
    #[error("aggressors {a:#x} and {b:#x} are within one cache line")]
    PrefetchInterference {
        /// First aggressor
        a: Address,
        /// Second aggressor
        b: Address,
    },
    /// Assembly did not use every aggressor and eviction exactly as scheduled
    #[error("schedule consumed {aggressor} as next aggressor and {evictions} of {expected} evictions")]
    ScheduleMismatch {
        /// Next aggressor index after the last cycle
        aggressor: usize,
        /// Evictions consumed
        evictions: usize,
        /// Evictions available
        expected: usize,
    },
    /// Installing the pointer chase failed
    #[error(transparent)]
    BrokenChain(#[from] ChaseError),
    /// No bank-preserving address exists for a victim
    #[error("no address encodes victim row {row}, column {column}")]
    NoVictimEncoding {
        /// Victim row
        row: usize,
        /// Column
        column: usize,
    },
    /// Building an address pool failed
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Inconsistent pattern configuration
    #[error("invalid pattern configuration: {0}")]
    Config(String),
    /// Reading a configuration file failed
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// Parsing a configuration file failed
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    /// Programming the miss counter failed
    #[error(transparent)]
    Counter(#[from] CounterError),
    /// Summarizing timings failed
    #[error(transparent)]
    Stats(#[from] StatsError),
}

impl PatternError {
    /// Whether the current target can be skipped and the run continued.
    ///
    /// Only pool exhaustion is recoverable; everything else is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PatternError::Exhausted)
    }
}

/// Result type for pattern operations.
pub type Result<T> = std::result::Result<T, PatternError>;
