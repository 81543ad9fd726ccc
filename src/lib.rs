//! # Smelt
//!
//! DRAM geometry reverse engineering and targeted hammering.
//!
//! This crate re-exports [`smelt_core`] and, behind features, the component
//! crates:
//!
//! - `pattern` (default): [`pattern`], access-pattern generation and hammering
//! - `reverse` (default): [`reverse`], calibration and bank function discovery
//! - `hugepage`: [`hugepage`], the 1 GiB huge page region provider

#![warn(missing_docs)]

pub use smelt_core::*;

/// Access-pattern generation and hammering.
#[cfg(feature = "pattern")]
pub use smelt_pattern as pattern;

/// Calibration and bank function discovery.
#[cfg(feature = "reverse")]
pub use smelt_reverse as reverse;

/// 1 GiB huge page region provider.
#[cfg(feature = "hugepage")]
pub use smelt_hugepage as hugepage;
