//! Hammering traits.
//!
//! This module defines the [`Hammering`] trait that hammering implementations
//! implement to run memory access patterns which induce bit flips in
//! neighboring DRAM rows.

/// Trait for implementing hammering techniques.
///
/// Implementors own a fully constructed access pattern and repeatedly access
/// it. How the pattern was built, how long it runs and whether caches are
/// flushed in between is implementation-specific.
///
/// # Examples
///
/// See `smelt_pattern::PatternHammerer` for the pointer-chase based implementation.
pub trait Hammering {
    /// The error type returned by hammering operations.
    type Error: std::error::Error;

    /// Performs the hammering operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern cannot be executed.
    fn hammer(&self) -> Result<(), Self::Error>;
}
