//! Utility functions and types used throughout smelt.
//!
//! This module provides various helper types and functions including:
//! - [`Size`] - Memory size representation
//! - Constants for memory operations ([`PAGE_SIZE`], [`CL_SIZE`], etc.)
//! - Scheduling helpers ([`pin_to_core`], [`yield_now`])
//! - Progress reporting utilities ([`NamedProgress`])
//! - Random number generation ([`Rng`])
//! - Stable key/value report rows ([`format_row`])

mod alloc_util;
mod constants;
mod named_progress;
mod rng;
mod size;

pub use self::alloc_util::*;
pub use self::constants::*;
pub use self::named_progress::{NamedProgress, named_bar};
pub use self::rng::Rng;
pub use self::size::Size;

use std::fmt::Display;

/// Formats one report row: the label left-aligned in a fixed column, the value right-aligned.
///
/// # Examples
///
/// ```
/// use smelt_core::util::format_row;
///
/// let row = format_row("tREFI fit", format!("{:.2}", 1.5));
/// assert!(row.starts_with("tREFI fit "));
/// assert!(row.ends_with("1.50"));
/// ```
pub fn format_row(label: &str, value: impl Display) -> String {
    format!(
        "{:<label_width$}{:>column_width$}",
        label,
        value.to_string(),
        label_width = LABEL_WIDTH,
        column_width = COLUMN_WIDTH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_row_widths() {
        let row = format_row("cache threshold (in cycles)", 180);
        assert_eq!(row.len(), LABEL_WIDTH + COLUMN_WIDTH);
        assert!(row.ends_with(" 180"));
    }
}
