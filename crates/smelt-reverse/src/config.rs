use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use smelt_core::util::{CL_SIZE, HUGE_1GB_OFFSET_BITS, format_row};

use crate::{Result, ReverseError};

/// Sample sizes and bit ranges of the calibration experiments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Timed reads per distribution when separating hits from misses
    pub cache_repetitions: usize,
    /// Timed reads per address pair
    pub pair_repetitions: usize,
    /// Candidate addresses paired against the small pool
    pub large_pool: usize,
    /// Partner addresses, reused round robin
    pub small_pool: usize,
    /// Pool size when probing row and column bits
    pub row_column_pool: usize,
    /// Histogram bin width in cycles
    pub granularity: u64,
    /// Quantile count of printed distributions
    pub quantiles: usize,
    /// Lowest bit flipped when searching bank bits
    pub bank_low_bit: u32,
    /// Lowest bit flipped when probing row and column bits
    pub row_column_low_bit: u32,
    /// Bits above this are never flipped
    pub offset_bits: u32,
    /// Most bits a bank-preserving re-encoding may differ in
    pub max_reencoded_bits: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            cache_repetitions: 1 << 20,
            pair_repetitions: 16384,
            large_pool: 16384,
            small_pool: 128,
            row_column_pool: 8192,
            granularity: 4,
            quantiles: 100,
            bank_low_bit: CL_SIZE.trailing_zeros(),
            row_column_low_bit: 3,
            offset_bits: HUGE_1GB_OFFSET_BITS,
            max_reencoded_bits: 3,
        }
    }
}

impl CalibrationConfig {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, or is inconsistent.
    pub fn from_jsonfile(filepath: &str) -> Result<CalibrationConfig> {
        let mut file = File::open(Path::new(filepath))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: CalibrationConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that pools are non-empty and bit ranges are well-formed.
    ///
    /// # Errors
    ///
    /// [`ReverseError::Config`] naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(ReverseError::Config(msg.to_string()));
        if self.small_pool == 0 || self.large_pool < self.small_pool {
            return fail("pools need 0 < small_pool <= large_pool");
        }
        if self.cache_repetitions == 0 || self.pair_repetitions == 0 {
            return fail("repetitions must be positive");
        }
        if self.quantiles < 2 {
            return fail("at least two quantile steps are required");
        }
        if self.granularity == 0 {
            return fail("granularity must be positive");
        }
        if self.offset_bits >= usize::BITS {
            return fail("offset_bits exceeds the address width");
        }
        if self.bank_low_bit >= self.offset_bits || self.row_column_low_bit >= self.offset_bits {
            return fail("low bits must be below offset_bits");
        }
        if self.row_column_low_bit < 3 {
            return fail("row_column_low_bit below 3 breaks word alignment");
        }
        Ok(())
    }
}

impl fmt::Display for CalibrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<(&str, String)> = vec![
            ("cache repetitions", self.cache_repetitions.to_string()),
            ("pair repetitions", self.pair_repetitions.to_string()),
            ("large pool", self.large_pool.to_string()),
            ("small pool", self.small_pool.to_string()),
            ("row/column pool", self.row_column_pool.to_string()),
            ("histogram granularity", self.granularity.to_string()),
            ("quantiles", self.quantiles.to_string()),
            (
                "bank bits",
                format!("{}..{}", self.bank_low_bit, self.offset_bits),
            ),
            (
                "row/column bits",
                format!("{}..{}", self.row_column_low_bit, self.offset_bits),
            ),
        ];
        for (label, value) in rows {
            writeln!(f, "{}", format_row(label, value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CalibrationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bank_low_bit, 6);
        assert_eq!(config.offset_bits, 30);
    }

    #[test]
    fn test_partial_json() {
        let config: CalibrationConfig =
            serde_json::from_str(r#"{"large_pool": 256, "small_pool": 16}"#).unwrap();
        assert_eq!(config.large_pool, 256);
        assert_eq!(config.pair_repetitions, 16384);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid() {
        let config = CalibrationConfig {
            small_pool: 64,
            large_pool: 32,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ReverseError::Config(_))));
        let config = CalibrationConfig {
            row_column_low_bit: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
