//! Row and column bit discovery.

use log::{debug, info};
use serde::Serialize;
use smelt_core::memory::{Address, AddressPool, Coordinate, CoordinateMaps, Region};

use crate::{CalibrationConfig, PairTimer, Result};

/// Outcome of flipping every bit of one base address.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowColumnBits {
    /// The address whose bits were flipped
    pub base: Address,
    /// Bits whose flip caused a bank conflict
    pub row_bits: Vec<u32>,
    /// Number of flips that stayed in the open row or left the bank
    pub row_misses: usize,
    /// `(bit, partner, median)` of every probe
    pub probes: Vec<(u32, Address, f64)>,
}

/// Partner of `addr` with bit `b` flipped, kept in the bank of `addr`.
///
/// If flipping `b` changes the bank, the first bank-preserving re-encoding
/// that keeps `b` flipped and differs from `addr` in at most `max_bits` bits
/// is used instead. Falls back to the plain flip if there is none.
fn flip_in_bank(maps: &CoordinateMaps, addr: Address, b: u32, max_bits: u32) -> Address {
    let flipped = addr ^ (1 << b);
    let bank = maps.get_coordinate(addr, Coordinate::Bank);
    if maps.get_coordinate(flipped, Coordinate::Bank) == bank {
        return flipped;
    }
    let reencoded = maps
        .set_coordinate(flipped, Coordinate::Bank, bank)
        .into_iter()
        .find(|&candidate| (candidate ^ addr) >> b & 1 == 1 && (candidate ^ addr).count_ones() <= max_bits);
    match reencoded {
        Some(candidate) => {
            debug!("bit {}: re-encoded as {:#x}", b, candidate ^ addr);
            candidate
        }
        None => {
            debug!("bit {}: no bank-preserving re-encoding", b);
            flipped
        }
    }
}

/// Flips each bit in `row_column_low_bit..offset_bits` of a random address
/// and times it against the original.
///
/// A median at or above `threshold` means the flip opened another row of the
/// same bank, so the bit is a row bit.
///
/// # Errors
///
/// Fails if a pair cannot be timed.
pub fn find_row_and_column_bits<P: PairTimer + ?Sized>(
    timer: &mut P,
    maps: &CoordinateMaps,
    region: Region,
    threshold: i64,
    config: &CalibrationConfig,
    rng: &mut impl rand::Rng,
) -> Result<RowColumnBits> {
    let pool = AddressPool::random(region, config.row_column_pool, rng);
    let base = pool.random_address_outside(rng);

    let mut result = RowColumnBits {
        base,
        row_bits: vec![],
        row_misses: 0,
        probes: vec![],
    };
    for b in config.row_column_low_bit..config.offset_bits {
        let partner = flip_in_bank(maps, base, b, config.max_reencoded_bits);
        let median = timer.median_latency(base, partner)?;
        debug!("bit {}: {:.0} cycles", b, median);
        if median < threshold as f64 {
            result.row_misses += 1;
        } else {
            result.row_bits.push(b);
        }
        result.probes.push((b, partner, median));
    }
    info!("conflicts: {:?}", result.row_bits);
    info!(
        "got {} row hits, {} row misses",
        result.row_bits.len(),
        result.row_misses
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::tests::SimulatedDram;
    use smelt_core::memory::CoordinateMap;
    use smelt_core::util::Rng;

    const BANKS: [usize; 2] = [1 << 13 | 1 << 16, 1 << 14 | 1 << 17];
    const ROWS: usize = 0x3FFF_8000;

    fn maps() -> CoordinateMaps {
        CoordinateMaps::new()
            .with_map(CoordinateMap::new(Coordinate::Row, vec![ROWS], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Bank, BANKS.to_vec(), 0).unwrap())
    }

    #[test]
    fn test_flip_in_bank() {
        let maps = maps();
        let addr = 0x4000_0000;
        assert_eq!(flip_in_bank(&maps, addr, 7, 3), addr ^ 1 << 7);
        assert_eq!(flip_in_bank(&maps, addr, 13, 3), addr ^ (1 << 13 | 1 << 16));
        assert_eq!(flip_in_bank(&maps, addr, 17, 3), addr ^ (1 << 17 | 1 << 14));
        // two bits are needed, one is not enough
        assert_eq!(flip_in_bank(&maps, addr, 13, 1), addr ^ 1 << 13);
    }

    #[test]
    fn test_row_and_column_bits() {
        let mut dram = SimulatedDram::new(BANKS.to_vec(), ROWS);
        let mut rng = Rng::from_seed(1602509940);
        let config = CalibrationConfig {
            row_column_pool: 64,
            ..Default::default()
        };
        let region = Region::new(0x4000_0000, 1 << 30);
        let result =
            find_row_and_column_bits(&mut dram, &maps(), region, 325, &config, &mut rng).unwrap();

        assert!(region.contains(result.base));
        // bank bits are compensated through row bits, so they conflict too
        assert_eq!(result.row_bits, (13..30).collect::<Vec<u32>>());
        assert_eq!(result.row_misses, 10);
        assert_eq!(result.probes.len(), 27);
        assert_eq!(dram.probes, 27);
    }
}
