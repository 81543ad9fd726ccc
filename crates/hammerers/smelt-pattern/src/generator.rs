//! Aggressor, victim and eviction set selection.

use itertools::Itertools;
use log::{debug, info, trace};
use serde::Serialize;
use smelt_core::memory::{
    Address, AddressPool, Constraints, Coordinate, CoordinateMaps, Region,
};
use smelt_core::util::{CL_SIZE, WORD_SIZE};

use crate::config::{NUM_SETS, PatternConfig};
use crate::{PatternError, Result};

/// Aggressors of a pattern together with the rows they are expected to disturb.
///
/// Victims are stored row by row, `num_columns()` addresses per row, in the
/// order the rows were selected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AggressorSet {
    /// Aggressor addresses in pattern order
    pub aggressors: Vec<Address>,
    /// Victim addresses, one full row after another
    pub victims: Vec<Address>,
}

/// Builds access patterns from coordinate maps and address pools.
#[derive(Clone, Copy, Debug)]
pub struct Generator<'a> {
    maps: &'a CoordinateMaps,
    config: &'a PatternConfig,
}

impl<'a> Generator<'a> {
    /// Creates a generator for `config` over the geometry described by `maps`.
    pub fn new(maps: &'a CoordinateMaps, config: &'a PatternConfig) -> Self {
        Generator { maps, config }
    }

    /// The pattern configuration.
    pub fn config(&self) -> &PatternConfig {
        self.config
    }

    fn num_rows(&self) -> usize {
        self.maps.num_values(Coordinate::Row)
    }

    /// `row + delta`, wrapping around the row range.
    fn offset_row(&self, row: usize, delta: isize) -> usize {
        let rows = self.num_rows() as isize;
        (row as isize + delta).rem_euclid(rows) as usize
    }

    fn row_of(&self, addr: Address) -> usize {
        self.maps.get_coordinate(addr, Coordinate::Row)
    }

    /// Every column of `row` in `bank`, derived from the base of `region`.
    ///
    /// Row and column are written directly, the bank is then re-encoded
    /// without touching either.
    ///
    /// # Errors
    ///
    /// [`PatternError::NoVictimEncoding`] if a column has no bank-preserving
    /// encoding inside `region`.
    pub fn victim_row(&self, region: Region, row: usize, bank: usize) -> Result<Vec<Address>> {
        let missing = |column| PatternError::NoVictimEncoding { row, column };
        let base = self
            .maps
            .set_coordinate(region.base, Coordinate::Row, row)
            .first()
            .copied()
            .ok_or_else(|| missing(0))?;
        (0..self.maps.num_columns())
            .map(|column| {
                self.maps
                    .set_coordinate(base, Coordinate::Column, column)
                    .first()
                    .and_then(|&addr| {
                        self.maps.set_coordinate_preserving(
                            addr,
                            Coordinate::Bank,
                            bank,
                            &[Coordinate::Row, Coordinate::Column],
                        )
                    })
                    .filter(|&addr| region.contains(addr))
                    .ok_or_else(|| missing(column))
            })
            .collect()
    }

    fn push_victim_rows(
        &self,
        victims: &mut Vec<Address>,
        region: Region,
        rows: impl IntoIterator<Item = usize>,
        bank: usize,
    ) -> Result<()> {
        for row in rows {
            victims.extend(self.victim_row(region, row, bank)?);
        }
        Ok(())
    }

    /// Pops an aggressor two rows above `row`, or two rows below if the pool
    /// has none above. Returns the address and the direction taken.
    fn pop_neighbor(
        &self,
        pool: &mut AddressPool,
        constraints: &mut Constraints,
        row: usize,
        rng: &mut impl rand::Rng,
    ) -> Result<(Address, isize)> {
        constraints.set(Coordinate::Row, Some(row + 2));
        if let Some(addr) = pool.pop_random(self.maps, constraints, rng) {
            return Ok((addr, 1));
        }
        if let Some(below) = row.checked_sub(2) {
            constraints.set(Coordinate::Row, Some(below));
            if let Some(addr) = pool.pop_random(self.maps, constraints, rng) {
                return Ok((addr, -1));
            }
        }
        Err(PatternError::Exhausted)
    }

    /// Classic double-sided hammering of consecutive rows.
    ///
    /// Aggressors sit at rows `row, row + 2, ...` of `bank`; victims are the
    /// rows below the first and above every aggressor.
    ///
    /// # Errors
    ///
    /// [`PatternError::Exhausted`] if the pool has no address for a row.
    pub fn classic(
        &self,
        pool: &mut AddressPool,
        row: usize,
        bank: usize,
        rng: &mut impl rand::Rng,
    ) -> Result<AggressorSet> {
        let region = pool.region();
        let num_aggressors = self.config.num_aggressors();
        let mut set = AggressorSet {
            aggressors: Vec::with_capacity(num_aggressors),
            victims: Vec::with_capacity((num_aggressors + 1) * self.maps.num_columns()),
        };
        self.push_victim_rows(&mut set.victims, region, [self.offset_row(row, -1)], bank)?;
        for i in 0..num_aggressors {
            let agg_row = row + 2 * i;
            let constraints = Constraints::default()
                .with(Coordinate::Row, agg_row)
                .with(Coordinate::Bank, bank);
            let addr = pool
                .pop_random(self.maps, &constraints, rng)
                .ok_or(PatternError::Exhausted)?;
            set.aggressors.push(addr);
            self.push_victim_rows(&mut set.victims, region, [self.offset_row(agg_row, 1)], bank)?;
        }
        check_prefetch(&set.aggressors)?;
        self.log_aggressors(&set.aggressors);
        Ok(set)
    }

    /// Independent double-sided pairs in one bank, cache set and slice.
    ///
    /// `target` must pin the bank. A pinned row places the first pair, later
    /// pairs pick random rows. The first aggressor fixes set and slice for
    /// all first aggressors; second aggressors share the slice and, after
    /// the first pair, the set of the first second aggressor.
    ///
    /// # Errors
    ///
    /// [`PatternError::Exhausted`] if the pool cannot supply a pair, and
    /// [`PatternError::PrefetchInterference`] if two aggressors end up within
    /// one cache line.
    pub fn n_sided(
        &self,
        pool: &mut AddressPool,
        target: Constraints,
        rng: &mut impl rand::Rng,
    ) -> Result<AggressorSet> {
        let bank = target
            .get(Coordinate::Bank)
            .ok_or_else(|| PatternError::Config("n-sided target needs a bank".into()))?;
        let region = pool.region();
        let num_aggressors = self.config.num_aggressors();
        let mut set = AggressorSet {
            aggressors: Vec::with_capacity(num_aggressors),
            victims: Vec::with_capacity(num_aggressors * 3 * self.maps.num_columns()),
        };
        let mut first = target;
        let mut second = Constraints::default().with(Coordinate::Bank, bank);

        for pair in 0..num_aggressors / 2 {
            if pair > 0 {
                first.set(Coordinate::Row, None);
            }
            let low = pool
                .pop_random(self.maps, &first, rng)
                .ok_or(PatternError::Exhausted)?;
            let row = self.row_of(low);
            first.set(Coordinate::Row, Some(row));
            if pair == 0 {
                let slice = self.maps.get_coordinate(low, Coordinate::Slice);
                first.set(Coordinate::Set, Some(self.maps.get_coordinate(low, Coordinate::Set)));
                first.set(Coordinate::Slice, Some(slice));
                second.set(Coordinate::Slice, Some(slice));
            }
            self.push_victim_rows(
                &mut set.victims,
                region,
                [-1, 0, 1].map(|d| self.offset_row(row, d)),
                bank,
            )?;

            let (high, sign) = self.pop_neighbor(pool, &mut second, row, rng)?;
            if pair == 0 {
                second.set(Coordinate::Set, Some(self.maps.get_coordinate(high, Coordinate::Set)));
            }
            let high_row = self.row_of(high);
            self.push_victim_rows(
                &mut set.victims,
                region,
                [0, sign, 2 * sign].map(|d| self.offset_row(high_row, d)),
                bank,
            )?;
            set.aggressors.extend([low, high]);
        }
        check_prefetch(&set.aggressors)?;
        self.log_aggressors(&set.aggressors);
        Ok(set)
    }

    /// Double-sided pairs with one auxiliary same-set access per aggressor.
    ///
    /// Aggressors come from a pool of `bank` in `region` extended with
    /// derived sibling addresses. Each pair contributes `[low, high,
    /// aux_low, aux_high]`, where the auxiliaries are arbitrary other
    /// addresses sharing set and slice with their aggressor.
    ///
    /// # Errors
    ///
    /// [`PatternError::Pool`] if the host is unknown and
    /// [`PatternError::Exhausted`] if a pool runs dry.
    pub fn anvil(
        &self,
        region: Region,
        row: usize,
        bank: usize,
        rng: &mut impl rand::Rng,
    ) -> Result<AggressorSet> {
        let bank_only = Constraints::default().with(Coordinate::Bank, bank);
        let mut pool = AddressPool::with_constraints(region, self.maps, &bank_only);
        pool.extend_with_derived_addresses(self.maps)?;

        let num_aggressors = self.config.num_aggressors();
        let mut set = AggressorSet {
            aggressors: Vec::with_capacity(num_aggressors),
            victims: Vec::with_capacity(num_aggressors / 4 * 6 * self.maps.num_columns()),
        };
        let mut constraints = bank_only;
        for i in (0..num_aggressors).step_by(4) {
            constraints.set(Coordinate::Row, (i == 0).then_some(row));
            let low = pool
                .pop_random(self.maps, &constraints, rng)
                .ok_or(PatternError::Exhausted)?;
            let low_row = self.row_of(low);
            constraints.set(Coordinate::Row, Some(low_row));
            self.push_victim_rows(
                &mut set.victims,
                region,
                [-1, 0, 1].map(|d| self.offset_row(low_row, d)),
                bank,
            )?;

            let (high, sign) = self.pop_neighbor(&mut pool, &mut constraints, low_row, rng)?;
            let high_row = self.row_of(high);
            self.push_victim_rows(
                &mut set.victims,
                region,
                [0, sign, 2 * sign].map(|d| self.offset_row(high_row, d)),
                bank,
            )?;

            set.aggressors.extend([low, high]);
            let aux_low = self.same_set(region, low, &set.aggressors, rng)?;
            set.aggressors.push(aux_low);
            let aux_high = self.same_set(region, high, &set.aggressors, rng)?;
            set.aggressors.push(aux_high);
        }
        self.log_aggressors(&set.aggressors);
        Ok(set)
    }

    /// A random address of `region` in the set and slice of `addr` that is
    /// not in `used`.
    fn same_set(
        &self,
        region: Region,
        addr: Address,
        used: &[Address],
        rng: &mut impl rand::Rng,
    ) -> Result<Address> {
        let constraints = self.set_slice_of(addr);
        let mut pool = AddressPool::with_constraints(region, self.maps, &constraints);
        pop_unused(&mut pool, self.maps, &constraints, used, rng)
    }

    fn set_slice_of(&self, addr: Address) -> Constraints {
        Constraints::of(self.maps, addr, &[Coordinate::Set, Coordinate::Slice])
    }

    /// Evictions for every cycle of a pattern.
    ///
    /// One cycle's worth is drawn from `pool`, eviction `i` sharing set and
    /// slice with aggressor `i % NUM_SETS`. Later cycles repeat the first;
    /// assembly shifts each cycle by one word.
    ///
    /// # Errors
    ///
    /// [`PatternError::Exhausted`] if the pool runs dry.
    pub fn eviction_set(
        &self,
        pool: &mut AddressPool,
        aggressors: &[Address],
        rng: &mut impl rand::Rng,
    ) -> Result<Vec<Address>> {
        let num_evictions = self.config.num_evictions();
        let per_cycle = self.config.evictions_per_cycle();
        if num_evictions > 0 && aggressors.len() < NUM_SETS {
            return Err(PatternError::Config(format!(
                "eviction sets need {} aggressors, got {}",
                NUM_SETS,
                aggressors.len()
            )));
        }
        let mut evictions = Vec::with_capacity(num_evictions);
        for i in 0..num_evictions {
            if i < per_cycle {
                let constraints = self.set_slice_of(aggressors[i % NUM_SETS]);
                let addr = pool
                    .pop_random(self.maps, &constraints, rng)
                    .ok_or(PatternError::Exhausted)?;
                evictions.push(addr);
            } else {
                evictions.push(evictions[i - per_cycle]);
            }
        }
        debug!("{} evictions, {} distinct", evictions.len(), per_cycle.min(num_evictions));
        Ok(evictions)
    }

    /// Evictions for an anvil pattern.
    ///
    /// Every block of two cycles belongs to one aggressor pair. Its first
    /// half alternates between lines sharing set and slice with the low and
    /// the high aggressor, drawn fresh from `region`; the second half repeats
    /// the first half one word further into each line.
    ///
    /// # Errors
    ///
    /// [`PatternError::Exhausted`] if a set has too few lines.
    pub fn anvil_eviction_set(
        &self,
        region: Region,
        aggressors: &[Address],
        rng: &mut impl rand::Rng,
    ) -> Result<Vec<Address>> {
        let num_evictions = self.config.num_evictions();
        let per_cycle = self.config.evictions_per_cycle();
        let mut evictions = vec![0; num_evictions];
        for block in (0..num_evictions).step_by(2 * per_cycle) {
            for j in 0..2 {
                let owner = aggressors
                    .get(block / (2 * per_cycle) * 4 + j)
                    .copied()
                    .ok_or_else(|| {
                        PatternError::Config("too few aggressors for anvil evictions".into())
                    })?;
                let constraints = self.set_slice_of(owner);
                let mut pool = AddressPool::with_constraints(region, self.maps, &constraints);
                for k in (0..per_cycle).step_by(2) {
                    evictions[block + j + k] =
                        pop_unused(&mut pool, self.maps, &constraints, aggressors, rng)?;
                }
            }
            for k in 0..per_cycle {
                evictions[block + per_cycle + k] = evictions[block + k] + WORD_SIZE;
            }
        }
        for addr in &evictions {
            trace!("eviction {:#x} {}", addr, self.maps.describe(*addr));
        }
        Ok(evictions)
    }

    /// Interleaves aggressors and evictions into the final pattern.
    ///
    /// Slot `j` of every cycle holds the next aggressor (cyclically) if bit
    /// `j` of `schedule` is set and the next eviction otherwise. Every
    /// address of cycle `i` is shifted by `i` words, so repeated lines map to
    /// distinct chase elements. With explicit flushing the pattern is the
    /// aggressor list itself.
    ///
    /// # Errors
    ///
    /// [`PatternError::ScheduleMismatch`] unless the last cycle ends exactly
    /// on the first aggressor and consumes every eviction.
    pub fn assemble(
        &self,
        aggressors: &[Address],
        evictions: &[Address],
        schedule: u64,
    ) -> Result<Vec<Address>> {
        if aggressors.is_empty() {
            return Err(PatternError::Config("pattern without aggressors".into()));
        }
        if self.config.clflush.is_enabled() {
            return Ok(aggressors.to_vec());
        }
        let cycle_len = self.config.cycle_len();
        let mut pattern = Vec::with_capacity(self.config.num_cycles() * cycle_len);
        let mut a = 0;
        let mut e = 0;
        for cycle in 0..self.config.num_cycles() {
            for slot in 0..cycle_len {
                let addr = if (schedule >> slot) & 1 == 1 {
                    let addr = aggressors[a];
                    a = (a + 1) % aggressors.len();
                    addr
                } else {
                    let addr = evictions.get(e).copied().ok_or(PatternError::ScheduleMismatch {
                        aggressor: a,
                        evictions: e,
                        expected: evictions.len(),
                    })?;
                    e += 1;
                    addr
                };
                pattern.push(addr + cycle * WORD_SIZE);
            }
        }
        if a != 0 || e != evictions.len() {
            return Err(PatternError::ScheduleMismatch {
                aggressor: a,
                evictions: e,
                expected: evictions.len(),
            });
        }
        info!(
            "assembled {} addresses from {} aggressors and {} evictions",
            pattern.len(),
            aggressors.len(),
            evictions.len()
        );
        Ok(pattern)
    }

    fn log_aggressors(&self, aggressors: &[Address]) {
        for addr in aggressors {
            debug!("aggressor {:#x} {}", addr, self.maps.describe(*addr));
        }
    }
}

/// Pops addresses until one is not in `used`.
fn pop_unused(
    pool: &mut AddressPool,
    maps: &CoordinateMaps,
    constraints: &Constraints,
    used: &[Address],
    rng: &mut impl rand::Rng,
) -> Result<Address> {
    loop {
        let addr = pool
            .pop_random(maps, constraints, rng)
            .ok_or(PatternError::Exhausted)?;
        if !used.contains(&addr) {
            return Ok(addr);
        }
    }
}

/// Rejects aggressor sets in which two cache-line-aligned aggressors are at
/// most one line apart, as the adjacent-line prefetcher would pull one in
/// with the other.
fn check_prefetch(aggressors: &[Address]) -> Result<()> {
    let line = |addr: Address| addr - addr % CL_SIZE;
    match aggressors
        .iter()
        .tuple_combinations()
        .find(|&(&a, &b)| line(a).abs_diff(line(b)) <= CL_SIZE)
    {
        Some((&a, &b)) => Err(PatternError::PrefetchInterference { a, b }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smelt_core::memory::CoordinateMap;
    use smelt_core::util::Rng;
    use std::collections::HashMap;

    const BASE: Address = 0x20_0000_0000;

    /// 64 rows (bits 15..20), 16 columns, 4 banks, one set and one slice bit.
    fn maps() -> CoordinateMaps {
        CoordinateMaps::new()
            .with_map(CoordinateMap::new(Coordinate::Row, vec![0x1F_8000], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Column, vec![0x3C0], 0).unwrap())
            .with_map(
                CoordinateMap::new(Coordinate::Bank, vec![1 << 10 | 1 << 15, 1 << 11 | 1 << 16], 0)
                    .unwrap(),
            )
            .with_map(CoordinateMap::new(Coordinate::Set, vec![0x1000], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Slice, vec![0x2000], 0).unwrap())
    }

    fn region() -> Region {
        Region::new(BASE, 1 << 21)
    }

    fn rows(maps: &CoordinateMaps, victims: &[Address]) -> Vec<usize> {
        victims
            .chunks(maps.num_columns())
            .map(|row| {
                let r = maps.get_coordinate(row[0], Coordinate::Row);
                assert!(row.iter().all(|&a| maps.get_coordinate(a, Coordinate::Row) == r));
                r
            })
            .collect()
    }

    #[test]
    fn test_victim_row() {
        let maps = maps();
        let config = PatternConfig::default();
        let generator = Generator::new(&maps, &config);
        let row = generator.victim_row(region(), 33, 2).unwrap();
        assert_eq!(row.len(), 16);
        for (column, &addr) in row.iter().enumerate() {
            assert_eq!(maps.get_coordinate(addr, Coordinate::Row), 33);
            assert_eq!(maps.get_coordinate(addr, Coordinate::Column), column);
            assert_eq!(maps.get_coordinate(addr, Coordinate::Bank), 2);
            assert!(region().contains(addr));
        }
    }

    #[test]
    fn test_victim_row_outside_region() {
        let maps = maps();
        let config = PatternConfig::default();
        let generator = Generator::new(&maps, &config);
        let small = Region::new(BASE, 1 << 16);
        assert!(matches!(
            generator.victim_row(small, 3, 0),
            Err(PatternError::NoVictimEncoding { row: 3, column: 0 })
        ));
    }

    #[test]
    fn test_classic_rows() {
        let maps = maps();
        let config = PatternConfig {
            aggressors_per_set: 2,
            strategy: crate::Strategy::Classic,
            ..Default::default()
        };
        let generator = Generator::new(&maps, &config);
        let mut pool = AddressPool::with_constraints(
            region(),
            &maps,
            &Constraints::default().with(Coordinate::Bank, 0),
        );
        let before = pool.len();
        let mut rng = Rng::from_seed(7);
        let set = generator.classic(&mut pool, 10, 0, &mut rng).unwrap();

        assert_eq!(pool.len(), before - 4);
        let agg_rows: Vec<usize> = set
            .aggressors
            .iter()
            .map(|&a| maps.get_coordinate(a, Coordinate::Row))
            .collect();
        assert_eq!(agg_rows, vec![10, 12, 14, 16]);
        assert!(set.aggressors.iter().all(|&a| maps.get_coordinate(a, Coordinate::Bank) == 0));
        assert_eq!(set.victims.len(), 5 * maps.num_columns());
        assert_eq!(rows(&maps, &set.victims), vec![9, 11, 13, 15, 17]);
        assert!(set.victims.iter().all(|&a| maps.get_coordinate(a, Coordinate::Bank) == 0));
    }

    #[test]
    fn test_classic_exhausted() {
        let maps = maps();
        let config = PatternConfig {
            aggressors_per_set: 2,
            ..Default::default()
        };
        let generator = Generator::new(&maps, &config);
        let mut pool = AddressPool::with_constraints(
            region(),
            &maps,
            &Constraints::default().with(Coordinate::Bank, 0),
        );
        let mut rng = Rng::from_seed(7);
        // rows 60, 62, 64, 66: the last two do not exist
        let err = generator.classic(&mut pool, 60, 0, &mut rng).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_n_sided_pair() {
        let maps = maps();
        let config = PatternConfig {
            aggressors_per_set: 1,
            ..Default::default()
        };
        let generator = Generator::new(&maps, &config);
        let mut pool = AddressPool::with_constraints(
            region(),
            &maps,
            &Constraints::default().with(Coordinate::Bank, 0),
        );
        let mut rng = Rng::from_seed(1602509940);
        let target = Constraints::default()
            .with(Coordinate::Row, 20)
            .with(Coordinate::Bank, 0)
            .with(Coordinate::Slice, 1);
        let set = generator.n_sided(&mut pool, target, &mut rng).unwrap();

        let [low, high] = set.aggressors[..] else {
            panic!("expected one pair, got {:?}", set.aggressors);
        };
        assert_eq!(maps.get_coordinate(low, Coordinate::Row), 20);
        assert_eq!(maps.get_coordinate(high, Coordinate::Row), 22);
        assert_eq!(maps.get_coordinate(low, Coordinate::Slice), 1);
        assert_eq!(maps.get_coordinate(high, Coordinate::Slice), 1);
        assert_eq!(rows(&maps, &set.victims), vec![19, 20, 21, 22, 23, 24]);
    }

    #[test]
    fn test_n_sided_falls_back_below() {
        let maps = maps();
        let config = PatternConfig {
            aggressors_per_set: 1,
            ..Default::default()
        };
        let generator = Generator::new(&maps, &config);
        let mut pool = AddressPool::with_constraints(
            region(),
            &maps,
            &Constraints::default().with(Coordinate::Bank, 1),
        );
        let mut rng = Rng::from_seed(3);
        let target = Constraints::default()
            .with(Coordinate::Row, 63)
            .with(Coordinate::Bank, 1);
        let set = generator.n_sided(&mut pool, target, &mut rng).unwrap();
        assert_eq!(maps.get_coordinate(set.aggressors[1], Coordinate::Row), 61);
        // the row above 63 wraps to 0
        assert_eq!(rows(&maps, &set.victims), vec![62, 63, 0, 61, 60, 59]);
    }

    #[test]
    fn test_n_sided_needs_bank() {
        let maps = maps();
        let config = PatternConfig::default();
        let generator = Generator::new(&maps, &config);
        let mut pool = AddressPool::from_addresses(region(), vec![BASE]);
        let mut rng = Rng::from_seed(3);
        assert!(matches!(
            generator.n_sided(&mut pool, Constraints::default(), &mut rng),
            Err(PatternError::Config(_))
        ));
    }

    #[test]
    fn test_prefetch_check() {
        assert!(check_prefetch(&[BASE, BASE + 2 * CL_SIZE, BASE + 0x8000]).is_ok());
        assert!(matches!(
            check_prefetch(&[BASE + 8, BASE + 0x8000, BASE + CL_SIZE + 56]),
            Err(PatternError::PrefetchInterference { a, b }) if a == BASE + 8 && b == BASE + CL_SIZE + 56
        ));
    }

    #[test]
    fn test_n_sided_rejects_adjacent_lines() {
        // rows start at bit 5, so rows r and r + 2 are neighbouring lines
        let maps = CoordinateMaps::new()
            .with_map(CoordinateMap::new(Coordinate::Row, vec![0x7E0], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Column, vec![0x18], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Bank, vec![0x800], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Set, vec![0x1000], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Slice, vec![0x2000], 0).unwrap());
        let config = PatternConfig {
            aggressors_per_set: 1,
            ..Default::default()
        };
        let generator = Generator::new(&maps, &config);
        let region = Region::new(BASE, 1 << 11);
        let mut pool = AddressPool::with_constraints(
            region,
            &maps,
            &Constraints::default().with(Coordinate::Bank, 0),
        );
        let mut rng = Rng::from_seed(1602509940);
        let target = Constraints::default()
            .with(Coordinate::Row, 20)
            .with(Coordinate::Bank, 0);
        let result = generator.n_sided(&mut pool, target, &mut rng);
        assert!(matches!(
            result,
            Err(PatternError::PrefetchInterference { a, b }) if a == BASE + 640 && b == BASE + 704
        ));
    }

    #[test]
    fn test_eviction_set() {
        let maps = maps();
        let config = PatternConfig {
            cache_associativity: 4,
            aggressors_per_set: 1,
            slots: 1,
            schedule: 0x3,
            ..Default::default()
        };
        config.validate().unwrap();
        let generator = Generator::new(&maps, &config);
        let mut pool = AddressPool::with_constraints(
            region(),
            &maps,
            &Constraints::default().with(Coordinate::Bank, 0),
        );
        let aggressors = [BASE, BASE + 0x3000];
        let mut rng = Rng::from_seed(11);
        let evictions = generator.eviction_set(&mut pool, &aggressors, &mut rng).unwrap();
        assert_eq!(evictions.len(), 6);
        for (i, &e) in evictions.iter().enumerate() {
            let owner = aggressors[i % NUM_SETS];
            assert_eq!(
                maps.get_coordinate(e, Coordinate::Set),
                maps.get_coordinate(owner, Coordinate::Set)
            );
            assert_eq!(
                maps.get_coordinate(e, Coordinate::Slice),
                maps.get_coordinate(owner, Coordinate::Slice)
            );
        }
    }

    #[test]
    fn test_eviction_set_repeats_cycles() {
        let maps = maps();
        let config = PatternConfig::default();
        let generator = Generator::new(&maps, &config);
        let mut pool = AddressPool::with_constraints(
            region(),
            &maps,
            &Constraints::default().with(Coordinate::Bank, 3),
        );
        let aggressors = [BASE + 0x1000, BASE + 0x2000];
        let mut rng = Rng::from_seed(11);
        let evictions = generator.eviction_set(&mut pool, &aggressors, &mut rng).unwrap();
        let per_cycle = config.evictions_per_cycle();
        assert_eq!(evictions.len(), 3 * per_cycle);
        assert_eq!(evictions[..per_cycle], evictions[per_cycle..2 * per_cycle]);
        assert_eq!(evictions[..per_cycle], evictions[2 * per_cycle..]);
    }

    fn reconstruct(
        config: &PatternConfig,
        pattern: &[Address],
    ) -> HashMap<Address, usize> {
        let mut seen = HashMap::new();
        for (k, &addr) in pattern.iter().enumerate() {
            let cycle = k / config.cycle_len();
            *seen.entry(addr - cycle * WORD_SIZE).or_insert(0) += 1;
        }
        seen
    }

    #[test]
    fn test_assemble_uses_every_address_once() {
        let maps = maps();
        let config = PatternConfig::default();
        let generator = Generator::new(&maps, &config);
        let aggressors: Vec<Address> = (0..18).map(|i| BASE + i * 0x10_0000).collect();
        // distinct evictions so each one can be told apart after assembly
        let evictions: Vec<Address> = (0..78).map(|i| BASE + 0x4000_0000 + i * 0x1000).collect();
        let pattern = generator.assemble(&aggressors, &evictions, config.schedule).unwrap();
        assert_eq!(pattern.len(), config.pattern_len());
        assert_eq!(pattern[0], aggressors[0]);
        assert_eq!(pattern[1], aggressors[1]);
        assert_eq!(pattern[2], evictions[0]);
        assert_eq!(pattern[32], aggressors[6] + WORD_SIZE);

        let seen = reconstruct(&config, &pattern);
        assert_eq!(seen.len(), 18 + 78);
        assert!(aggressors.iter().chain(&evictions).all(|a| seen[a] == 1));
    }

    #[test]
    fn test_assemble_wraps_aggressors() {
        let maps = maps();
        let config = PatternConfig {
            aggressors_per_set: 5,
            cycles: Some(5),
            ..Default::default()
        };
        let generator = Generator::new(&maps, &config);
        let aggressors: Vec<Address> = (0..10).map(|i| BASE + i * 0x10_0000).collect();
        let evictions: Vec<Address> = (0..130).map(|i| BASE + 0x4000_0000 + i * 0x1000).collect();
        let pattern = generator.assemble(&aggressors, &evictions, config.schedule).unwrap();
        assert_eq!(pattern.len(), 160);
        let aggressor_slots = pattern
            .iter()
            .enumerate()
            .filter(|(k, _)| (config.schedule >> (k % config.cycle_len())) & 1 == 1)
            .count();
        assert_eq!(aggressor_slots, 30);
    }

    #[test]
    fn test_assemble_mismatch() {
        let maps = maps();
        let config = PatternConfig::default();
        let generator = Generator::new(&maps, &config);
        let aggressors: Vec<Address> = (0..18).map(|i| BASE + i * 0x10_0000).collect();
        let evictions: Vec<Address> = (0..80).map(|i| BASE + 0x4000_0000 + i * 0x1000).collect();
        assert!(matches!(
            generator.assemble(&aggressors, &evictions, config.schedule),
            Err(PatternError::ScheduleMismatch { aggressor: 0, evictions: 78, expected: 80 })
        ));
        assert!(matches!(
            generator.assemble(&aggressors[..17], &evictions[..78], config.schedule),
            Err(PatternError::ScheduleMismatch { aggressor: 1, .. })
        ));
    }

    /// Row bits 17..20 with bit 19 selecting the 8 GB host layout.
    fn anvil_maps() -> CoordinateMaps {
        CoordinateMaps::new()
            .with_map(CoordinateMap::new(Coordinate::Row, vec![0x1E_0000], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Column, vec![0x3C0], 0).unwrap())
            .with_map(
                CoordinateMap::new(Coordinate::Bank, vec![1 << 10 | 1 << 17, 1 << 11 | 1 << 20], 0)
                    .unwrap(),
            )
            .with_map(CoordinateMap::new(Coordinate::Set, vec![0x1000], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Slice, vec![0x2000], 0).unwrap())
    }

    fn anvil_config() -> PatternConfig {
        PatternConfig {
            cache_associativity: 4,
            aggressors_per_set: 2,
            slots: 1,
            schedule: 0x3,
            strategy: crate::Strategy::Anvil,
            ..Default::default()
        }
    }

    #[test]
    fn test_anvil_pair() {
        let maps = anvil_maps();
        let config = anvil_config();
        config.validate().unwrap();
        let generator = Generator::new(&maps, &config);
        let mut rng = Rng::from_seed(5);
        let set = generator.anvil(region(), 2, 0, &mut rng).unwrap();

        let [low, high, aux_low, aux_high] = set.aggressors[..] else {
            panic!("expected four aggressors, got {:?}", set.aggressors);
        };
        assert_eq!(maps.get_coordinate(low, Coordinate::Row), 2);
        assert_eq!(maps.get_coordinate(high, Coordinate::Row), 4);
        assert_eq!(maps.get_coordinate(high, Coordinate::Bank), 0);
        assert_eq!(generator.set_slice_of(aux_low), generator.set_slice_of(low));
        assert_eq!(generator.set_slice_of(aux_high), generator.set_slice_of(high));
        assert!(set.aggressors.iter().all_unique());
        assert_eq!(rows(&maps, &set.victims), vec![1, 2, 3, 4, 5, 6]);

        let evictions = generator
            .anvil_eviction_set(region(), &set.aggressors, &mut rng)
            .unwrap();
        assert_eq!(evictions.len(), 12);
        for k in 0..6 {
            assert_eq!(evictions[6 + k], evictions[k] + WORD_SIZE);
            let owner = set.aggressors[k % 2];
            assert_eq!(generator.set_slice_of(evictions[k]), generator.set_slice_of(owner));
            assert!(!set.aggressors.contains(&evictions[k]));
        }
        let pattern = generator
            .assemble(&set.aggressors, &evictions, config.schedule)
            .unwrap();
        assert_eq!(pattern.len(), config.pattern_len());
    }

    #[test]
    fn test_anvil_unknown_host() {
        let maps = maps();
        let config = anvil_config();
        let generator = Generator::new(&maps, &config);
        let mut rng = Rng::from_seed(5);
        assert!(matches!(
            generator.anvil(region(), 2, 0, &mut rng),
            Err(PatternError::Pool(_))
        ));
    }
}
