//! Bank conflict survey and bank function discovery.

use indicatif::MultiProgress;
use itertools::Itertools;
use log::{debug, info};
use smelt_core::memory::{Address, AddressPool, Region};
use smelt_core::stats::{Distribution, Histogram, histogram, summarize};
use smelt_core::util::named_bar;

use crate::{CalibrationConfig, PairTimer, Result, ReverseError};

/// Median latencies of `large` random addresses, each paired with a partner
/// from a small random pool.
///
/// Pair `i` is `(small[i % small.len()], large[i])`, so every partner meets
/// `large.len() / small.len()` candidates.
#[derive(Clone, Debug)]
pub struct ConflictSurvey {
    small: Vec<Address>,
    large: Vec<Address>,
    medians: Vec<f64>,
}

impl ConflictSurvey {
    /// Draws both pools from `region` and times every pair.
    ///
    /// # Errors
    ///
    /// Fails if a pair cannot be timed.
    pub fn measure<P: PairTimer + ?Sized>(
        timer: &mut P,
        region: Region,
        config: &CalibrationConfig,
        rng: &mut impl rand::Rng,
        progress: Option<&MultiProgress>,
    ) -> Result<Self> {
        let large = AddressPool::random(region, config.large_pool, rng);
        let small = AddressPool::random(region, config.small_pool, rng);
        let survey = ConflictSurvey {
            small: small.addresses().to_vec(),
            large: large.addresses().to_vec(),
            medians: Vec::with_capacity(config.large_pool),
        };
        survey.time(timer, progress)
    }

    /// Creates a survey over explicit pools and times every pair.
    ///
    /// # Errors
    ///
    /// [`ReverseError::Config`] if `small` is empty, otherwise any timing
    /// failure.
    pub fn from_pools<P: PairTimer + ?Sized>(
        timer: &mut P,
        small: Vec<Address>,
        large: Vec<Address>,
    ) -> Result<Self> {
        if small.is_empty() {
            return Err(ReverseError::Config("empty partner pool".to_string()));
        }
        let medians = Vec::with_capacity(large.len());
        ConflictSurvey {
            small,
            large,
            medians,
        }
        .time(timer, None)
    }

    fn time<P: PairTimer + ?Sized>(
        mut self,
        timer: &mut P,
        progress: Option<&MultiProgress>,
    ) -> Result<Self> {
        let bar = named_bar(progress, "bank conflicts", self.large.len() as u64);
        for i in 0..self.large.len() {
            let median = timer.median_latency(self.partner(i), self.large[i])?;
            self.medians.push(median);
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        }
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        Ok(self)
    }

    /// Partner address of pair `i`.
    pub fn partner(&self, i: usize) -> Address {
        self.small[i % self.small.len()]
    }

    /// Candidate address of pair `i`.
    pub fn candidate(&self, i: usize) -> Address {
        self.large[i]
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.large.len()
    }

    /// Whether no pair was timed.
    pub fn is_empty(&self) -> bool {
        self.large.is_empty()
    }

    /// Median latency per pair, in pair order.
    pub fn medians(&self) -> &[f64] {
        &self.medians
    }

    /// Whether pair `i` is a bank conflict under `threshold`.
    pub fn is_conflict(&self, i: usize, threshold: i64) -> bool {
        self.medians[i] > threshold as f64
    }

    /// Index of the first pair above `threshold`.
    pub fn first_conflict(&self, threshold: i64) -> Option<usize> {
        (0..self.len()).find(|&i| self.is_conflict(i, threshold))
    }

    fn rounded_medians(&self) -> Vec<i64> {
        self.medians.iter().map(|m| m.round() as i64).collect()
    }

    /// Distribution of the pair medians.
    ///
    /// # Errors
    ///
    /// Fails if nothing was timed.
    pub fn distribution(&self, quantiles: usize) -> Result<Distribution> {
        Ok(summarize(&self.rounded_medians(), quantiles)?)
    }

    /// Histogram of the pair medians.
    ///
    /// # Errors
    ///
    /// Fails if nothing was timed.
    pub fn histogram(&self, granularity: u64) -> Result<Histogram> {
        Ok(histogram(&self.rounded_medians(), granularity)?)
    }
}

/// Bits that move the first conflicting candidate out of its partner's bank.
///
/// Flips each bit in `bank_low_bit..offset_bits` of the candidate and
/// re-times it against the partner; a median below `threshold` means the
/// flip ended the conflict.
///
/// # Errors
///
/// [`ReverseError::NoConflictPair`] if no surveyed pair is a conflict.
pub fn significant_bits<P: PairTimer + ?Sized>(
    timer: &mut P,
    survey: &ConflictSurvey,
    threshold: i64,
    config: &CalibrationConfig,
) -> Result<Vec<u32>> {
    let i = survey
        .first_conflict(threshold)
        .ok_or(ReverseError::NoConflictPair { threshold })?;
    let partner = survey.partner(i);
    let candidate = survey.candidate(i);
    info!(
        "bank conflict pair: {:.0} cycles, {:#x} {:#x}",
        survey.medians()[i],
        partner,
        candidate
    );

    let mut bits = vec![];
    for b in config.bank_low_bit..config.offset_bits {
        let median = timer.median_latency(partner, candidate ^ (1 << b))?;
        debug!("bit {}: {:.0} cycles", b, median);
        if median < threshold as f64 {
            bits.push(b);
        }
    }
    info!("significant bits: {:?}", bits);
    Ok(bits)
}

fn parity(addr: Address, bits: &[u32]) -> bool {
    bits.iter().fold(false, |acc, &b| acc ^ (addr >> b & 1 == 1))
}

/// Whether XOR over `bits` agrees on every conflicting pair and differs on
/// at least one other pair.
fn is_bank_function(survey: &ConflictSurvey, bits: &[u32], threshold: i64) -> bool {
    let mut distinguishes = false;
    for i in 0..survey.len() {
        let differs = parity(survey.partner(i) ^ survey.candidate(i), bits);
        if survey.is_conflict(i, threshold) {
            if differs {
                return false;
            }
        } else {
            distinguishes |= differs;
        }
    }
    distinguishes
}

/// XOR functions over `bits` consistent with the survey.
///
/// Subsets are tried by increasing size. A function is reported only if it
/// contains a bit no earlier function used, which drops linear combinations
/// of functions already found.
pub fn find_bank_functions(survey: &ConflictSurvey, bits: &[u32], threshold: i64) -> Vec<Vec<u32>> {
    let mut used = vec![0usize; bits.iter().max().map_or(0, |&b| b as usize + 1)];
    let mut functions = vec![];
    for k in 2..=bits.len() {
        for subset in bits.iter().copied().combinations(k) {
            if !is_bank_function(survey, &subset, threshold) {
                continue;
            }
            if subset.iter().all(|&b| used[b as usize] > 0) {
                debug!("skipping linear combination {:?}", subset);
                continue;
            }
            for &b in &subset {
                used[b as usize] += 1;
            }
            info!("found function {:?}", subset);
            functions.push(subset);
        }
    }
    functions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::tests::SimulatedDram;
    use smelt_core::util::Rng;

    const REGION: Region = Region::new(0x4000_0000, 1 << 30);

    fn dram(banks: Vec<usize>) -> SimulatedDram {
        SimulatedDram::new(banks, 0x3FFF_8000)
    }

    fn config() -> CalibrationConfig {
        CalibrationConfig {
            large_pool: 2048,
            small_pool: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_survey_pairs_round_robin() {
        let mut dram = dram(vec![1 << 13 | 1 << 14]);
        let survey = ConflictSurvey::from_pools(
            &mut dram,
            vec![0x4000_0000, 0x4000_2000],
            vec![0x4000_8000, 0x4000_8000, 0x4000_0040],
        )
        .unwrap();
        assert_eq!(dram.probes, 3);
        assert_eq!(survey.partner(2), 0x4000_0000);
        // conflict, other bank, same row
        assert_eq!(survey.medians(), &[400.0, 250.0, 250.0]);
        assert_eq!(survey.first_conflict(325), Some(0));
        assert_eq!(survey.first_conflict(400), None);
        assert_eq!(survey.distribution(4).unwrap().median(), 250.0);
    }

    #[test]
    fn test_recovers_single_parity_function() {
        let mut dram = dram(vec![1 << 13 | 1 << 14]);
        let mut rng = Rng::from_seed(1602509940);
        let config = config();
        let survey = ConflictSurvey::measure(&mut dram, REGION, &config, &mut rng, None).unwrap();
        assert_eq!(survey.len(), 2048);

        let bits = significant_bits(&mut dram, &survey, 325, &config).unwrap();
        assert_eq!(bits, vec![13, 14]);
        assert_eq!(find_bank_functions(&survey, &bits, 325), vec![vec![13, 14]]);
    }

    #[test]
    fn test_skips_linear_combinations() {
        let mut dram = dram(vec![1 << 13 | 1 << 16, 1 << 14 | 1 << 17]);
        let mut rng = Rng::from_seed(7);
        let config = config();
        let survey = ConflictSurvey::measure(&mut dram, REGION, &config, &mut rng, None).unwrap();
        // {13, 14, 16, 17} holds as well but adds no new bit
        let functions = find_bank_functions(&survey, &[13, 14, 16, 17], 325);
        assert_eq!(functions, vec![vec![13, 16], vec![14, 17]]);
    }

    #[test]
    fn test_no_conflict_pair() {
        let mut dram = dram(vec![1 << 13 | 1 << 14]);
        let survey =
            ConflictSurvey::from_pools(&mut dram, vec![0x4000_0000], vec![0x4000_2000]).unwrap();
        assert!(matches!(
            significant_bits(&mut dram, &survey, 325, &config()),
            Err(ReverseError::NoConflictPair { threshold: 325 })
        ));
        assert!(ConflictSurvey::from_pools(&mut dram, vec![], vec![0x4000_2000]).is_err());
    }

    #[test]
    fn test_constant_subset_is_not_a_function() {
        let mut dram = dram(vec![1 << 13 | 1 << 14]);
        let mut rng = Rng::from_seed(3);
        let survey = ConflictSurvey::measure(&mut dram, REGION, &config(), &mut rng, None).unwrap();
        // line offset bits are zero in every pool address
        assert!(find_bank_functions(&survey, &[0, 1], 325).is_empty());
    }
}
