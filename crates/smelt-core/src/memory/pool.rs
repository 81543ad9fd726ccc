use log::{debug, info};
use thiserror::Error;

use super::{Address, Constraints, Coordinate, CoordinateMaps, Region};
use crate::util::CL_SIZE;

/// Upper bound on the number of addresses a constrained scan collects.
pub const MAX_POOL_SIZE: usize = 1 << 20;

/// Errors of pool construction.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The row map does not match any host with known sibling bits
    #[error("unknown host: row coordinate of {probe:#x} is {row}")]
    UnknownHost {
        /// Address used to identify the host
        probe: Address,
        /// Its row coordinate
        row: usize,
    },
}

/// Host families with a known pair of sibling address bit sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Host {
    EightGb,
    SixteenGb,
}

impl Host {
    const PROBE: Address = 0x80000;

    fn detect(maps: &CoordinateMaps) -> Result<Host, PoolError> {
        let map = maps.map(Coordinate::Row);
        let row = map.get(Self::PROBE);
        if row == 4 ^ map.permutation() {
            Ok(Host::EightGb)
        } else if row == 1 {
            Ok(Host::SixteenGb)
        } else {
            Err(PoolError::UnknownHost {
                probe: Self::PROBE,
                row,
            })
        }
    }

    fn sibling_mask(self) -> usize {
        match self {
            Host::EightGb => 1 << 15 | 1 << 16 | 1 << 18 | 1 << 19,
            Host::SixteenGb => 1 << 9 | 1 << 13 | 1 << 16 | 1 << 20,
        }
    }
}

/// Bits 18 and 19 of `addr`, selecting sibling candidates.
pub fn free_bits(addr: Address) -> usize {
    (addr >> 18) & 0x3
}

/// A multiset of candidate addresses drawn from one region.
///
/// Order is irrelevant; addresses are removed with [`AddressPool::pop_random`].
#[derive(Clone, Debug)]
pub struct AddressPool {
    region: Region,
    addrs: Vec<Address>,
}

impl AddressPool {
    /// Collects every cache line of `region` that satisfies `constraints`.
    ///
    /// The scan runs in ascending address order and stops after
    /// [`MAX_POOL_SIZE`] matches.
    pub fn with_constraints(
        region: Region,
        maps: &CoordinateMaps,
        constraints: &Constraints,
    ) -> Self {
        let addrs: Vec<Address> = region
            .lines()
            .filter(|&addr| maps.matches(addr, constraints))
            .take(MAX_POOL_SIZE)
            .collect();
        debug!(
            "pool {:?}: {} addresses in {:#x}+{:#x}",
            constraints,
            addrs.len(),
            region.base,
            region.size
        );
        AddressPool { region, addrs }
    }

    /// Draws `n` uniformly random cache-line addresses of `region`, with repetition.
    pub fn random(region: Region, n: usize, rng: &mut impl rand::Rng) -> Self {
        let addrs = (0..n).map(|_| region.random_line(rng)).collect();
        AddressPool { region, addrs }
    }

    /// Creates a pool from explicit addresses.
    pub fn from_addresses(region: Region, addrs: Vec<Address>) -> Self {
        AddressPool { region, addrs }
    }

    /// The region this pool was drawn from.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Number of addresses left.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Whether the pool is exhausted.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Whether `addr` is in the pool.
    pub fn contains(&self, addr: Address) -> bool {
        self.addrs.contains(&addr)
    }

    /// The addresses left, in pool order.
    pub fn addresses(&self) -> &[Address] {
        &self.addrs
    }

    /// Iterates over the addresses left.
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.addrs.iter()
    }

    /// Removes and returns a uniformly chosen address satisfying `constraints`.
    ///
    /// Returns `None` if no address matches. The removed entry is replaced by
    /// the last one.
    pub fn pop_random(
        &mut self,
        maps: &CoordinateMaps,
        constraints: &Constraints,
        rng: &mut impl rand::Rng,
    ) -> Option<Address> {
        let candidates: Vec<Address> = self
            .addrs
            .iter()
            .copied()
            .filter(|&addr| maps.matches(addr, constraints))
            .collect();
        let addr = match candidates.len() {
            0 => return None,
            1 => candidates[0],
            n => candidates[rng.random_range(0..n)],
        };
        let index = self.addrs.iter().position(|&a| a == addr)?;
        self.addrs.swap_remove(index);
        Some(addr)
    }

    /// A uniformly random cache-line address of the region that is not in the pool.
    ///
    /// # Panics
    ///
    /// Panics if the pool covers every cache line of its region.
    pub fn random_address_outside(&self, rng: &mut impl rand::Rng) -> Address {
        assert!(
            self.addrs.len() < self.region.size / CL_SIZE
                || self.region.lines().any(|a| !self.contains(a)),
            "pool covers the whole region"
        );
        loop {
            let addr = self.region.random_line(rng);
            if !self.contains(addr) {
                return addr;
            }
        }
    }

    /// Replaces the pool by the addresses whose [`free_bits`] equal 1, each
    /// followed by its sibling address.
    ///
    /// The sibling differs in a host-specific set of bits that keeps it in
    /// the same bank and row.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownHost`] if the row map identifies no known host.
    pub fn extend_with_derived_addresses(&mut self, maps: &CoordinateMaps) -> Result<(), PoolError> {
        let host = Host::detect(maps)?;
        let flip = host.sibling_mask();
        let before = self.addrs.len();
        self.addrs = self
            .addrs
            .iter()
            .filter(|&&addr| free_bits(addr) == 1)
            .flat_map(|&addr| [addr, addr ^ flip])
            .take(MAX_POOL_SIZE)
            .collect();
        info!(
            "extended pool for {:?} host: {} -> {} addresses",
            host,
            before,
            self.addrs.len()
        );
        Ok(())
    }
}
