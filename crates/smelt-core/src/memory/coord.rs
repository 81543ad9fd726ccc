//! Translation between addresses and DRAM coordinates.
//!
//! A [`CoordinateMap`] is a list of bit masks over an address. With a single
//! mask the coordinate is the masked bit field compacted to the low bits. With
//! several masks, bit `i` of the coordinate is the parity of the address bits
//! selected by mask `i`, and encoding a coordinate becomes a search over the
//! joint mask.
//!
//! [`CoordinateMaps`] holds at most one map per [`Coordinate`] and is built
//! once from a [`MapConfig`](super::MapConfig).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use super::Address;

/// Maximum number of masks a single coordinate map may consist of.
pub const MAX_NUM_MASKS: usize = 8;

/// Number of coordinates known to smelt.
pub const NUM_COORDINATES: usize = 5;

/// A DRAM (or cache) coordinate of an address.
///
/// The channel is treated as part of the bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coordinate {
    /// DRAM row
    Row,
    /// DRAM column
    Column,
    /// DRAM bank (including channel and rank)
    Bank,
    /// Last-level cache set
    Set,
    /// Last-level cache slice
    Slice,
}

impl Coordinate {
    /// All coordinates in canonical `r, c, b, s, l` order.
    pub const ALL: [Coordinate; NUM_COORDINATES] = [
        Coordinate::Row,
        Coordinate::Column,
        Coordinate::Bank,
        Coordinate::Set,
        Coordinate::Slice,
    ];

    /// Position of this coordinate in [`Coordinate::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Coordinate::Row => 0,
            Coordinate::Column => 1,
            Coordinate::Bank => 2,
            Coordinate::Set => 3,
            Coordinate::Slice => 4,
        }
    }

    /// Short name used in configuration and reports.
    pub const fn as_char(self) -> char {
        match self {
            Coordinate::Row => 'r',
            Coordinate::Column => 'c',
            Coordinate::Bank => 'b',
            Coordinate::Set => 's',
            Coordinate::Slice => 'l',
        }
    }

    /// Parses the short name produced by [`Coordinate::as_char`].
    pub fn from_char(c: char) -> Option<Self> {
        Coordinate::ALL.into_iter().find(|coord| coord.as_char() == c)
    }

    /// Name of the configuration file (without extension) holding this map.
    pub const fn conf_name(self) -> &'static str {
        match self {
            Coordinate::Row => "row",
            Coordinate::Column => "column",
            Coordinate::Bank => "bank",
            Coordinate::Set => "set",
            Coordinate::Slice => "slice",
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.conf_name())
    }
}

/// Per-coordinate value constraints, `None` being a wildcard.
///
/// # Examples
///
/// ```
/// use smelt_core::memory::{Constraints, Coordinate};
///
/// let c = Constraints::default().with(Coordinate::Bank, 0);
/// assert_eq!(c.get(Coordinate::Bank), Some(0));
/// assert_eq!(c.get(Coordinate::Row), None);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Constraints([Option<usize>; NUM_COORDINATES]);

impl Constraints {
    /// Returns a copy with `coordinate` pinned to `value`.
    pub fn with(mut self, coordinate: Coordinate, value: usize) -> Self {
        self.0[coordinate.index()] = Some(value);
        self
    }

    /// Pins or releases `coordinate`.
    pub fn set(&mut self, coordinate: Coordinate, value: Option<usize>) {
        self.0[coordinate.index()] = value;
    }

    /// The value `coordinate` is pinned to, if any.
    pub fn get(&self, coordinate: Coordinate) -> Option<usize> {
        self.0[coordinate.index()]
    }

    /// Whether at least one coordinate is pinned.
    pub fn any(&self) -> bool {
        self.0.iter().any(Option::is_some)
    }

    /// Iterates over the pinned coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (Coordinate, usize)> + '_ {
        Coordinate::ALL
            .into_iter()
            .filter_map(|c| self.get(c).map(|v| (c, v)))
    }

    /// Constraints pinning each of `coordinates` to its value in `addr`.
    pub fn of(maps: &CoordinateMaps, addr: Address, coordinates: &[Coordinate]) -> Self {
        coordinates
            .iter()
            .fold(Constraints::default(), |acc, &c| {
                acc.with(c, maps.get_coordinate(addr, c))
            })
    }
}

/// A linear function from address bits to one coordinate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CoordinateMap {
    coordinate: Coordinate,
    masks: Vec<usize>,
    permutation: usize,
}

impl CoordinateMap {
    /// Creates a map for `coordinate` from its masks.
    ///
    /// `permutation` is XORed into the value of a single-mask row map and
    /// ignored otherwise.
    ///
    /// # Errors
    ///
    /// Fails if there are no masks, more than [`MAX_NUM_MASKS`] masks, or an empty mask.
    pub fn new(
        coordinate: Coordinate,
        masks: Vec<usize>,
        permutation: usize,
    ) -> Result<Self, ConfigError> {
        if masks.is_empty() || masks.len() > MAX_NUM_MASKS {
            return Err(ConfigError::MaskCount {
                coordinate,
                count: masks.len(),
            });
        }
        if let Some(index) = masks.iter().position(|&m| m == 0) {
            return Err(ConfigError::EmptyMask { coordinate, index });
        }
        let permutation = if coordinate == Coordinate::Row && masks.len() == 1 {
            permutation
        } else {
            0
        };
        Ok(CoordinateMap {
            coordinate,
            masks,
            permutation,
        })
    }

    /// The coordinate this map computes.
    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    /// The masks of this map, in bit order of the coordinate value.
    pub fn masks(&self) -> &[usize] {
        &self.masks
    }

    /// Constant XORed into the value of a single-mask row map, 0 otherwise.
    pub fn permutation(&self) -> usize {
        self.permutation
    }

    /// Union of all masks.
    pub fn joint_mask(&self) -> usize {
        self.masks.iter().fold(0, |acc, m| acc | m)
    }

    /// Whether the map is a single compacted bit field.
    pub fn is_single(&self) -> bool {
        self.masks.len() == 1
    }

    /// Number of distinct coordinate values this map can produce.
    pub fn num_values(&self) -> usize {
        if self.is_single() {
            1 << self.masks[0].count_ones()
        } else {
            1 << self.masks.len()
        }
    }

    /// Computes the coordinate value of `addr`.
    pub fn get(&self, addr: Address) -> usize {
        if self.is_single() {
            compact(addr, self.masks[0]) ^ self.permutation
        } else {
            self.masks
                .iter()
                .enumerate()
                .fold(0, |acc, (i, &mask)| {
                    acc | ((((addr & mask).count_ones() & 1) as usize) << i)
                })
        }
    }

    /// All addresses derived from `addr` whose coordinate equals `value`.
    ///
    /// A single-mask map rewrites exactly the selected bits and yields one
    /// address. A multi-mask map enumerates every assignment of the joint mask
    /// in ascending order and keeps the matching candidates, so the result may
    /// be empty if `value` is out of range.
    pub fn set(&self, addr: Address, value: usize) -> Vec<Address> {
        if self.is_single() {
            let mask = self.masks[0];
            return vec![deposit(addr, mask, value ^ self.permutation)];
        }
        let joint = self.joint_mask();
        (0..1usize << joint.count_ones())
            .map(|assignment| deposit(addr, joint, assignment))
            .filter(|&candidate| self.get(candidate) == value)
            .collect()
    }
}

/// Gathers the bits of `addr` selected by `mask` into the low bits.
fn compact(addr: Address, mask: usize) -> usize {
    let mut value = 0;
    let mut mask = mask;
    let mut i = 0;
    while mask != 0 {
        let bit = mask.trailing_zeros();
        value |= ((addr >> bit) & 1) << i;
        mask &= mask - 1;
        i += 1;
    }
    value
}

/// Scatters the low bits of `value` into the positions of `mask` in `addr`.
///
/// Bits of `value` beyond the population count of `mask` are dropped.
fn deposit(addr: Address, mask: usize, value: usize) -> Address {
    let mut addr = addr & !mask;
    let mut mask = mask;
    let mut value = value;
    while mask != 0 {
        let bit = mask.trailing_zeros();
        addr |= (value & 1) << bit;
        value >>= 1;
        mask &= mask - 1;
    }
    addr
}

/// The set of configured coordinate maps.
///
/// Built once at startup and shared by reference afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CoordinateMaps {
    maps: [Option<CoordinateMap>; NUM_COORDINATES],
}

impl CoordinateMaps {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder variant of [`CoordinateMaps::insert`].
    pub fn with_map(mut self, map: CoordinateMap) -> Self {
        self.insert(map);
        self
    }

    /// Installs `map`, replacing an earlier map for the same coordinate.
    pub fn insert(&mut self, map: CoordinateMap) {
        let index = map.coordinate().index();
        self.maps[index] = Some(map);
    }

    /// The map for `coordinate`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingMap`] if no map was configured.
    pub fn try_map(&self, coordinate: Coordinate) -> Result<&CoordinateMap, ConfigError> {
        self.maps[coordinate.index()]
            .as_ref()
            .ok_or(ConfigError::MissingMap(coordinate))
    }

    /// The map for `coordinate`.
    ///
    /// # Panics
    ///
    /// Panics if no map was configured for `coordinate`. Using an unconfigured
    /// coordinate is a configuration error that cannot be recovered from.
    pub fn map(&self, coordinate: Coordinate) -> &CoordinateMap {
        match &self.maps[coordinate.index()] {
            Some(map) => map,
            None => panic!("no coordinate map configured for {}", coordinate),
        }
    }

    /// Whether a map for `coordinate` exists.
    pub fn is_configured(&self, coordinate: Coordinate) -> bool {
        self.maps[coordinate.index()].is_some()
    }

    /// Coordinate `coordinate` of `addr`.
    pub fn get_coordinate(&self, addr: Address, coordinate: Coordinate) -> usize {
        self.map(coordinate).get(addr)
    }

    /// All re-encodings of `addr` with `coordinate` set to `value`.
    pub fn set_coordinate(&self, addr: Address, coordinate: Coordinate, value: usize) -> Vec<Address> {
        self.map(coordinate).set(addr, value)
    }

    /// First re-encoding of `addr` with `coordinate` set to `value` that keeps
    /// every coordinate in `preserve` unchanged.
    ///
    /// Returns `None` if no such address exists.
    pub fn set_coordinate_preserving(
        &self,
        addr: Address,
        coordinate: Coordinate,
        value: usize,
        preserve: &[Coordinate],
    ) -> Option<Address> {
        let kept = Constraints::of(self, addr, preserve);
        self.set_coordinate(addr, coordinate, value)
            .into_iter()
            .find(|&candidate| self.matches(candidate, &kept))
    }

    /// Whether `addr` satisfies every pinned coordinate of `constraints`.
    pub fn matches(&self, addr: Address, constraints: &Constraints) -> bool {
        constraints
            .iter()
            .all(|(c, value)| self.get_coordinate(addr, c) == value)
    }

    /// Number of columns per row.
    ///
    /// # Panics
    ///
    /// Panics if the column map is missing or consists of more than one mask.
    pub fn num_columns(&self) -> usize {
        let map = self.map(Coordinate::Column);
        assert!(
            map.is_single(),
            "column map must be a single bit field, got {} masks",
            map.masks().len()
        );
        map.num_values()
    }

    /// Number of distinct values of `coordinate`.
    pub fn num_values(&self, coordinate: Coordinate) -> usize {
        self.map(coordinate).num_values()
    }

    /// Renders the coordinates of `addr` as `r,c,b s,l`, `-` marking unconfigured maps.
    pub fn describe(&self, addr: Address) -> String {
        let value = |c: Coordinate| match &self.maps[c.index()] {
            Some(map) => map.get(addr).to_string(),
            None => "-".to_string(),
        };
        format!(
            "{},{},{} {},{}",
            value(Coordinate::Row),
            value(Coordinate::Column),
            value(Coordinate::Bank),
            value(Coordinate::Set),
            value(Coordinate::Slice)
        )
    }

    /// Iterates over the configured maps.
    pub fn iter(&self) -> impl Iterator<Item = &CoordinateMap> {
        self.maps.iter().flatten()
    }
}
