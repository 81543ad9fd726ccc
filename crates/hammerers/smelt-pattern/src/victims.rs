//! Victim data patterns and bit flip detection.

use std::fmt;

use serde::Serialize;
use smelt_core::memory::{Address, Coordinate, CoordinateMaps};

/// Byte value written into victim rows before hammering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DataPattern {
    /// `0xff`
    Ones,
    /// `0x55`
    Stripes55,
    /// `0xaa`
    StripesAa,
    /// `0x00`
    Zeros,
    /// A random byte per round
    Random,
}

impl DataPattern {
    /// Every pattern, in the order rounds cycle through them.
    pub const ALL: [DataPattern; 5] = [
        DataPattern::Ones,
        DataPattern::Stripes55,
        DataPattern::StripesAa,
        DataPattern::Zeros,
        DataPattern::Random,
    ];

    /// The byte to write.
    pub fn byte(self, rng: &mut impl rand::Rng) -> u8 {
        match self {
            DataPattern::Ones => 0xff,
            DataPattern::Stripes55 => 0x55,
            DataPattern::StripesAa => 0xaa,
            DataPattern::Zeros => 0x00,
            DataPattern::Random => rng.random(),
        }
    }
}

/// Whether victim row `index / num_columns` is checked for flips.
///
/// Odd rows of a victim list hold aggressor or filler rows; they get the
/// complement of the data pattern and are not checked.
fn is_checked(index: usize, num_columns: usize) -> bool {
    (index / num_columns) % 2 == 0
}

/// Baseline data for `len` victims: `byte` in checked rows, its complement
/// in the others.
pub fn baseline(len: usize, num_columns: usize, byte: u8) -> Vec<u8> {
    (0..len)
        .map(|i| if is_checked(i, num_columns) { byte } else { byte ^ 0xff })
        .collect()
}

/// Writes the baseline for `byte` into the first byte of every victim and
/// returns it.
///
/// # Safety
///
/// Every victim address must point into mapped writable memory.
pub unsafe fn init_victims(victims: &[Address], num_columns: usize, byte: u8) -> Vec<u8> {
    let data = baseline(victims.len(), num_columns, byte);
    for (&addr, &value) in victims.iter().zip(&data) {
        unsafe { std::ptr::write_volatile(addr as *mut u8, value) };
    }
    data
}

/// Direction of a bit flip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FlipDirection {
    /// The byte value grew
    ZeroToOne,
    /// The byte value shrank
    OneToZero,
}

impl FlipDirection {
    /// Compact code used in flip reports.
    pub fn code(self) -> u8 {
        match self {
            FlipDirection::ZeroToOne => 0x01,
            FlipDirection::OneToZero => 0x10,
        }
    }
}

/// A victim byte that changed while hammering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Flip {
    /// Victim address
    pub addr: Address,
    /// Row of the victim
    pub row: usize,
    /// Column of the victim
    pub column: usize,
    /// Bank of the victim
    pub bank: usize,
    /// Value written
    pub before: u8,
    /// Value read back
    pub after: u8,
    /// Direction of the change
    pub direction: FlipDirection,
}

impl fmt::Display for Flip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{} {:02x} -> {:02x} {:02x}",
            self.row,
            self.column,
            self.bank,
            self.before,
            self.after,
            self.direction.code()
        )
    }
}

/// Compares `observed` victim bytes against `baseline` in checked rows.
pub fn diff(
    maps: &CoordinateMaps,
    victims: &[Address],
    num_columns: usize,
    baseline: &[u8],
    observed: &[u8],
) -> Vec<Flip> {
    victims
        .iter()
        .zip(baseline.iter().zip(observed))
        .enumerate()
        .filter(|&(i, (_, (before, after)))| is_checked(i, num_columns) && before != after)
        .map(|(_, (&addr, (&before, &after)))| Flip {
            addr,
            row: maps.get_coordinate(addr, Coordinate::Row),
            column: maps.get_coordinate(addr, Coordinate::Column),
            bank: maps.get_coordinate(addr, Coordinate::Bank),
            before,
            after,
            direction: if after > before {
                FlipDirection::ZeroToOne
            } else {
                FlipDirection::OneToZero
            },
        })
        .collect()
}

/// Reads every victim back and reports the bytes that differ from `baseline`.
///
/// # Safety
///
/// Every victim address must point into mapped memory.
pub unsafe fn caused_flips(
    maps: &CoordinateMaps,
    victims: &[Address],
    num_columns: usize,
    baseline: &[u8],
) -> Vec<Flip> {
    let observed: Vec<u8> = victims
        .iter()
        .map(|&addr| unsafe { std::ptr::read_volatile(addr as *const u8) })
        .collect();
    diff(maps, victims, num_columns, baseline, &observed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smelt_core::memory::CoordinateMap;
    use smelt_core::util::Rng;

    fn maps() -> CoordinateMaps {
        CoordinateMaps::new()
            .with_map(CoordinateMap::new(Coordinate::Row, vec![0xF0], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Column, vec![0x3], 0).unwrap())
            .with_map(CoordinateMap::new(Coordinate::Bank, vec![0xC], 0).unwrap())
    }

    #[test]
    fn test_baseline_complements_odd_rows() {
        assert_eq!(
            baseline(8, 2, 0x55),
            vec![0x55, 0x55, 0xaa, 0xaa, 0x55, 0x55, 0xaa, 0xaa]
        );
    }

    #[test]
    fn test_data_patterns() {
        let mut rng = Rng::from_seed(1);
        let fixed: Vec<u8> = DataPattern::ALL[..4].iter().map(|p| p.byte(&mut rng)).collect();
        assert_eq!(fixed, vec![0xff, 0x55, 0xaa, 0x00]);
    }

    #[test]
    fn test_caused_flips() {
        let mut buf = vec![0u8; 16];
        let base = buf.as_mut_ptr() as Address;
        let victims: Vec<Address> = (0..16).map(|i| base + i).collect();
        let data = unsafe { init_victims(&victims, 4, 0xff) };
        assert_eq!(buf[0], 0xff);
        assert_eq!(buf[4], 0x00);

        buf[1] = 0xfe;
        buf[5] = 0x01; // odd row, ignored
        buf[9] = 0xf7;
        let flips = unsafe { caused_flips(&maps(), &victims, 4, &data) };
        assert_eq!(flips.len(), 2);
        assert_eq!(flips[0].addr, base + 1);
        assert_eq!(flips[0].direction, FlipDirection::OneToZero);
        assert_eq!(flips[1].after, 0xf7);

        let mut observed = baseline(16, 4, 0x00);
        observed[2] = 0x04;
        let flips = diff(&maps(), &victims, 4, &baseline(16, 4, 0x00), &observed);
        assert_eq!(flips.len(), 1);
        assert_eq!(flips[0].direction, FlipDirection::ZeroToOne);
        let addr = victims[2];
        let expected = format!(
            "{},{},{} 00 -> 04 01",
            addr >> 4 & 0xF,
            addr & 0x3,
            addr >> 2 & 0x3
        );
        assert_eq!(flips[0].to_string(), expected);
    }
}
