use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use itertools::Itertools;
use log::{debug, info};

use super::coord::{Coordinate, CoordinateMap, CoordinateMaps, MAX_NUM_MASKS};

/// Defines which address bits make up one mask of a coordinate map.
///
/// Can specify a single bit or the XOR of multiple bits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum BitDef {
    /// Single bit function
    Single(u64),
    // XOR of multiple bits
    Multi(Vec<u64>),
}

impl BitDef {
    /// Converts bit definition to a bitmask.
    ///
    /// # Errors
    ///
    /// [`ConfigError::BitOutOfRange`] if a bit does not fit into an address.
    pub fn to_mask(&self) -> Result<usize> {
        let bits: &[u64] = match self {
            BitDef::Single(bit) => std::slice::from_ref(bit),
            BitDef::Multi(bits) => bits,
        };
        bits.iter().try_fold(0usize, |mask, &bit| {
            if bit >= usize::BITS as u64 {
                Err(ConfigError::BitOutOfRange(bit))
            } else {
                Ok(mask | 1 << bit)
            }
        })
    }

    /// Bit positions of this definition, in the order given.
    pub fn bits(&self) -> Vec<u64> {
        match self {
            BitDef::Single(bit) => vec![*bit],
            BitDef::Multi(bits) => bits.clone(),
        }
    }
}

/// Errors that can occur when loading coordinate map configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a configuration file failed
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// Parsing a JSON configuration failed
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    /// A coordinate was used without a configured map
    #[error("no coordinate map configured for {0}")]
    MissingMap(Coordinate),
    /// A map has zero or too many masks
    #[error("{coordinate} map has {count} masks, expected 1..={max}", max = MAX_NUM_MASKS)]
    MaskCount {
        /// Affected coordinate
        coordinate: Coordinate,
        /// Number of masks found
        count: usize,
    },
    /// A map contains a mask without bits
    #[error("mask {index} of the {coordinate} map is empty")]
    EmptyMask {
        /// Affected coordinate
        coordinate: Coordinate,
        /// Index of the empty mask
        index: usize,
    },
    /// A bit list in a `.conf` file could not be parsed
    #[error("invalid bit '{token}' in line {line} of {file}")]
    BadBit {
        /// Offending file
        file: String,
        /// One-based line number
        line: usize,
        /// Offending token
        token: String,
    },
    /// A bit position exceeds the address width
    #[error("bit {0} is out of range")]
    BitOutOfRange(u64),
}

/// Result type for map configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Bit mask configuration of all coordinate maps.
///
/// Each coordinate holds a list of masks. A single entry describes a bit field,
/// several entries describe XOR functions, one per coordinate bit.
///
/// ```json
/// {
///   "row": [[17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29]],
///   "column": [[6, 7, 8, 9, 10, 11, 12]],
///   "bank": [[13, 17], [14, 18], [15, 19], [16, 20]],
///   "row_permutation": 0
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Row masks
    pub row: Vec<BitDef>,
    /// Column masks
    pub column: Vec<BitDef>,
    /// Bank masks
    pub bank: Vec<BitDef>,
    /// Cache set masks
    pub set: Vec<BitDef>,
    /// Cache slice masks
    pub slice: Vec<BitDef>,
    /// Constant XORed into single-mask row values
    pub row_permutation: usize,
}

impl MapConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `filepath` - Path to the JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_jsonfile(filepath: &str) -> Result<MapConfig> {
        let mut file = File::open(Path::new(filepath))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: MapConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Loads `<name>.conf` files for `coordinates` from `dir`.
    ///
    /// Every line of a file holds one whitespace-separated bit list. Lines
    /// beyond [`MAX_NUM_MASKS`] are ignored.
    ///
    /// # Errors
    ///
    /// Returns error if a file cannot be read or contains a non-numeric bit.
    pub fn from_conf_dir(dir: &Path, coordinates: &[Coordinate]) -> Result<MapConfig> {
        let mut config = MapConfig::default();
        for &coordinate in coordinates {
            let path = dir.join(format!("{}.conf", coordinate.conf_name()));
            let mut contents = String::new();
            File::open(&path)?.read_to_string(&mut contents)?;
            let defs = Self::parse_conf(&path.display().to_string(), &contents)?;
            debug!("{} map from {}: {:?}", coordinate, path.display(), defs);
            *config.bits_mut(coordinate) = defs;
        }
        Ok(config)
    }

    /// Parses the contents of a `.conf` file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::BadBit`] if a token is not a bit position.
    pub fn parse_conf(file: &str, contents: &str) -> Result<Vec<BitDef>> {
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .take(MAX_NUM_MASKS)
            .map(|(i, line)| {
                let bits = line
                    .split_whitespace()
                    .map(|token| {
                        token.parse::<u64>().map_err(|_| ConfigError::BadBit {
                            file: file.to_string(),
                            line: i + 1,
                            token: token.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(match bits.as_slice() {
                    [bit] => BitDef::Single(*bit),
                    _ => BitDef::Multi(bits),
                })
            })
            .collect()
    }

    /// Masks configured for `coordinate`.
    pub fn bits(&self, coordinate: Coordinate) -> &[BitDef] {
        match coordinate {
            Coordinate::Row => &self.row,
            Coordinate::Column => &self.column,
            Coordinate::Bank => &self.bank,
            Coordinate::Set => &self.set,
            Coordinate::Slice => &self.slice,
        }
    }

    fn bits_mut(&mut self, coordinate: Coordinate) -> &mut Vec<BitDef> {
        match coordinate {
            Coordinate::Row => &mut self.row,
            Coordinate::Column => &mut self.column,
            Coordinate::Bank => &mut self.bank,
            Coordinate::Set => &mut self.set,
            Coordinate::Slice => &mut self.slice,
        }
    }

    /// Builds the coordinate map registry.
    ///
    /// Coordinates without masks stay unconfigured.
    ///
    /// # Errors
    ///
    /// Returns error if a configured map is invalid.
    pub fn to_maps(&self) -> Result<CoordinateMaps> {
        let mut maps = CoordinateMaps::new();
        for coordinate in Coordinate::ALL {
            let defs = self.bits(coordinate);
            if defs.is_empty() {
                continue;
            }
            let masks = defs
                .iter()
                .map(BitDef::to_mask)
                .collect::<Result<Vec<_>>>()?;
            let map = CoordinateMap::new(coordinate, masks, self.row_permutation)?;
            info!(
                "{} map: {} mask(s) [{}]",
                coordinate,
                map.masks().len(),
                map.masks().iter().map(|m| format!("{:#x}", m)).join(",")
            );
            maps.insert(map);
        }
        Ok(maps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_config() {
        let json = r#"{
            "row": [[17, 18, 19]],
            "column": [[6, 7, 8, 9, 10, 11, 12]],
            "bank": [[13, 17], [14, 18]],
            "set": [6],
            "row_permutation": 1
        }"#;
        let config: MapConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.set, vec![BitDef::Single(6)]);
        assert!(config.slice.is_empty());
        let maps = config.to_maps().unwrap();
        assert_eq!(maps.map(Coordinate::Row).masks(), &[0b111 << 17]);
        assert_eq!(maps.map(Coordinate::Bank).masks(), &[1 << 13 | 1 << 17, 1 << 14 | 1 << 18]);
        assert_eq!(maps.get_coordinate(0, Coordinate::Row), 1);
        assert!(!maps.is_configured(Coordinate::Slice));
        assert_eq!(maps.num_columns(), 128);
    }

    #[test]
    fn test_parse_conf() {
        let defs = MapConfig::parse_conf("bank.conf", "13 17\n14\t18\n\n15\n").unwrap();
        assert_eq!(
            defs,
            vec![
                BitDef::Multi(vec![13, 17]),
                BitDef::Multi(vec![14, 18]),
                BitDef::Single(15)
            ]
        );
        let many = (0..12).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        assert_eq!(MapConfig::parse_conf("x", &many).unwrap().len(), MAX_NUM_MASKS);
        assert!(matches!(
            MapConfig::parse_conf("row.conf", "17 x"),
            Err(ConfigError::BadBit { line: 1, .. })
        ));
    }

    #[test]
    fn test_bit_out_of_range() {
        assert!(matches!(
            BitDef::Multi(vec![3, 64]).to_mask(),
            Err(ConfigError::BitOutOfRange(64))
        ));
    }
}
