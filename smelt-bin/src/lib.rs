//! # Smelt
//!
//! Smelt reverse engineers the DRAM geometry of a machine from access
//! latencies and hammers targeted rows with pointer-chase access patterns.
//!
//! ## Quickstart guide
//!
//! Reserve one 1 GiB huge page, mount hugetlbfs at `/mnt/huge` and load the
//! `msr` kernel module, then run:
//!
//! ```sh
//! cargo build --release
//! # hit/miss threshold of the cache
//! sudo target/release/smelt cache-threshold
//! # bank conflict threshold and bank functions, then row bits
//! sudo target/release/smelt bank-functions --row-column --maps config/maps.json
//! # hammer rows 0..16 of bank 0
//! sudo target/release/smelt scan --maps config/maps.json --pattern config/pattern.json --rows 16
//! ```
//!
//! `smelt --help` lists every option.
//!
//! This crate holds the plumbing shared by the subcommands: logging setup,
//! map loading and result output.

#[macro_use]
extern crate log;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use serde::Serialize;
use smelt_core::memory::{Constraints, Coordinate, CoordinateMaps, MapConfig};

/// Initializes `env_logger` behind a progress-aware log bridge.
///
/// Log lines are printed above the bars of the returned [`MultiProgress`].
/// The level defaults to `info` and is overridden by `RUST_LOG`.
///
/// # Errors
///
/// Fails if a logger is already installed.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

/// Loads coordinate maps from a JSON file or from a directory of `.conf` files.
///
/// A directory must hold a `<name>.conf` file for each of `coordinates`; a
/// JSON file configures whatever it lists.
///
/// # Errors
///
/// Fails if the files cannot be read or describe invalid maps.
pub fn load_maps(path: &Path, coordinates: &[Coordinate]) -> anyhow::Result<CoordinateMaps> {
    let config = if path.is_dir() {
        MapConfig::from_conf_dir(path, coordinates)?
    } else {
        MapConfig::from_jsonfile(&path.to_string_lossy())?
    };
    let maps = config.to_maps()?;
    for &coordinate in coordinates {
        if !maps.is_configured(coordinate) {
            anyhow::bail!("{} has no {} map", path.display(), coordinate);
        }
    }
    Ok(maps)
}

/// Target constraints of a scan: bank 0 and, if the maps know slices, slice 0.
pub fn scan_target(maps: &CoordinateMaps) -> Constraints {
    let target = Constraints::default().with(Coordinate::Bank, 0);
    if maps.is_configured(Coordinate::Slice) {
        target.with(Coordinate::Slice, 0)
    } else {
        target
    }
}

/// Writes `value` as pretty-printed JSON to `filename`.
///
/// # Errors
///
/// Fails if the file cannot be created or written.
pub fn save_json<T: Serialize + ?Sized>(value: &T, filename: &str) -> anyhow::Result<()> {
    let file = File::create(filename)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    info!("Results saved to {}", filename);
    Ok(())
}
