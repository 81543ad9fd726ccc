use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use log::{info, warn};
use serde::Serialize;
use smelt_bin::{init_logging_with_progress, load_maps, save_json, scan_target};
use smelt_core::allocator::alloc_memory;
use smelt_core::counter::{ArchPerfInfo, CounterControl, MsrCounterControl, NoCounter};
use smelt_core::memory::{AddressPool, Coordinate, Memory, Region};
use smelt_core::timing::X86Timing;
use smelt_core::util::{Rng, Size, format_row, pin_to_core};
use smelt_hugepage::HugepageAllocator;
use smelt_pattern::{PatternConfig, RoundReport, Scanner, Strategy};
use smelt_reverse::{
    CalibrationConfig, ChasePairTimer, ConflictSurvey, FixedThreshold, StdinPrompt,
    ThresholdPrompt, find_bank_functions, find_cache_threshold, find_row_and_column_bits,
    significant_bits,
};

/// CLI arguments for the `smelt` binary.
#[derive(Debug, Parser, Serialize, Clone)]
#[command(version, about)]
struct CliArgs {
    /// Seed of every random decision
    #[clap(long = "seed", default_value = "1602509940", global = true)]
    seed: u64,
    /// Logical core to pin the process to
    #[clap(long = "cpu", default_value = "2", global = true)]
    cpu: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand, Serialize, Clone)]
enum Command {
    /// Find the latency threshold between cache hits and misses.
    CacheThreshold {
        /// Calibration config file
        #[clap(long = "calibration")]
        calibration: Option<String>,
    },
    /// Find the bank conflict threshold and the bank functions.
    BankFunctions {
        /// Calibration config file
        #[clap(long = "calibration")]
        calibration: Option<String>,
        /// Bank conflict threshold in cycles; asked for interactively if absent
        #[clap(long = "threshold")]
        threshold: Option<i64>,
        /// Also tell row bits from column bits; requires --maps
        #[clap(long = "row-column", requires = "maps")]
        row_column: bool,
        /// Bank map (JSON file or directory with bank.conf)
        #[clap(long = "maps")]
        maps: Option<PathBuf>,
    },
    /// Hammer target rows and report bit flips.
    Scan {
        /// Coordinate maps (JSON file or directory of .conf files)
        #[clap(long = "maps")]
        maps: PathBuf,
        /// Pattern config file
        #[clap(long = "pattern")]
        pattern: Option<String>,
        /// First target row
        #[clap(long = "target-row", default_value = "0")]
        target_row: usize,
        /// Number of consecutive target rows
        #[clap(long = "rows", default_value = "1")]
        rows: usize,
        /// Override the strategy of the pattern config
        #[clap(long = "strategy", value_parser = parse_strategy)]
        strategy: Option<Strategy>,
        /// Do not program the cache miss counter
        #[clap(long = "no-counter")]
        no_counter: bool,
        /// Output file for round reports (JSON format)
        #[clap(long = "output")]
        output: Option<String>,
    },
    /// Print the effective pattern configuration.
    Config {
        /// Pattern config file
        #[clap(long = "pattern")]
        pattern: Option<String>,
    },
    /// Print architectural performance monitoring capabilities.
    PerfInfo,
}

fn parse_strategy(s: &str) -> std::result::Result<Strategy, String> {
    match s {
        "classic" => Ok(Strategy::Classic),
        "n-sided" => Ok(Strategy::NSided),
        "anvil" => Ok(Strategy::Anvil),
        _ => Err(format!("unknown strategy '{}'", s)),
    }
}

fn calibration_config(path: &Option<String>) -> Result<CalibrationConfig> {
    Ok(match path {
        Some(path) => CalibrationConfig::from_jsonfile(path)?,
        None => CalibrationConfig::default(),
    })
}

fn pattern_config(path: &Option<String>) -> Result<PatternConfig> {
    Ok(match path {
        Some(path) => PatternConfig::from_jsonfile(path)?,
        None => PatternConfig::default(),
    })
}

fn alloc_hugepage() -> Result<(HugepageAllocator, Memory)> {
    let mut allocator = HugepageAllocator::default();
    let memory = alloc_memory(&mut allocator, Size::GB(1))
        .with_context(|| format!("mapping {}", allocator.path().display()))?;
    Ok((allocator, memory))
}

fn cache_threshold(calibration: &Option<String>) -> Result<()> {
    let config = calibration_config(calibration)?;
    let timing = X86Timing::default();
    let line = 0u8;
    let result = find_cache_threshold(&timing, &line, &config)?;
    println!("{}", format_row("cache threshold (in cycles)", result.threshold));
    Ok(())
}

fn bank_functions(
    calibration: &Option<String>,
    threshold: Option<i64>,
    maps: Option<PathBuf>,
    rng: &mut Rng,
    progress: &MultiProgress,
) -> Result<()> {
    let config = calibration_config(calibration)?;
    let maps = maps
        .map(|path| load_maps(&path, &[Coordinate::Bank]))
        .transpose()?;
    let timing = X86Timing::default();
    let (allocator, memory) = alloc_hugepage()?;
    let region = Region::new(memory.ptr as usize, memory.len);

    let outcome = (|| -> Result<()> {
        let mut timer = ChasePairTimer::new(&timing, &memory, config.pair_repetitions);
        let survey = ConflictSurvey::measure(&mut timer, region, &config, rng, Some(progress))?;
        info!("stats for BANK CONFLICTS");
        info!("\n{}", survey.histogram(config.granularity)?);
        info!("{}", survey.distribution(config.quantiles)?);

        let mut prompt: Box<dyn ThresholdPrompt> = match threshold {
            Some(threshold) => Box::new(FixedThreshold(threshold)),
            None => Box::new(StdinPrompt::stdin()),
        };
        let threshold = prompt.ask("threshold?")?;
        println!("{}", format_row("bank conflict threshold (in cycles)", threshold));

        let bits = significant_bits(&mut timer, &survey, threshold, &config)?;
        println!("{}", format_row("significant bits", format!("{:?}", bits)));
        for function in find_bank_functions(&survey, &bits, threshold) {
            println!("{}", format_row("bank function", format!("{:?}", function)));
        }

        if let Some(maps) = &maps {
            let result =
                find_row_and_column_bits(&mut timer, maps, region, threshold, &config, rng)?;
            println!("{}", format_row("row bits", format!("{:?}", result.row_bits)));
            println!("{}", format_row("row misses", result.row_misses));
        }
        Ok(())
    })();

    allocator.release(memory)?;
    outcome
}

#[derive(Serialize)]
struct ScanResults<'a> {
    date: String,
    args: &'a CliArgs,
    config: &'a PatternConfig,
    reports: Vec<RoundReport>,
}

#[allow(clippy::too_many_arguments)]
fn scan(
    args: &CliArgs,
    maps_path: &std::path::Path,
    pattern: &Option<String>,
    target_row: usize,
    rows: usize,
    strategy: Option<Strategy>,
    no_counter: bool,
    output: &Option<String>,
    rng: &mut Rng,
    progress: &MultiProgress,
) -> Result<()> {
    let maps = load_maps(
        maps_path,
        &[Coordinate::Row, Coordinate::Column, Coordinate::Bank, Coordinate::Set, Coordinate::Slice],
    )?;
    let mut config = pattern_config(pattern)?;
    if let Some(strategy) = strategy {
        config.strategy = strategy;
        config.validate()?;
    }
    info!("pattern config:\n{}", config);

    let timing = X86Timing::default();
    let msr = MsrCounterControl::llc_misses();
    let counter: &dyn CounterControl = if no_counter { &NoCounter } else { &msr };
    let (allocator, memory) = alloc_hugepage()?;
    let region = Region::new(memory.ptr as usize, memory.len);

    let outcome = (|| -> Result<Vec<RoundReport>> {
        let target = scan_target(&maps);
        let mut pool = AddressPool::with_constraints(region, &maps, &target);
        if config.strategy != Strategy::Classic {
            pool.extend_with_derived_addresses(&maps)?;
        }
        info!("pool of {} addresses", pool.len());
        if pool.is_empty() {
            bail!("no address of the region matches {:?}", target);
        }

        let scanner = Scanner::new(&maps, &config, &timing, counter, target)
            .with_progress(progress.clone());
        let mut reports = vec![];
        for row in target_row..target_row + rows {
            match scanner.scan_row(&pool, row, rng) {
                Ok(report) => {
                    println!("{}", report);
                    reports.push(report);
                }
                Err(e) if e.is_recoverable() => warn!("skipping row {}: {}", row, e),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(reports)
    })();

    allocator.release(memory)?;
    let reports = outcome?;
    if let Some(output) = output {
        save_json(
            &ScanResults {
                date: chrono::Local::now().to_rfc3339(),
                args,
                config: &config,
                reports,
            },
            output,
        )?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;
    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);

    match &args.command {
        Command::PerfInfo => {
            print!("{}", ArchPerfInfo::query());
            return Ok(());
        }
        Command::Config { pattern } => {
            print!("{}", pattern_config(pattern)?);
            return Ok(());
        }
        _ => {}
    }

    pin_to_core(args.cpu).with_context(|| format!("pinning to CPU {}", args.cpu))?;
    info!("running on CPU {}", args.cpu);
    let mut rng = Rng::from_seed(args.seed);
    info!("seed {}", rng.seed());

    match args.command.clone() {
        Command::CacheThreshold { calibration } => cache_threshold(&calibration),
        Command::BankFunctions {
            calibration,
            threshold,
            row_column,
            maps,
        } => {
            let maps = if row_column { maps } else { None };
            bank_functions(&calibration, threshold, maps, &mut rng, &progress)
        }
        Command::Scan {
            maps,
            pattern,
            target_row,
            rows,
            strategy,
            no_counter,
            output,
        } => scan(
            &args,
            &maps,
            &pattern,
            target_row,
            rows,
            strategy,
            no_counter,
            &output,
            &mut rng,
            &progress,
        ),
        Command::PerfInfo | Command::Config { .. } => Ok(()),
    }
}
