use smelt::memory::{Address, Coordinate, CoordinateMaps, MapConfig, Region};
use smelt::timing::X86Timing;
use smelt::util::Rng;
use smelt_pattern::PatternConfig;
use smelt_reverse::{
    CalibrationConfig, ConflictSurvey, PairTimer, find_bank_functions, find_cache_threshold,
    find_row_and_column_bits, significant_bits,
};

const MAPS_FILE: &str = "config/maps.json";
const PATTERN_FILE: &str = "config/pattern.json";
const CALIBRATION_FILE: &str = "config/calibration.json";

const REGION: Region = Region::new(0x4000_0000, 1 << 30);
const THRESHOLD: i64 = 325;

/// Latencies of the DRAM described by the maps: a pair in the same bank and
/// different rows conflicts.
struct MappedDram<'a> {
    maps: &'a CoordinateMaps,
}

impl PairTimer for MappedDram<'_> {
    fn median_latency(&mut self, a: Address, b: Address) -> smelt_reverse::Result<f64> {
        let same_bank = self.maps.get_coordinate(a, Coordinate::Bank)
            == self.maps.get_coordinate(b, Coordinate::Bank);
        let same_row = self.maps.get_coordinate(a, Coordinate::Row)
            == self.maps.get_coordinate(b, Coordinate::Row);
        Ok(if same_bank && !same_row { 420.0 } else { 230.0 })
    }
}

fn maps() -> anyhow::Result<CoordinateMaps> {
    Ok(MapConfig::from_jsonfile(MAPS_FILE)?.to_maps()?)
}

#[test]
fn test_config_files() -> anyhow::Result<()> {
    let maps = maps()?;
    assert_eq!(maps.num_columns(), 128);
    assert_eq!(maps.num_values(Coordinate::Row), 1 << 13);
    assert_eq!(maps.num_values(Coordinate::Bank), 16);
    assert_eq!(maps.num_values(Coordinate::Slice), 4);

    let mut rng = Rng::from_seed(42);
    for _ in 0..64 {
        let addr = REGION.random_line(&mut rng);
        let row = maps.get_coordinate(addr, Coordinate::Row);
        assert_eq!(maps.set_coordinate(addr, Coordinate::Row, row), vec![addr]);
        let bank = maps.get_coordinate(addr, Coordinate::Bank);
        for candidate in maps.set_coordinate(addr, Coordinate::Bank, bank ^ 1) {
            assert_eq!(maps.get_coordinate(candidate, Coordinate::Bank), bank ^ 1);
        }
    }

    let pattern = PatternConfig::from_jsonfile(PATTERN_FILE)?;
    assert_eq!(pattern, PatternConfig::default());
    let calibration = CalibrationConfig::from_jsonfile(CALIBRATION_FILE)?;
    assert_eq!(calibration, CalibrationConfig::default());
    Ok(())
}

#[test]
fn test_bank_functions_from_simulated_timings() -> anyhow::Result<()> {
    let maps = maps()?;
    let mut dram = MappedDram { maps: &maps };
    let config = CalibrationConfig {
        large_pool: 2048,
        small_pool: 64,
        ..Default::default()
    };
    let mut rng = Rng::from_seed(1602509940);

    let survey = ConflictSurvey::measure(&mut dram, REGION, &config, &mut rng, None)?;
    assert!(survey.first_conflict(THRESHOLD).is_some());
    let bits = significant_bits(&mut dram, &survey, THRESHOLD, &config)?;
    assert_eq!(bits, (13..21).collect::<Vec<u32>>());

    let functions = find_bank_functions(&survey, &bits, THRESHOLD);
    assert_eq!(
        functions,
        vec![vec![13, 17], vec![14, 18], vec![15, 19], vec![16, 20]]
    );
    Ok(())
}

#[test]
fn test_row_bits_from_simulated_timings() -> anyhow::Result<()> {
    let maps = maps()?;
    let mut dram = MappedDram { maps: &maps };
    let config = CalibrationConfig {
        row_column_pool: 256,
        ..Default::default()
    };
    let mut rng = Rng::from_seed(1602509940);

    let result = find_row_and_column_bits(&mut dram, &maps, REGION, THRESHOLD, &config, &mut rng)?;
    // flipping a bank bit forces its partner row bit to flip as well
    assert_eq!(result.row_bits, (13..30).collect::<Vec<u32>>());
    assert_eq!(result.row_misses, 10);
    Ok(())
}

#[test]
#[ignore = "needs stable cycle counts on an idle x86_64 core"]
fn test_cache_threshold_hardware() -> anyhow::Result<()> {
    env_logger::init();
    let timing = X86Timing::default();
    let line = 0u8;
    let config = CalibrationConfig {
        cache_repetitions: 1 << 16,
        ..Default::default()
    };
    let result = find_cache_threshold(&timing, &line, &config)?;
    assert!(result.hits.median() < result.threshold as f64);
    assert!(result.misses.median() > result.threshold as f64);
    Ok(())
}
