//! 계층형 설정 로딩 통합 테스트.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::PathBuf;
use trader_core::{load_layered, InstrumentMeta, LogConfig, LogFormat, TraderError};

#[derive(Debug, Deserialize)]
struct Settings {
    initial_equity: Decimal,
    instruments: Vec<InstrumentMeta>,
    #[serde(default)]
    grid: GridSection,
    #[serde(default)]
    logging: LogConfig,
}

#[derive(Debug, Default, Deserialize)]
struct GridSection {
    #[serde(default)]
    max_depth: u32,
}

const SETTINGS: &str = r#"
initial_equity = "2500"

[[instruments]]
symbol = "USDJPY"
price_step = "0.001"
volume_step = "0.01"
min_volume = "0.01"
max_volume = "20"
decimals = 3

[grid]
max_depth = 4

[logging]
level = "debug"
format = "json"
"#;

fn write_settings(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{}-{}.toml", name, std::process::id()));
    std::fs::write(&path, SETTINGS).unwrap();
    path
}

#[test]
fn test_load_layered_reads_file() {
    let path = write_settings("grid-settings-file");
    let settings: Settings = load_layered(&path, "GRIDTEST_FILE").unwrap();

    assert_eq!(settings.initial_equity, dec!(2500));
    assert_eq!(settings.grid.max_depth, 4);
    assert_eq!(settings.logging.format, LogFormat::Json);

    let meta = &settings.instruments[0];
    assert_eq!(meta.symbol, "USDJPY");
    assert_eq!(meta.tick_value, Decimal::ONE);
    // 3자리 종목: pip = point × 10
    assert_eq!(meta.converter().pip_size(), dec!(0.01));

    std::fs::remove_file(path).ok();
}

#[test]
fn test_env_overrides_file() {
    let path = write_settings("grid-settings-env");
    std::env::set_var("GRIDTEST_ENV__GRID__MAX_DEPTH", "7");

    let settings: Settings = load_layered(&path, "GRIDTEST_ENV").unwrap();
    assert_eq!(settings.grid.max_depth, 7);

    std::env::remove_var("GRIDTEST_ENV__GRID__MAX_DEPTH");
    std::fs::remove_file(path).ok();
}

#[test]
fn test_missing_file_is_config_error() {
    let path = std::env::temp_dir().join("grid-settings-does-not-exist.toml");
    let result: Result<Settings, TraderError> = load_layered(&path, "GRIDTEST_MISSING");

    let err = result.unwrap_err();
    assert!(matches!(err, TraderError::Config(_)));
    assert!(err.is_fatal());
}
