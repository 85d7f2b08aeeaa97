//! 기본 설정 파일 생성 명령어.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use trader_core::InstrumentMeta;
use trader_grid::GridEngineConfig;

/// EURUSD 한 종목과 기본값으로 채운 설정.
pub fn sample_config() -> GridEngineConfig {
    GridEngineConfig {
        instruments: vec![InstrumentMeta {
            symbol: "EURUSD".to_string(),
            price_step: Decimal::new(1, 5),
            volume_step: Decimal::new(1, 2),
            min_volume: Decimal::new(1, 2),
            max_volume: Decimal::from(50),
            decimals: 5,
            tick_value: Decimal::ONE,
        }],
        ..Default::default()
    }
}

/// 기본 설정을 TOML로 렌더링합니다.
pub fn render_sample() -> Result<String> {
    toml::to_string_pretty(&sample_config()).context("failed to render sample config")
}

/// 기본 설정을 파일 또는 표준 출력에 씁니다.
pub fn write_sample(output: Option<&Path>) -> Result<()> {
    let rendered = render_sample()?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("설정 파일 생성: {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_loads_back() {
        let rendered = render_sample().unwrap();
        let config = GridEngineConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(config, sample_config());
    }
}
