//! 설정 로딩.
//!
//! 파일(TOML/JSON)을 기본으로 하고 환경 변수로 덮어쓰는 계층형 설정을
//! 임의의 역직렬화 가능한 타입으로 로드합니다.

use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::TraderResult;

/// 기본 환경 변수 접두사.
pub const DEFAULT_ENV_PREFIX: &str = "GRID";

/// 파일과 환경 변수에서 설정을 로드합니다.
///
/// 환경 변수는 `{prefix}__SECTION__KEY` 형식이며 파일 값을 덮어씁니다.
/// 예: `GRID__GRID__MAX_DEPTH=5`.
pub fn load_layered<T, P>(path: P, env_prefix: &str) -> TraderResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let settings = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// TOML 문자열에서 설정을 로드합니다 (테스트 및 내장 기본값용).
pub fn load_from_toml_str<T: DeserializeOwned>(source: &str) -> TraderResult<T> {
    let settings = config::Config::builder()
        .add_source(config::File::from_str(source, config::FileFormat::Toml))
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        depth: u32,
    }

    #[test]
    fn test_load_from_toml_str() {
        let sample: Sample = load_from_toml_str("name = \"grid\"\ndepth = 4\n").unwrap();
        assert_eq!(sample.name, "grid");
        assert_eq!(sample.depth, 4);
    }

    #[test]
    fn test_load_missing_field_is_config_error() {
        let result: TraderResult<Sample> = load_from_toml_str("depth = 4\n");
        assert!(matches!(result, Err(crate::TraderError::Config(_))));
    }
}
