//! 그리드 엔진 설정.
//!
//! 섹션별 설정을 하나로 묶고, 파일 + 환경 변수(`GRID__` 접두사)에서
//! 로드합니다. 엔진은 검증을 통과한 설정으로만 생성됩니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use trader_core::{
    load_from_toml_str, load_layered, InstrumentMeta, LogConfig, TraderError, TraderResult,
    DEFAULT_ENV_PREFIX,
};
use trader_risk::{
    BasketMode, BasketRiskConfig, ConfigValidationError, EquityConfig, MoneyManagementConfig,
    ProgressionConfig, ProgressionKind, ProtectiveConfig, ProtectiveMode, SessionConfig,
};

/// 새 바스켓의 진입 방향 정책.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPolicy {
    /// 신호 게이트의 방향을 따름
    #[default]
    Bias,
    /// 종목 쌍의 첫 종목은 롱, 둘째 종목은 숏 (헤지)
    Both,
    /// 롱만
    LongOnly,
    /// 숏만
    ShortOnly,
}

/// 그리드 진행 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// 바스켓당 최대 레벨 수
    pub max_depth: u32,
    /// 레벨 간 최소 간격 (초)
    pub cooldown_secs: i64,
    /// 추가 진입 기준 역행 거리 (pip)
    pub trigger_distance_pips: Decimal,
    /// 트리거 거리 증가 배수
    pub trigger_growth: Decimal,
    /// 트리거 거리 진행 방식
    pub trigger_kind: ProgressionKind,
    /// 진입 방향 정책
    pub entry_policy: EntryPolicy,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            cooldown_secs: 0,
            trigger_distance_pips: dec!(20),
            trigger_growth: dec!(1),
            trigger_kind: ProgressionKind::Static,
            entry_policy: EntryPolicy::Bias,
        }
    }
}

impl GridConfig {
    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_depth == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "grid.max_depth must be greater than 0".into(),
            ));
        }
        if self.cooldown_secs < 0 {
            return Err(ConfigValidationError::InvalidValue(
                "grid.cooldown_secs must not be negative".into(),
            ));
        }
        if self.trigger_distance_pips <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "grid.trigger_distance_pips must be greater than 0".into(),
            ));
        }
        if self.trigger_growth <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "grid.trigger_growth must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// 주문 실행 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// 긴급 청산 거부 시 즉시 재시도 횟수
    pub emergency_retry_limit: u32,
    /// 보호 주문 실행 방식
    pub protective_mode: ProtectiveMode,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            emergency_retry_limit: 3,
            protective_mode: ProtectiveMode::Virtual,
        }
    }
}

/// 그리드 엔진 전체 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridEngineConfig {
    /// 시작 자산
    pub initial_equity: Decimal,
    /// 거래 종목
    pub instruments: Vec<InstrumentMeta>,
    /// 그리드 진행
    pub grid: GridConfig,
    /// 물량 진행
    pub progression: ProgressionConfig,
    /// 보호 가격
    pub protective: ProtectiveConfig,
    /// 바스켓 청산
    pub basket: BasketRiskConfig,
    /// 자산 가드
    pub equity: EquityConfig,
    /// 자금 관리
    pub money_management: MoneyManagementConfig,
    /// 거래 세션
    pub session: SessionConfig,
    /// 주문 실행
    pub execution: ExecutionConfig,
    /// 로깅
    pub logging: LogConfig,
}

impl Default for GridEngineConfig {
    fn default() -> Self {
        Self {
            initial_equity: dec!(10000),
            instruments: Vec::new(),
            grid: GridConfig::default(),
            progression: ProgressionConfig::default(),
            protective: ProtectiveConfig::default(),
            basket: BasketRiskConfig::default(),
            equity: EquityConfig::default(),
            money_management: MoneyManagementConfig::default(),
            session: SessionConfig::default(),
            execution: ExecutionConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl GridEngineConfig {
    /// 파일과 `GRID__` 환경 변수에서 설정을 로드하고 검증합니다.
    pub fn load(path: impl AsRef<Path>) -> TraderResult<Self> {
        let config: Self = load_layered(path, DEFAULT_ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 로드하고 검증합니다.
    pub fn from_toml_str(source: &str) -> TraderResult<Self> {
        let config: Self = load_from_toml_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// 종목 메타데이터를 찾습니다.
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentMeta> {
        self.instruments.iter().find(|m| m.symbol == symbol)
    }

    /// 모든 섹션을 검증합니다.
    pub fn validate(&self) -> TraderResult<()> {
        if self.initial_equity <= Decimal::ZERO {
            return Err(TraderError::InvalidConfig(
                "initial_equity must be greater than 0".to_string(),
            ));
        }
        if self.instruments.is_empty() {
            return Err(ConfigValidationError::MissingField("instruments".into()).into());
        }

        let mut seen = HashSet::new();
        for meta in &self.instruments {
            meta.validate()?;
            if !seen.insert(meta.symbol.as_str()) {
                return Err(TraderError::InvalidConfig(format!(
                    "duplicate instrument {}",
                    meta.symbol
                )));
            }
        }

        self.grid.validate()?;
        self.progression.validate()?;
        self.protective.validate()?;
        self.basket.validate()?;
        self.equity.validate()?;
        self.money_management.validate()?;
        self.session.validate()?;

        let pairs_required = self.basket.mode == BasketMode::PerInstrumentPair
            || self.grid.entry_policy == EntryPolicy::Both;
        if pairs_required && self.basket.pairs.is_empty() {
            return Err(ConfigValidationError::MissingField("basket.pairs".into()).into());
        }
        for pair in &self.basket.pairs {
            for symbol in [&pair.first, &pair.second] {
                if !seen.contains(symbol.as_str()) {
                    return Err(TraderError::InvalidConfig(format!(
                        "pair {} references unknown instrument {}",
                        pair.id(),
                        symbol
                    )));
                }
            }
        }

        Ok(())
    }
}
