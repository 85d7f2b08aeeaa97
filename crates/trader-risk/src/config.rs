//! 리스크 관리 설정.
//!
//! 물량 진행, 보호 가격, 바스켓 청산, 자산 가드, 자금 관리, 세션 설정을
//! 섹션별 구조체로 정의합니다. 모든 필드는 serde 기본값을 가지며
//! `validate()`는 거래 시작 전에 잘못된 값을 거부합니다.

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trader_core::{PriceConverter, TraderError};

/// 물량/거리 진행 방식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionKind {
    /// 단계와 무관하게 일정
    Static,
    /// `base * multiplier^step`
    #[default]
    Geometric,
    /// `base * exp(step * ln(multiplier))`
    Exponential,
    /// `base / multiplier^step` (물량 전용)
    Decreasing,
}

/// 물량 진행 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    /// 진행 방식
    pub kind: ProgressionKind,
    /// 0단계 기본 물량 (로트)
    pub base_volume: Decimal,
    /// 단계별 배수
    pub multiplier: Decimal,
    /// 단일 레벨 물량 상한. 이를 넘는 레벨은 추가하지 않습니다.
    pub lot_limit: Decimal,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            kind: ProgressionKind::Geometric,
            base_volume: dec!(0.1),
            multiplier: dec!(2.0),
            lot_limit: dec!(10),
        }
    }
}

impl ProgressionConfig {
    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.multiplier <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "progression.multiplier must be greater than 0".into(),
            ));
        }
        if self.base_volume <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "progression.base_volume must be greater than 0".into(),
            ));
        }
        if self.lot_limit <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "progression.lot_limit must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// 트레일링 스톱 설정 (pip 단위).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 현재 가격과 스톱 사이 거리
    pub distance_pips: Decimal,
    /// 스톱 갱신 최소 폭
    pub step_pips: Decimal,
    /// 진입가 대비 `offset_pips` 이상 수익이 난 뒤에만 트레일링
    pub require_profit: bool,
    /// 트레일링 시작 수익 거리
    pub offset_pips: Decimal,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            distance_pips: dec!(10),
            step_pips: dec!(2),
            require_profit: false,
            offset_pips: Decimal::ZERO,
        }
    }
}

/// 본전 스톱 설정 (pip 단위).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakEvenConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 본전 스톱이 걸리는 수익 거리
    pub trigger_pips: Decimal,
    /// 진입가에서 유리한 쪽으로 더할 거리
    pub offset_pips: Decimal,
}

impl Default for BreakEvenConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_pips: dec!(15),
            offset_pips: dec!(1),
        }
    }
}

/// 부분 청산 단계.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialExitTier {
    /// 평균 진입가 대비 수익 거리 (pip)
    pub distance_pips: Decimal,
    /// 청산할 바스켓 수량 비율 (0 < fraction <= 1)
    pub fraction: Decimal,
}

/// 보호 주문(손절/익절) 실행 방식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectiveMode {
    /// 엔진이 고가/저가를 확인하고 시장가로 청산
    #[default]
    Virtual,
    /// 거래소에 역지정가/지정가 주문을 걸어 둠
    Resting,
}

/// 보호 가격 설정.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectiveConfig {
    /// 손절 거리 (pip). 없으면 손절 없음.
    pub stop_distance_pips: Option<Decimal>,
    /// 익절 거리 (pip). 없으면 익절 없음.
    pub take_distance_pips: Option<Decimal>,
    /// 트레일링 스톱
    pub trailing: TrailingConfig,
    /// 본전 스톱
    pub break_even: BreakEvenConfig,
    /// 부분 청산 단계 (최대 3개, 거리 오름차순)
    pub partial_exits: Vec<PartialExitTier>,
}

impl ProtectiveConfig {
    /// 최대 부분 청산 단계 수.
    pub const MAX_PARTIAL_TIERS: usize = 3;

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for (name, value) in [
            ("stop_distance_pips", self.stop_distance_pips),
            ("take_distance_pips", self.take_distance_pips),
        ] {
            if matches!(value, Some(v) if v <= Decimal::ZERO) {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "protective.{} must be greater than 0",
                    name
                )));
            }
        }

        if self.trailing.enabled {
            if self.trailing.distance_pips <= Decimal::ZERO {
                return Err(ConfigValidationError::InvalidValue(
                    "protective.trailing.distance_pips must be greater than 0".into(),
                ));
            }
            if self.trailing.step_pips < Decimal::ZERO || self.trailing.offset_pips < Decimal::ZERO {
                return Err(ConfigValidationError::InvalidValue(
                    "protective.trailing step/offset must not be negative".into(),
                ));
            }
        }

        if self.break_even.enabled && self.break_even.trigger_pips <= self.break_even.offset_pips {
            return Err(ConfigValidationError::InvalidValue(
                "protective.break_even.trigger_pips must exceed offset_pips".into(),
            ));
        }

        if self.partial_exits.len() > Self::MAX_PARTIAL_TIERS {
            return Err(ConfigValidationError::InvalidValue(format!(
                "at most {} partial exit tiers are supported",
                Self::MAX_PARTIAL_TIERS
            )));
        }
        let mut previous = Decimal::ZERO;
        for tier in &self.partial_exits {
            if tier.distance_pips <= previous {
                return Err(ConfigValidationError::InvalidValue(
                    "partial exit distances must be positive and ascending".into(),
                ));
            }
            if tier.fraction <= Decimal::ZERO || tier.fraction > Decimal::ONE {
                return Err(ConfigValidationError::InvalidValue(
                    "partial exit fraction must be in (0, 1]".into(),
                ));
            }
            previous = tier.distance_pips;
        }

        Ok(())
    }

    /// pip 단위 설정을 종목 가격 단위로 변환합니다.
    pub fn to_params(&self, converter: &PriceConverter) -> ProtectiveParams {
        let px = |pips: Decimal| converter.pips_to_price(pips);
        ProtectiveParams {
            stop_distance: self.stop_distance_pips.map(px),
            take_distance: self.take_distance_pips.map(px),
            trailing: self.trailing.enabled.then(|| TrailingParams {
                distance: px(self.trailing.distance_pips),
                step: px(self.trailing.step_pips),
                activation: self.trailing.require_profit.then(|| px(self.trailing.offset_pips)),
            }),
            break_even: self.break_even.enabled.then(|| BreakEvenParams {
                trigger: px(self.break_even.trigger_pips),
                offset: px(self.break_even.offset_pips),
            }),
            partial_exits: self
                .partial_exits
                .iter()
                .map(|t| (px(t.distance_pips), t.fraction))
                .collect(),
        }
    }
}

/// 가격 단위로 변환된 트레일링 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingParams {
    /// 가격과 스톱 사이 거리
    pub distance: Decimal,
    /// 최소 갱신 폭
    pub step: Decimal,
    /// 트레일링 시작에 필요한 추가 수익 거리
    pub activation: Option<Decimal>,
}

/// 가격 단위로 변환된 본전 스톱 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakEvenParams {
    /// 발동 거리
    pub trigger: Decimal,
    /// 진입가 오프셋
    pub offset: Decimal,
}

/// 가격 단위로 변환된 보호 파라미터.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProtectiveParams {
    /// 손절 거리
    pub stop_distance: Option<Decimal>,
    /// 익절 거리
    pub take_distance: Option<Decimal>,
    /// 트레일링
    pub trailing: Option<TrailingParams>,
    /// 본전 스톱
    pub break_even: Option<BreakEvenParams>,
    /// 부분 청산 (거리, 비율)
    pub partial_exits: Vec<(Decimal, Decimal)>,
}

/// 바스켓 손익 집계 범위.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasketMode {
    /// 종목/방향별로 따로 평가
    #[default]
    PerSide,
    /// 모든 종목과 방향을 하나로 합산
    WholeBasket,
    /// 설정된 종목 쌍별로 합산
    PerInstrumentPair,
}

/// 헤지 바스켓을 이루는 종목 쌍.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentPair {
    /// 첫 번째 종목
    pub first: String,
    /// 두 번째 종목
    pub second: String,
}

impl InstrumentPair {
    /// 쌍 식별자 (`first/second`).
    pub fn id(&self) -> String {
        format!("{}/{}", self.first, self.second)
    }

    /// 종목이 이 쌍에 속하는지 확인합니다.
    pub fn contains(&self, symbol: &str) -> bool {
        self.first == symbol || self.second == symbol
    }
}

/// 바스켓 청산 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasketRiskConfig {
    /// 집계 범위
    pub mode: BasketMode,
    /// 목표 수익 금액 (양수)
    pub profit_target: Option<Decimal>,
    /// 손실 한도 금액 (양수, 손실이 이 금액 이상이면 청산)
    pub loss_limit: Option<Decimal>,
    /// 조건이 연속으로 유지되어야 하는 평가 횟수
    pub delay: u32,
    /// `PerInstrumentPair` 모드의 종목 쌍
    pub pairs: Vec<InstrumentPair>,
}

impl Default for BasketRiskConfig {
    fn default() -> Self {
        Self {
            mode: BasketMode::PerSide,
            profit_target: None,
            loss_limit: None,
            delay: 1,
            pairs: Vec::new(),
        }
    }
}

impl BasketRiskConfig {
    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if matches!(self.profit_target, Some(v) if v <= Decimal::ZERO) {
            return Err(ConfigValidationError::InvalidValue(
                "basket.profit_target must be greater than 0".into(),
            ));
        }
        if matches!(self.loss_limit, Some(v) if v <= Decimal::ZERO) {
            return Err(ConfigValidationError::InvalidValue(
                "basket.loss_limit must be a positive amount".into(),
            ));
        }
        if self.mode == BasketMode::PerInstrumentPair && self.pairs.is_empty() {
            return Err(ConfigValidationError::MissingField("basket.pairs".into()));
        }
        Ok(())
    }
}

/// 자산 가드 설정.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EquityConfig {
    /// 최고 자산 대비 허용 낙폭 (%). 초과 시 긴급 정지.
    pub risk_percent: Option<Decimal>,
    /// 이 자산 미만이면 새 바스켓을 열지 않음
    pub min_equity: Option<Decimal>,
}

impl EquityConfig {
    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if matches!(self.risk_percent, Some(v) if v <= Decimal::ZERO || v > Decimal::ONE_HUNDRED) {
            return Err(ConfigValidationError::InvalidValue(
                "equity.risk_percent must be between 0 and 100".into(),
            ));
        }
        if matches!(self.min_equity, Some(v) if v < Decimal::ZERO) {
            return Err(ConfigValidationError::InvalidValue(
                "equity.min_equity must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// 연속 손실 기반 자금 관리 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoneyManagementConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 최근 몇 사이클을 볼지
    pub history_depth: usize,
    /// 최근 사이클 중 이 횟수 이상 손실이면 축소 물량 사용
    pub loss_trigger: usize,
    /// 축소 물량 (0이면 거래하지 않음)
    pub reduced_volume: Decimal,
}

impl Default for MoneyManagementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            history_depth: 5,
            loss_trigger: 3,
            reduced_volume: dec!(0.01),
        }
    }
}

impl MoneyManagementConfig {
    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.enabled {
            return Ok(());
        }
        if self.history_depth == 0 || self.loss_trigger == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "money_management history_depth and loss_trigger must be greater than 0".into(),
            ));
        }
        if self.loss_trigger > self.history_depth {
            return Err(ConfigValidationError::InvalidValue(
                "money_management.loss_trigger must not exceed history_depth".into(),
            ));
        }
        if self.reduced_volume < Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "money_management.reduced_volume must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// 거래 세션 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 세션 시간대 (IANA 이름)
    pub timezone: Tz,
    /// 거래 요일
    pub trading_days: Vec<Weekday>,
    /// 일일 거래 시작 시각
    pub start: NaiveTime,
    /// 일일 거래 종료 시각 (시작보다 이르면 자정을 넘는 세션)
    pub end: NaiveTime,
    /// 금요일 이 시각 이후는 블랙아웃 (강제 청산)
    pub friday_blackout: Option<NaiveTime>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: Tz::UTC,
            trading_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            start: NaiveTime::default(),
            end: NaiveTime::default(),
            friday_blackout: None,
        }
    }
}

impl SessionConfig {
    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.enabled && self.trading_days.is_empty() {
            return Err(ConfigValidationError::MissingField("session.trading_days".into()));
        }
        Ok(())
    }
}

/// 설정 검증 오류.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<ConfigValidationError> for TraderError {
    fn from(err: ConfigValidationError) -> Self {
        TraderError::InvalidConfig(err.to_string())
    }
}
