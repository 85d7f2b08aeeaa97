//! 그리드 단계별 물량 및 트리거 거리 진행.
//!
//! 단계 인덱스와 진행 방식으로부터 다음 주문 물량과 다음 레벨까지의
//! 불리한 가격 이동 거리를 계산합니다. 모든 함수는 상태가 없습니다.

use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use trader_core::{DecimalExt, InstrumentMeta, RoundMethod, TraderError, TraderResult};

use crate::config::{ProgressionConfig, ProgressionKind};

/// 다음 레벨 물량 결정.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "volume")]
pub enum VolumeDecision {
    /// 주어진 물량으로 주문
    Trade(Decimal),
    /// 라운딩 후 최소 물량 미만 (주문하지 않음)
    NoTrade,
    /// 물량 상한 초과 (더 이상 레벨을 추가하지 않음)
    LimitExceeded,
}

impl VolumeDecision {
    /// 주문 물량 (거래 가능할 때만).
    pub fn volume(&self) -> Option<Decimal> {
        match self {
            VolumeDecision::Trade(v) => Some(*v),
            _ => None,
        }
    }
}

/// 진행 방식에 따른 원시 값 `base ⊗ multiplier^step`.
///
/// 오버플로는 `Ok(None)`으로 반환합니다.
pub fn progress(
    kind: ProgressionKind,
    step: u32,
    base: Decimal,
    multiplier: Decimal,
) -> TraderResult<Option<Decimal>> {
    if multiplier <= Decimal::ZERO {
        return Err(TraderError::InvalidConfig(format!(
            "progression multiplier must be > 0 (got {})",
            multiplier
        )));
    }

    let value = match kind {
        ProgressionKind::Static => Some(base),
        ProgressionKind::Geometric => multiplier
            .checked_powu(u64::from(step))
            .and_then(|factor| base.checked_mul(factor)),
        ProgressionKind::Exponential => Decimal::from(step)
            .checked_mul(multiplier.ln())
            .and_then(|exponent| exponent.checked_exp())
            .and_then(|factor| base.checked_mul(factor)),
        ProgressionKind::Decreasing => multiplier
            .checked_powu(u64::from(step))
            .and_then(|factor| base.checked_div(factor)),
    };

    Ok(value)
}

/// 다음 레벨까지의 트리거 거리.
///
/// 거리에는 감소 진행이 의미가 없으므로 `Decreasing`은 `Static`으로 취급합니다.
pub fn next_trigger_distance(
    kind: ProgressionKind,
    step: u32,
    base_distance: Decimal,
    growth: Decimal,
) -> TraderResult<Option<Decimal>> {
    let kind = match kind {
        ProgressionKind::Decreasing => ProgressionKind::Static,
        other => other,
    };
    progress(kind, step, base_distance, growth)
}

/// 물량 진행 엔진.
#[derive(Debug, Clone)]
pub struct ProgressionEngine {
    config: ProgressionConfig,
}

impl ProgressionEngine {
    /// 검증된 설정으로 엔진을 생성합니다.
    pub fn new(config: ProgressionConfig) -> TraderResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 설정을 반환합니다.
    pub fn config(&self) -> &ProgressionConfig {
        &self.config
    }

    /// 설정된 기본 물량으로 `step` 단계 물량을 결정합니다.
    pub fn next_volume(&self, step: u32, meta: &InstrumentMeta) -> TraderResult<VolumeDecision> {
        self.next_volume_from(step, self.config.base_volume, meta)
    }

    /// 주어진 기본 물량으로 `step` 단계 물량을 결정합니다.
    ///
    /// 결과는 수량 단위로 라운딩되고 `max_volume`으로 제한됩니다.
    /// `lot_limit`을 넘으면 `LimitExceeded`, `min_volume` 미만이면 `NoTrade`입니다.
    pub fn next_volume_from(
        &self,
        step: u32,
        base_volume: Decimal,
        meta: &InstrumentMeta,
    ) -> TraderResult<VolumeDecision> {
        if base_volume <= Decimal::ZERO {
            return Ok(VolumeDecision::NoTrade);
        }

        let raw = match progress(self.config.kind, step, base_volume, self.config.multiplier)? {
            Some(v) => v,
            None => return Ok(VolumeDecision::LimitExceeded),
        };

        let rounded = raw.round_to_step(meta.volume_step, RoundMethod::Round);
        if rounded > self.config.lot_limit {
            return Ok(VolumeDecision::LimitExceeded);
        }

        let clamped = rounded.min(meta.max_volume);
        if clamped < meta.min_volume {
            return Ok(VolumeDecision::NoTrade);
        }

        Ok(VolumeDecision::Trade(clamped))
    }
}
