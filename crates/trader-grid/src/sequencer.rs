//! 그리드 진입 판단.
//!
//! 틱마다 바스켓에 새 레벨이 필요한지 결정합니다. 주문을 직접 내지 않고
//! 결정만 반환하므로, 엔진은 청산 판단을 먼저 끝낸 뒤 이 결과를 씁니다.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use trader_core::{InstrumentMeta, PositionSide, Price, Quantity, TraderResult};
use trader_risk::{next_trigger_distance, MoneyManager, ProgressionEngine, VolumeDecision};

use crate::basket::Basket;
use crate::config::{EntryPolicy, GridConfig};

/// 진입하지 않는 이유.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// 대기 중인 진입 또는 청산 주문이 있음
    Busy,
    /// 최대 깊이 도달
    MaxDepth,
    /// 레벨 간 최소 간격 미달
    Cooldown,
    /// 역행 거리 미달
    DistanceNotReached,
    /// 물량이 최소 수량 미만 (또는 자금 관리가 0으로 축소)
    NoTrade,
    /// 물량이 레벨 상한을 넘음
    LimitExceeded,
}

/// 진입 판단 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum EntryDecision {
    /// `step` 단계를 `volume`으로 진입
    Open {
        /// 진입할 단계 (0부터)
        step: u32,
        /// 주문 물량
        volume: Quantity,
        /// 이번 사이클의 기본 물량
        base_volume: Quantity,
    },
    /// 진입하지 않음
    Skip(SkipReason),
}

/// 그리드 진입 판단기.
#[derive(Debug)]
pub struct GridSequencer {
    config: GridConfig,
    progression: ProgressionEngine,
    money: MoneyManager,
}

impl GridSequencer {
    /// 새 판단기를 생성합니다.
    pub fn new(config: GridConfig, progression: ProgressionEngine, money: MoneyManager) -> Self {
        Self {
            config,
            progression,
            money,
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn money(&self) -> &MoneyManager {
        &self.money
    }

    /// 종목의 새 바스켓 방향.
    ///
    /// `both` 정책에서는 쌍의 첫 종목이 롱, 둘째 종목이 숏이며
    /// 쌍에 속하지 않은 종목은 신호 방향을 따릅니다.
    pub fn entry_side(
        &self,
        symbol: &str,
        bias: Option<PositionSide>,
        pairs: &[trader_risk::InstrumentPair],
    ) -> Option<PositionSide> {
        match self.config.entry_policy {
            EntryPolicy::Bias => bias,
            EntryPolicy::LongOnly => Some(PositionSide::Long),
            EntryPolicy::ShortOnly => Some(PositionSide::Short),
            EntryPolicy::Both => {
                for pair in pairs {
                    if pair.first == symbol {
                        return Some(PositionSide::Long);
                    }
                    if pair.second == symbol {
                        return Some(PositionSide::Short);
                    }
                }
                bias
            }
        }
    }

    /// 플랫 바스켓의 첫 진입 (0단계).
    pub fn first_entry(&self, basket: &Basket, meta: &InstrumentMeta) -> TraderResult<EntryDecision> {
        if !basket.is_idle() {
            return Ok(EntryDecision::Skip(SkipReason::Busy));
        }
        let base = self
            .money
            .base_volume(basket.loss_history(), self.progression.config().base_volume);
        self.volume_decision(0, base, meta)
    }

    /// 열린 바스켓의 추가 레벨.
    ///
    /// 역행 거리, 최소 간격, 최대 깊이, 물량 상한을 모두 통과해야 합니다.
    pub fn next_entry(
        &self,
        basket: &Basket,
        price: Price,
        time: DateTime<Utc>,
        meta: &InstrumentMeta,
    ) -> TraderResult<EntryDecision> {
        if !basket.is_idle() {
            return Ok(EntryDecision::Skip(SkipReason::Busy));
        }
        let step = basket.step_index();
        if step >= self.config.max_depth {
            return Ok(EntryDecision::Skip(SkipReason::MaxDepth));
        }
        let (Some(last_price), Some(last_time)) = (basket.last_entry_price(), basket.last_entry_time())
        else {
            return Ok(EntryDecision::Skip(SkipReason::Busy));
        };

        if time - last_time < Duration::seconds(self.config.cooldown_secs) {
            return Ok(EntryDecision::Skip(SkipReason::Cooldown));
        }

        let side = basket.key().side;
        let adverse_move = side.sign() * (last_price - price);
        let Some(trigger) = self.trigger_distance(step, meta)? else {
            return Ok(EntryDecision::Skip(SkipReason::LimitExceeded));
        };
        if adverse_move < trigger {
            return Ok(EntryDecision::Skip(SkipReason::DistanceNotReached));
        }

        let base = basket
            .cycle_base_volume()
            .unwrap_or(self.progression.config().base_volume);
        let decision = self.volume_decision(step, base, meta)?;
        debug!(
            basket = %basket.key(),
            step,
            adverse_move = %adverse_move,
            trigger = %trigger,
            decision = ?decision,
            "Grid level evaluated"
        );
        Ok(decision)
    }

    /// `depth`개 레벨이 열린 바스켓이 다음 레벨을 추가하기 위한 역행 거리 (가격 단위).
    ///
    /// 첫 추가 레벨은 기본 거리를 쓰고 이후 레벨은 진행 방식대로 늘어납니다.
    /// 오버플로는 `None`입니다.
    pub fn trigger_distance(&self, depth: u32, meta: &InstrumentMeta) -> TraderResult<Option<Decimal>> {
        let pips = next_trigger_distance(
            self.config.trigger_kind,
            depth.saturating_sub(1),
            self.config.trigger_distance_pips,
            self.config.trigger_growth,
        )?;
        Ok(pips.map(|p| meta.converter().pips_to_price(p)))
    }

    fn volume_decision(
        &self,
        step: u32,
        base: Decimal,
        meta: &InstrumentMeta,
    ) -> TraderResult<EntryDecision> {
        Ok(match self.progression.next_volume_from(step, base, meta)? {
            VolumeDecision::Trade(volume) => EntryDecision::Open {
                step,
                volume,
                base_volume: base,
            },
            VolumeDecision::NoTrade => EntryDecision::Skip(SkipReason::NoTrade),
            VolumeDecision::LimitExceeded => EntryDecision::Skip(SkipReason::LimitExceeded),
        })
    }
}
