//! 보호 가격(손절/익절) 관리.
//!
//! 바스켓 방향별로 손절가와 익절가를 유지하고, 가격이 유리하게
//! 움직이면 트레일링/본전 스톱으로 손절가를 끌어올립니다.
//!
//! 손절가는 어떤 경로로도 불리한 쪽으로 움직이지 않습니다.
//!
//! 상태 전이: `Unarmed → Armed → Trailing → BreakEven → Closed`

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use trader_core::{CloseReason, PositionSide, Price};

use crate::config::ProtectiveParams;
use crate::key::BasketKey;

/// 보호 가격 상태 단계.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectivePhase {
    /// 포지션 없음
    #[default]
    Unarmed,
    /// 초기 손절/익절 설정됨
    Armed,
    /// 트레일링 스톱이 손절가를 갱신함
    Trailing,
    /// 본전 스톱이 적용됨
    BreakEven,
    /// 손절/익절 도달
    Closed,
}

/// 부분 청산 진행 단계.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailTier {
    /// 부분 청산 없음
    #[default]
    None,
    /// 1단계 완료
    Tier1,
    /// 2단계 완료
    Tier2,
    /// 3단계 완료
    Tier3,
}

impl TrailTier {
    /// 완료된 단계 수.
    pub fn completed(&self) -> usize {
        match self {
            TrailTier::None => 0,
            TrailTier::Tier1 => 1,
            TrailTier::Tier2 => 2,
            TrailTier::Tier3 => 3,
        }
    }

    /// 다음 단계.
    pub fn next(&self) -> Option<TrailTier> {
        match self {
            TrailTier::None => Some(TrailTier::Tier1),
            TrailTier::Tier1 => Some(TrailTier::Tier2),
            TrailTier::Tier2 => Some(TrailTier::Tier3),
            TrailTier::Tier3 => None,
        }
    }

    /// 주문 목적에 기록할 단계 번호 (1부터).
    pub fn number(&self) -> u8 {
        self.completed() as u8
    }
}

/// 보호 가격 도달 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// 손절가 도달
    StopHit,
    /// 익절가 도달
    TakeHit,
}

impl From<ExitReason> for CloseReason {
    fn from(reason: ExitReason) -> Self {
        match reason {
            ExitReason::StopHit => CloseReason::StopHit,
            ExitReason::TakeHit => CloseReason::TakeHit,
        }
    }
}

/// 부분 청산 신호.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialExit {
    /// 새로 완료된 단계
    pub tier: TrailTier,
    /// 청산할 수량 비율
    pub fraction: Decimal,
}

/// 손절/익절 변경 내역.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelChange {
    /// 손절가 변경 여부
    pub stop_changed: bool,
    /// 익절가 변경 여부
    pub take_changed: bool,
}

impl LevelChange {
    /// 변경 사항이 있는지 확인합니다.
    pub fn any(&self) -> bool {
        self.stop_changed || self.take_changed
    }
}

/// 바스켓 방향 하나의 보호 가격 상태.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveState {
    /// 방향
    pub side: PositionSide,
    /// 기준 진입가 (가중 평균)
    pub entry_price: Price,
    /// 손절가
    pub stop_price: Option<Price>,
    /// 익절가
    pub take_price: Option<Price>,
    /// 트레일링 시작 후 가장 유리했던 가격
    pub trailing_anchor: Option<Price>,
    /// 본전 스톱 적용 여부 (한 번만)
    pub breakeven_armed: bool,
    /// 현재 단계
    pub phase: ProtectivePhase,
    /// 부분 청산 단계
    pub tier: TrailTier,
    #[serde(skip)]
    params: ProtectiveParams,
}

impl ProtectiveState {
    fn new(side: PositionSide, entry: Price, params: ProtectiveParams) -> Self {
        let stop_price = params.stop_distance.map(|d| side.adverse(entry, d));
        let take_price = params.take_distance.map(|d| side.favorable(entry, d));
        Self {
            side,
            entry_price: entry,
            stop_price,
            take_price,
            trailing_anchor: None,
            breakeven_armed: false,
            phase: ProtectivePhase::Armed,
            tier: TrailTier::None,
            params,
        }
    }

    /// 진입가 대비 유리한 방향 이동 거리 (불리하면 음수).
    fn favorable_move(&self, price: Price) -> Decimal {
        self.side.sign() * (price - self.entry_price)
    }

    /// 후보 손절가가 현재 손절가보다 최소 `min_gain`만큼 유리한지 확인합니다.
    fn improves_stop(&self, candidate: Price, min_gain: Decimal) -> bool {
        match self.stop_price {
            None => true,
            Some(current) => {
                self.side.is_better(candidate, current)
                    && self.side.sign() * (candidate - current) >= min_gain
            }
        }
    }
}

/// 바스켓별 보호 가격 관리자.
#[derive(Debug, Default)]
pub struct ProtectiveLevelManager {
    states: HashMap<BasketKey, ProtectiveState>,
}

impl ProtectiveLevelManager {
    /// 빈 관리자를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 바스켓의 보호 상태를 반환합니다.
    pub fn get(&self, key: &BasketKey) -> Option<&ProtectiveState> {
        self.states.get(key)
    }

    /// 모든 보호 상태.
    pub fn iter(&self) -> impl Iterator<Item = (&BasketKey, &ProtectiveState)> {
        self.states.iter()
    }

    /// 첫 체결 시 손절/익절을 설정합니다 (`Unarmed → Armed`).
    ///
    /// 이미 설정된 바스켓이면 새 평균 진입가로 재계산합니다.
    pub fn arm(&mut self, key: &BasketKey, entry: Price, params: ProtectiveParams) -> LevelChange {
        if self.states.contains_key(key) {
            return self.rederive(key, entry);
        }

        let state = ProtectiveState::new(key.side, entry, params);
        info!(
            basket = %key,
            entry = %entry,
            stop = ?state.stop_price,
            take = ?state.take_price,
            "Protective levels armed"
        );
        let change = LevelChange {
            stop_changed: state.stop_price.is_some(),
            take_changed: state.take_price.is_some(),
        };
        self.states.insert(key.clone(), state);
        change
    }

    /// 평균 진입가가 바뀐 뒤 보호 가격을 다시 계산합니다.
    ///
    /// 익절가는 새 평균을 따르고, 손절가는 더 유리할 때만 바뀝니다.
    pub fn rederive(&mut self, key: &BasketKey, entry: Price) -> LevelChange {
        let Some(state) = self.states.get_mut(key) else {
            return LevelChange::default();
        };

        state.entry_price = entry;
        let mut change = LevelChange::default();

        if let Some(distance) = state.params.take_distance {
            let take = state.side.favorable(entry, distance);
            if state.take_price != Some(take) {
                state.take_price = Some(take);
                change.take_changed = true;
            }
        }

        if let Some(distance) = state.params.stop_distance {
            let stop = state.side.adverse(entry, distance);
            if state.improves_stop(stop, Decimal::ZERO) {
                state.stop_price = Some(stop);
                change.stop_changed = true;
            }
        }

        if change.any() {
            info!(
                basket = %key,
                entry = %entry,
                stop = ?state.stop_price,
                take = ?state.take_price,
                "Protective levels re-derived"
            );
        }
        change
    }

    /// 트레일링 스톱을 갱신합니다. 손절가가 바뀌면 새 손절가를 반환합니다.
    ///
    /// 후보 손절가(가격 ∓ 트레일 거리)가 진입가보다 유리해야 트레일링이 시작되고,
    /// 기존 손절가보다 `step` 이상 유리할 때만 교체합니다.
    pub fn update_trailing(&mut self, key: &BasketKey, price: Price) -> Option<Price> {
        let state = self.states.get_mut(key)?;
        let trailing = state.params.trailing?;
        if state.phase == ProtectivePhase::Closed {
            return None;
        }

        let advance = state.favorable_move(price);
        if advance <= trailing.distance {
            return None;
        }
        if let Some(activation) = trailing.activation {
            if advance < activation {
                return None;
            }
        }

        let anchor = match state.trailing_anchor {
            Some(a) if !state.side.is_better(price, a) => a,
            _ => price,
        };
        state.trailing_anchor = Some(anchor);

        let candidate = state.side.adverse(anchor, trailing.distance);
        if !state.improves_stop(candidate, trailing.step) {
            debug!(basket = %key, candidate = %candidate, "Trailing step not reached");
            return None;
        }

        state.stop_price = Some(candidate);
        state.phase = ProtectivePhase::Trailing;
        info!(basket = %key, stop = %candidate, price = %price, "Trailing stop updated");
        Some(candidate)
    }

    /// 본전 스톱을 적용합니다. 한 번 발동하면 다시 발동하지 않습니다.
    pub fn update_break_even(&mut self, key: &BasketKey, price: Price) -> Option<Price> {
        let state = self.states.get_mut(key)?;
        let break_even = state.params.break_even?;
        if state.breakeven_armed || state.phase == ProtectivePhase::Closed {
            return None;
        }
        if state.favorable_move(price) < break_even.trigger {
            return None;
        }

        state.breakeven_armed = true;
        let target = state.side.favorable(state.entry_price, break_even.offset);
        if !state.improves_stop(target, Decimal::ZERO) {
            return None;
        }

        state.stop_price = Some(target);
        state.phase = ProtectivePhase::BreakEven;
        info!(basket = %key, stop = %target, "Break-even stop applied");
        Some(target)
    }

    /// 봉/틱의 저가·고가로 손절/익절 도달 여부를 확인합니다.
    ///
    /// 같은 봉에서 둘 다 도달하면 손절을 우선합니다.
    pub fn check_exit(&mut self, key: &BasketKey, low: Price, high: Price) -> Option<ExitReason> {
        let state = self.states.get_mut(key)?;
        if state.phase == ProtectivePhase::Closed {
            return None;
        }

        let (adverse_extreme, favorable_extreme) = match state.side {
            PositionSide::Long => (low, high),
            PositionSide::Short => (high, low),
        };

        let stop_hit = state
            .stop_price
            .is_some_and(|stop| !state.side.is_better(adverse_extreme, stop));
        let take_hit = state
            .take_price
            .is_some_and(|take| !state.side.is_better(take, favorable_extreme));

        let reason = if stop_hit {
            ExitReason::StopHit
        } else if take_hit {
            ExitReason::TakeHit
        } else {
            return None;
        };

        state.phase = ProtectivePhase::Closed;
        info!(basket = %key, reason = ?reason, stop = ?state.stop_price, take = ?state.take_price, "Protective level hit");
        Some(reason)
    }

    /// 다음 부분 청산 단계에 도달했는지 확인하고, 도달했으면 단계를 진행합니다.
    pub fn check_partial_exit(&mut self, key: &BasketKey, price: Price) -> Option<PartialExit> {
        let state = self.states.get_mut(key)?;
        if state.phase == ProtectivePhase::Closed {
            return None;
        }

        let (distance, fraction) = *state.params.partial_exits.get(state.tier.completed())?;
        if state.favorable_move(price) < distance {
            return None;
        }

        let tier = state.tier.next()?;
        state.tier = tier;
        info!(basket = %key, tier = ?tier, fraction = %fraction, "Partial exit tier reached");
        Some(PartialExit { tier, fraction })
    }

    /// 체결로 보호 가격이 닫힌 상태였으나 포지션이 남은 경우 다시 활성화합니다.
    pub fn reopen(&mut self, key: &BasketKey) {
        if let Some(state) = self.states.get_mut(key) {
            if state.phase == ProtectivePhase::Closed {
                state.phase = ProtectivePhase::Armed;
            }
        }
    }

    /// 바스켓이 청산되면 상태를 제거합니다.
    pub fn clear(&mut self, key: &BasketKey) -> Option<ProtectiveState> {
        let removed = self.states.remove(key);
        if removed.is_some() {
            debug!(basket = %key, "Protective state cleared");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakEvenParams, TrailingParams};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    const PIP: Decimal = dec!(0.0001);

    fn params() -> ProtectiveParams {
        ProtectiveParams {
            stop_distance: Some(dec!(20) * PIP),
            take_distance: Some(dec!(40) * PIP),
            trailing: Some(TrailingParams {
                distance: dec!(10) * PIP,
                step: dec!(2) * PIP,
                activation: None,
            }),
            break_even: None,
            partial_exits: Vec::new(),
        }
    }

    fn long_key() -> BasketKey {
        BasketKey::new("EURUSD", PositionSide::Long)
    }

    #[test]
    fn test_arm_long_and_short() {
        let mut manager = ProtectiveLevelManager::new();
        manager.arm(&long_key(), dec!(1.1000), params());
        let state = manager.get(&long_key()).unwrap();
        assert_eq!(state.stop_price, Some(dec!(1.0980)));
        assert_eq!(state.take_price, Some(dec!(1.1040)));
        assert_eq!(state.phase, ProtectivePhase::Armed);

        let short = BasketKey::new("EURUSD", PositionSide::Short);
        manager.arm(&short, dec!(1.1000), params());
        let state = manager.get(&short).unwrap();
        assert_eq!(state.stop_price, Some(dec!(1.1020)));
        assert_eq!(state.take_price, Some(dec!(1.0960)));
    }

    #[test]
    fn test_trailing_ratchets_at_fifteen_pips() {
        let mut manager = ProtectiveLevelManager::new();
        let key = long_key();
        let entry = dec!(1.1000);
        manager.arm(&key, entry, params());

        assert_eq!(manager.update_trailing(&key, entry + dec!(5) * PIP), None);
        assert_eq!(manager.update_trailing(&key, entry + dec!(10) * PIP), None);
        assert_eq!(manager.get(&key).unwrap().stop_price, Some(dec!(1.0980)));

        let stop = manager.update_trailing(&key, entry + dec!(15) * PIP);
        assert_eq!(stop, Some(entry + dec!(5) * PIP));
        assert_eq!(manager.get(&key).unwrap().phase, ProtectivePhase::Trailing);

        // 1 pip 개선은 step(2 pip) 미만이라 무시
        assert_eq!(manager.update_trailing(&key, entry + dec!(16) * PIP), None);
        assert_eq!(
            manager.update_trailing(&key, entry + dec!(17) * PIP),
            Some(entry + dec!(7) * PIP)
        );
        // 되돌림에도 손절가 유지
        assert_eq!(manager.update_trailing(&key, entry + dec!(12) * PIP), None);
        assert_eq!(manager.get(&key).unwrap().stop_price, Some(entry + dec!(7) * PIP));
    }

    #[test]
    fn test_trailing_requires_profit_offset() {
        let mut p = params();
        p.trailing = Some(TrailingParams {
            distance: dec!(10) * PIP,
            step: Decimal::ZERO,
            activation: Some(dec!(25) * PIP),
        });
        let mut manager = ProtectiveLevelManager::new();
        let key = long_key();
        manager.arm(&key, dec!(1.1000), p);

        assert_eq!(manager.update_trailing(&key, dec!(1.1020)), None);
        assert_eq!(manager.update_trailing(&key, dec!(1.1025)), Some(dec!(1.1015)));
    }

    #[test]
    fn test_short_trailing_moves_down() {
        let mut manager = ProtectiveLevelManager::new();
        let key = BasketKey::new("EURUSD", PositionSide::Short);
        manager.arm(&key, dec!(1.1000), params());
        assert_eq!(manager.update_trailing(&key, dec!(1.0985)), Some(dec!(1.0995)));
        assert_eq!(manager.update_trailing(&key, dec!(1.0990)), None);
    }

    #[test]
    fn test_break_even_is_one_way() {
        let mut p = params();
        p.trailing = None;
        p.break_even = Some(BreakEvenParams {
            trigger: dec!(15) * PIP,
            offset: dec!(1) * PIP,
        });
        let mut manager = ProtectiveLevelManager::new();
        let key = long_key();
        manager.arm(&key, dec!(1.1000), p);

        assert_eq!(manager.update_break_even(&key, dec!(1.1010)), None);
        assert_eq!(manager.update_break_even(&key, dec!(1.1015)), Some(dec!(1.1001)));
        let state = manager.get(&key).unwrap();
        assert!(state.breakeven_armed);
        assert_eq!(state.phase, ProtectivePhase::BreakEven);
        assert_eq!(manager.update_break_even(&key, dec!(1.1030)), None);
    }

    #[test]
    fn test_stop_priority_on_same_bar() {
        let mut manager = ProtectiveLevelManager::new();
        let key = long_key();
        manager.arm(&key, dec!(1.1000), params());
        assert_eq!(manager.check_exit(&key, dec!(1.0990), dec!(1.1030)), None);
        assert_eq!(
            manager.check_exit(&key, dec!(1.0970), dec!(1.1050)),
            Some(ExitReason::StopHit)
        );
        assert_eq!(manager.check_exit(&key, dec!(1.0970), dec!(1.1050)), None);
    }

    #[test]
    fn test_take_hit_short() {
        let mut manager = ProtectiveLevelManager::new();
        let key = BasketKey::new("EURUSD", PositionSide::Short);
        manager.arm(&key, dec!(1.1000), params());
        assert_eq!(
            manager.check_exit(&key, dec!(1.0958), dec!(1.0990)),
            Some(ExitReason::TakeHit)
        );
    }

    #[test]
    fn test_rederive_follows_average_without_worsening_stop() {
        let mut manager = ProtectiveLevelManager::new();
        let key = long_key();
        manager.arm(&key, dec!(1.1000), params());
        let change = manager.arm(&key, dec!(1.0990), params());
        assert!(change.take_changed);
        assert!(!change.stop_changed);
        let state = manager.get(&key).unwrap();
        assert_eq!(state.take_price, Some(dec!(1.1030)));
        assert_eq!(state.stop_price, Some(dec!(1.0980)));
        assert_eq!(state.entry_price, dec!(1.0990));
    }

    #[test]
    fn test_partial_exit_tiers_advance_once() {
        let mut p = params();
        p.partial_exits = vec![(dec!(10) * PIP, dec!(0.3)), (dec!(20) * PIP, dec!(0.5))];
        let mut manager = ProtectiveLevelManager::new();
        let key = long_key();
        manager.arm(&key, dec!(1.1000), p);

        assert_eq!(manager.check_partial_exit(&key, dec!(1.1005)), None);
        let first = manager.check_partial_exit(&key, dec!(1.1012)).unwrap();
        assert_eq!(first.tier, TrailTier::Tier1);
        assert_eq!(first.fraction, dec!(0.3));
        assert_eq!(manager.check_partial_exit(&key, dec!(1.1012)), None);
        let second = manager.check_partial_exit(&key, dec!(1.1025)).unwrap();
        assert_eq!(second.tier, TrailTier::Tier2);
        assert_eq!(manager.check_partial_exit(&key, dec!(1.1100)), None);
    }

    #[test]
    fn test_clear_removes_state() {
        let mut manager = ProtectiveLevelManager::new();
        let key = long_key();
        manager.arm(&key, dec!(1.1000), params());
        assert!(manager.clear(&key).is_some());
        assert!(manager.get(&key).is_none());
        assert_eq!(manager.update_trailing(&key, dec!(1.2)), None);
    }

    proptest! {
        #[test]
        fn prop_trailing_stop_is_monotonic(
            moves in proptest::collection::vec(-300i64..300, 1..60),
            long in any::<bool>(),
        ) {
            let side = if long { PositionSide::Long } else { PositionSide::Short };
            let key = BasketKey::new("EURUSD", side);
            let mut p = params();
            p.break_even = Some(BreakEvenParams { trigger: dec!(15) * PIP, offset: dec!(1) * PIP });
            let mut manager = ProtectiveLevelManager::new();
            let entry = dec!(1.1000);
            manager.arm(&key, entry, p);

            let mut previous = manager.get(&key).unwrap().stop_price.unwrap();
            for m in moves {
                let price = entry + Decimal::from(m) * PIP;
                manager.update_trailing(&key, price);
                manager.update_break_even(&key, price);
                let stop = manager.get(&key).unwrap().stop_price.unwrap();
                match side {
                    PositionSide::Long => prop_assert!(stop >= previous),
                    PositionSide::Short => prop_assert!(stop <= previous),
                }
                previous = stop;
            }
        }
    }
}
