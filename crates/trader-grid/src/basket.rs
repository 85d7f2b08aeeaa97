//! 바스켓 생명주기.
//!
//! 바스켓은 한 종목(그룹)의 한 방향에 대한 그리드 사이클 상태입니다.
//! 로트 자체는 포지션 원장이 소유하며, 바스켓은 단계 수, 마지막 진입,
//! 사이클 실현 손익, 손실 이력만 관리합니다.
//!
//! 불변식: `step_index == 0` ⇔ 원장에서 해당 방향이 플랫.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{CloseReason, OrderHandle, Price};
use trader_risk::{BasketKey, LossHistory};

/// 진행 중인 바스켓 청산.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closing {
    /// 청산 사유
    pub reason: CloseReason,
    /// 거래소에 나가 있는 청산 주문. `None`이면 다음 틱에 다시 제출.
    pub handle: Option<OrderHandle>,
    /// 제출 시도 횟수
    pub attempts: u32,
}

/// 종료된 바스켓 사이클.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    /// 사이클이 도달한 단계 수
    pub steps: u32,
    /// 사이클 실현 손익
    pub realized_pnl: Decimal,
    /// 손실 사이클 여부
    pub loss: bool,
}

/// 한 방향의 그리드 바스켓.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    key: BasketKey,
    step_index: u32,
    last_entry_price: Option<Price>,
    last_entry_time: Option<DateTime<Utc>>,
    cycle_base_volume: Option<Decimal>,
    cycle_pnl: Decimal,
    cycles: u32,
    loss_history: LossHistory,
    pending_entry: Option<OrderHandle>,
    closing: Option<Closing>,
}

impl Basket {
    /// 빈 바스켓을 생성합니다.
    pub fn new(key: BasketKey, loss_history: LossHistory) -> Self {
        Self {
            key,
            step_index: 0,
            last_entry_price: None,
            last_entry_time: None,
            cycle_base_volume: None,
            cycle_pnl: Decimal::ZERO,
            cycles: 0,
            loss_history,
            pending_entry: None,
            closing: None,
        }
    }

    pub fn key(&self) -> &BasketKey {
        &self.key
    }

    /// 현재 그리드 깊이 (0 = 플랫).
    pub fn step_index(&self) -> u32 {
        self.step_index
    }

    pub fn is_flat(&self) -> bool {
        self.step_index == 0
    }

    pub fn last_entry_price(&self) -> Option<Price> {
        self.last_entry_price
    }

    pub fn last_entry_time(&self) -> Option<DateTime<Utc>> {
        self.last_entry_time
    }

    /// 이번 사이클에 고정된 기본 물량.
    pub fn cycle_base_volume(&self) -> Option<Decimal> {
        self.cycle_base_volume
    }

    /// 이번 사이클의 실현 손익.
    pub fn cycle_pnl(&self) -> Decimal {
        self.cycle_pnl
    }

    /// 종료된 사이클 수.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn loss_history(&self) -> &LossHistory {
        &self.loss_history
    }

    pub fn pending_entry(&self) -> Option<OrderHandle> {
        self.pending_entry
    }

    pub fn closing(&self) -> Option<&Closing> {
        self.closing.as_ref()
    }

    /// 새 레벨을 낼 수 있는 상태인지 (대기 진입/청산 없음).
    pub fn is_idle(&self) -> bool {
        self.pending_entry.is_none() && self.closing.is_none()
    }

    /// 진입 주문 제출을 기록합니다. 첫 진입이면 사이클 기본 물량을 고정합니다.
    pub fn entry_submitted(&mut self, handle: OrderHandle, base_volume: Decimal) {
        self.pending_entry = Some(handle);
        if self.step_index == 0 {
            self.cycle_base_volume = Some(base_volume);
        }
    }

    /// 진입 주문이 최종 상태(체결 완료/거부/취소)가 되었습니다.
    pub fn entry_finished(&mut self, handle: OrderHandle) {
        if self.pending_entry == Some(handle) {
            self.pending_entry = None;
        }
    }

    /// 진입 주문의 첫 체결로 단계를 확정합니다. 단계는 체결 확인 시에만 증가합니다.
    pub fn entry_filled(&mut self, price: Price, time: DateTime<Utc>) {
        self.step_index += 1;
        self.last_entry_price = Some(price);
        self.last_entry_time = Some(time);
    }

    /// 실현 손익을 누적합니다.
    pub fn add_realized(&mut self, pnl: Decimal) {
        self.cycle_pnl += pnl;
    }

    /// 청산을 시작합니다.
    pub fn begin_close(&mut self, reason: CloseReason, handle: OrderHandle) {
        let attempts = self.closing.map_or(0, |c| c.attempts);
        self.closing = Some(Closing {
            reason,
            handle: Some(handle),
            attempts: attempts + 1,
        });
    }

    /// 청산 주문이 체결 없이 끝났습니다. 시도 횟수를 반환합니다.
    pub fn close_failed(&mut self, handle: OrderHandle) -> Option<u32> {
        let closing = self.closing.as_mut()?;
        if closing.handle != Some(handle) {
            return None;
        }
        closing.handle = None;
        Some(closing.attempts)
    }

    /// 청산 주문이 끝났지만 잔량이 남았습니다. 다음 틱에 잔량을 다시 청산합니다.
    pub fn close_left_remainder(&mut self, handle: OrderHandle) {
        if let Some(closing) = self.closing.as_mut() {
            if closing.handle == Some(handle) {
                closing.handle = None;
            }
        }
    }

    /// 청산을 포기합니다 (수동 개입 대기).
    pub fn abandon_close(&mut self) {
        self.closing = None;
    }

    /// 바스켓이 플랫이 되었을 때 사이클을 마감합니다.
    ///
    /// 손실 여부를 이력에 기록하고 단계와 사이클 상태를 초기화합니다.
    pub fn finish_cycle(&mut self) -> CycleResult {
        let result = CycleResult {
            steps: self.step_index,
            realized_pnl: self.cycle_pnl,
            loss: self.cycle_pnl < Decimal::ZERO,
        };
        self.loss_history.record(result.loss);

        self.step_index = 0;
        self.last_entry_price = None;
        self.last_entry_time = None;
        self.cycle_base_volume = None;
        self.cycle_pnl = Decimal::ZERO;
        self.cycles += 1;
        self.pending_entry = None;
        self.closing = None;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::PositionSide;

    fn basket() -> Basket {
        Basket::new(
            BasketKey::new("EURUSD", PositionSide::Long),
            LossHistory::with_capacity(10),
        )
    }

    #[test]
    fn test_step_increments_only_on_fill() {
        let mut basket = basket();
        basket.entry_submitted(OrderHandle::new(1), dec!(0.1));
        assert_eq!(basket.step_index(), 0);
        assert!(!basket.is_idle());

        basket.entry_filled(dec!(1.1), Utc::now());
        assert_eq!(basket.step_index(), 1);
        assert!(!basket.is_idle());
        basket.entry_finished(OrderHandle::new(1));
        assert!(basket.is_idle());
        assert_eq!(basket.cycle_base_volume(), Some(dec!(0.1)));
    }

    #[test]
    fn test_failed_entry_keeps_step() {
        let mut basket = basket();
        basket.entry_submitted(OrderHandle::new(1), dec!(0.1));
        basket.entry_finished(OrderHandle::new(1));
        assert!(basket.is_flat());
        assert!(basket.pending_entry().is_none());
    }

    #[test]
    fn test_finish_cycle_records_loss() {
        let mut basket = basket();
        basket.entry_filled(dec!(1.1), Utc::now());
        basket.add_realized(dec!(-12.5));

        let result = basket.finish_cycle();
        assert_eq!(result.steps, 1);
        assert!(result.loss);
        assert!(basket.is_flat());
        assert_eq!(basket.cycles(), 1);
        assert_eq!(basket.loss_history().recent_losses(5), 1);
        assert_eq!(basket.cycle_pnl(), Decimal::ZERO);
    }

    #[test]
    fn test_close_attempts_accumulate() {
        let mut basket = basket();
        basket.entry_filled(dec!(1.1), Utc::now());
        basket.begin_close(CloseReason::EquityStop, OrderHandle::new(2));
        assert_eq!(basket.close_failed(OrderHandle::new(2)), Some(1));
        basket.begin_close(CloseReason::EquityStop, OrderHandle::new(3));
        assert_eq!(basket.close_failed(OrderHandle::new(99)), None);
        assert_eq!(basket.close_failed(OrderHandle::new(3)), Some(2));
    }

    #[test]
    fn test_close_remainder_keeps_reason() {
        let mut basket = basket();
        basket.entry_filled(dec!(1.1), Utc::now());
        basket.begin_close(CloseReason::ProfitTarget, OrderHandle::new(4));

        // 다른 주문 핸들은 무시
        basket.close_left_remainder(OrderHandle::new(5));
        assert_eq!(basket.closing().unwrap().handle, Some(OrderHandle::new(4)));

        basket.close_left_remainder(OrderHandle::new(4));
        let closing = basket.closing().unwrap();
        assert_eq!(closing.handle, None);
        assert_eq!(closing.reason, CloseReason::ProfitTarget);
        assert_eq!(closing.attempts, 1);
    }
}
