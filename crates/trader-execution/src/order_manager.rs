//! 주문 상태 관리.
//!
//! 제공 기능:
//! - 엔진이 발급한 모든 주문의 생명주기 추적 (핸들 → 주문 기록)
//! - 부분 체결 누적 및 최종 상태 판정
//! - 거래소에 걸어 두는 보호 주문(손절/익절)의 교체 상태 머신
//!
//! 보호 주문 교체는 항상 "기존 주문 취소 확인 → 새 주문 제출" 순서로
//! 진행되며, 교체는 `Active` 상태에서만 시작됩니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use trader_core::{
    FillEvent, OrderCommand, OrderHandle, OrderIntent, OrderKind, OrderPurpose, OrderStatusType,
    OrderUpdate, Price, Quantity, TraderError, TraderResult,
};
use trader_risk::BasketKey;

/// 보호 주문 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectiveLeg {
    /// 손절 (역지정가)
    Stop,
    /// 익절 (지정가)
    Take,
}

impl ProtectiveLeg {
    fn order_kind(&self) -> OrderKind {
        match self {
            ProtectiveLeg::Stop => OrderKind::Stop,
            ProtectiveLeg::Take => OrderKind::Limit,
        }
    }

    fn purpose(&self) -> OrderPurpose {
        match self {
            ProtectiveLeg::Stop => OrderPurpose::ProtectiveStop,
            ProtectiveLeg::Take => OrderPurpose::ProtectiveTake,
        }
    }
}

/// 보호 주문의 목표 (가격과 수량).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectiveTarget {
    /// 주문 가격
    pub price: Price,
    /// 주문 수량
    pub volume: Quantity,
}

/// 보호 주문 슬롯 상태.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SlotState {
    /// 주문 없음
    #[default]
    Idle,
    /// 제출됨, 거래소 확인 대기
    Pending {
        /// 주문 핸들
        handle: OrderHandle,
        /// 주문 목표
        target: ProtectiveTarget,
    },
    /// 거래소에 걸려 있음
    Active {
        /// 주문 핸들
        handle: OrderHandle,
        /// 주문 목표
        target: ProtectiveTarget,
    },
    /// 교체를 위해 기존 주문 취소 대기
    Replacing {
        /// 취소 중인 기존 주문
        handle: OrderHandle,
    },
    /// 더 이상 보호 주문이 필요 없음
    Canceled,
}

/// 슬롯이 요구하는 거래소 작업.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAction {
    /// 작업 없음
    None,
    /// 새 주문 제출
    Submit(ProtectiveTarget),
    /// 기존 주문 취소
    Cancel(OrderHandle),
}

/// 보호 주문 하나의 교체 상태 머신.
///
/// `Pending → Active → Replacing → Active | Canceled`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSlot {
    state: SlotState,
    desired: Option<ProtectiveTarget>,
}

impl OrderSlot {
    /// 현재 상태.
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// 원하는 목표.
    pub fn desired(&self) -> Option<ProtectiveTarget> {
        self.desired
    }

    /// 현재 슬롯이 추적하는 주문 핸들.
    pub fn handle(&self) -> Option<OrderHandle> {
        match self.state {
            SlotState::Pending { handle, .. }
            | SlotState::Active { handle, .. }
            | SlotState::Replacing { handle } => Some(handle),
            SlotState::Idle | SlotState::Canceled => None,
        }
    }

    /// 원하는 목표를 설정하고 필요한 작업을 반환합니다.
    ///
    /// `None`은 보호 주문이 더 이상 필요 없음을 뜻합니다.
    pub fn request(&mut self, desired: Option<ProtectiveTarget>) -> SlotAction {
        self.desired = desired;
        match (self.state, desired) {
            (SlotState::Idle | SlotState::Canceled, Some(target)) => SlotAction::Submit(target),
            (SlotState::Idle | SlotState::Canceled, None) => SlotAction::None,
            (SlotState::Active { handle, target }, Some(wanted)) if wanted != target => {
                self.state = SlotState::Replacing { handle };
                SlotAction::Cancel(handle)
            }
            (SlotState::Active { .. }, Some(_)) => SlotAction::None,
            (SlotState::Active { handle, .. } | SlotState::Pending { handle, .. }, None) => {
                self.state = SlotState::Canceled;
                SlotAction::Cancel(handle)
            }
            // 거래소 확인 전에는 교체하지 않음
            (SlotState::Pending { .. }, Some(_)) => SlotAction::None,
            (SlotState::Replacing { .. }, _) => SlotAction::None,
        }
    }

    /// 제출한 주문을 기록합니다 (`→ Pending`).
    pub fn submitted(&mut self, handle: OrderHandle, target: ProtectiveTarget) {
        self.state = SlotState::Pending { handle, target };
    }

    /// 주문 상태 통지를 반영합니다.
    ///
    /// 교체 중인 주문이 취소 대신 체결되면 `StaleProtectiveOrder`를 반환하며,
    /// 호출자는 원장 기준으로 보호 가격을 다시 계산해야 합니다.
    pub fn on_status(&mut self, handle: OrderHandle, status: OrderStatusType) -> TraderResult<SlotAction> {
        if self.handle() != Some(handle) {
            return Ok(SlotAction::None);
        }

        match (self.state, status) {
            (SlotState::Pending { target, .. }, OrderStatusType::Open | OrderStatusType::PartiallyFilled) => {
                self.state = SlotState::Active { handle, target };
                let desired = self.desired;
                Ok(self.request(desired))
            }
            (SlotState::Pending { .. } | SlotState::Active { .. }, OrderStatusType::Filled) => {
                self.state = SlotState::Idle;
                self.desired = None;
                Ok(SlotAction::None)
            }
            (SlotState::Pending { .. } | SlotState::Active { .. }, s) if s.is_final() => {
                // 거부/취소/만료: 다음 틱에 다시 요청
                self.state = SlotState::Idle;
                Ok(SlotAction::None)
            }
            (SlotState::Replacing { .. }, OrderStatusType::Filled) => {
                self.state = SlotState::Idle;
                self.desired = None;
                Err(TraderError::StaleProtectiveOrder(format!(
                    "{} filled while being replaced",
                    handle
                )))
            }
            (SlotState::Replacing { .. }, s) if s.is_final() => {
                self.state = SlotState::Idle;
                Ok(match self.desired {
                    Some(target) => SlotAction::Submit(target),
                    None => SlotAction::None,
                })
            }
            _ => Ok(SlotAction::None),
        }
    }
}

/// 엔진이 발급한 주문 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// 주문 의도
    pub intent: OrderIntent,
    /// 현재 상태
    pub status: OrderStatusType,
    /// 누적 체결 수량
    pub filled_volume: Quantity,
    /// 제출 시각
    pub submitted_at: DateTime<Utc>,
    /// 마지막 갱신 시각
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    /// 남은 수량.
    pub fn remaining_volume(&self) -> Quantity {
        (self.intent.volume - self.filled_volume).max(Decimal::ZERO)
    }
}

/// 주문 통계.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStats {
    /// 전체 주문 수
    pub total: usize,
    /// 활성 주문 수
    pub active: usize,
    /// 체결 완료 수
    pub filled: usize,
    /// 취소 수
    pub cancelled: usize,
    /// 거부 수
    pub rejected: usize,
}

impl OrderStats {
    fn count(&mut self, status: OrderStatusType) {
        self.total += 1;
        match status {
            OrderStatusType::Filled => self.filled += 1,
            OrderStatusType::Cancelled => self.cancelled += 1,
            OrderStatusType::Rejected => self.rejected += 1,
            s if s.is_active() => self.active += 1,
            _ => {}
        }
    }
}

/// 주문 관리자.
#[derive(Debug, Default)]
pub struct OrderManager {
    orders: HashMap<OrderHandle, OrderRecord>,
    slots: HashMap<(BasketKey, ProtectiveLeg), OrderSlot>,
    slot_by_handle: HashMap<OrderHandle, (BasketKey, ProtectiveLeg)>,
    /// 정리된 주문의 누적 통계
    archived: OrderStats,
    next_handle: u64,
}

impl OrderManager {
    /// 새 주문 관리자를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 주문 핸들을 발급합니다.
    pub fn next_handle(&mut self) -> OrderHandle {
        self.next_handle += 1;
        OrderHandle::new(self.next_handle)
    }

    /// 제출한 주문을 기록합니다.
    pub fn track(&mut self, intent: OrderIntent, time: DateTime<Utc>) {
        debug!(handle = %intent.handle, kind = %intent.kind, side = %intent.side, volume = %intent.volume, "Order tracked");
        self.orders.insert(
            intent.handle,
            OrderRecord {
                intent,
                status: OrderStatusType::Pending,
                filled_volume: Decimal::ZERO,
                submitted_at: time,
                updated_at: time,
            },
        );
    }

    /// 주문 기록을 조회합니다.
    pub fn get(&self, handle: OrderHandle) -> Option<&OrderRecord> {
        self.orders.get(&handle)
    }

    /// 활성 주문 목록.
    pub fn active_orders(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.values().filter(|r| r.status.is_active())
    }

    /// 현재 들고 있는 주문 기록 수.
    pub fn tracked(&self) -> usize {
        self.orders.len()
    }

    /// 바스켓을 줄이는 시장가 주문 중 아직 체결되지 않은 수량.
    ///
    /// 거래소에 걸린 보호 주문은 조건부이므로 포함하지 않습니다.
    pub fn pending_exit_volume(&self, key: &BasketKey) -> Quantity {
        self.active_orders()
            .filter(|r| r.intent.symbol == key.group && r.intent.basket_side == key.side)
            .filter(|r| {
                matches!(
                    r.intent.purpose,
                    OrderPurpose::PartialExit { .. }
                        | OrderPurpose::BasketClose { .. }
                        | OrderPurpose::ExcessFlatten
                )
            })
            .map(OrderRecord::remaining_volume)
            .sum()
    }

    /// 바스켓의 끝난 주문 기록을 정리합니다. 정리된 주문도 통계에는 남습니다.
    ///
    /// 보호 주문 슬롯이 아직 추적 중인 핸들은 남겨 둡니다.
    pub fn prune_finished(&mut self, key: &BasketKey) -> usize {
        let finished: Vec<OrderHandle> = self
            .orders
            .values()
            .filter(|r| r.status.is_final())
            .filter(|r| r.intent.symbol == key.group && r.intent.basket_side == key.side)
            .filter(|r| !self.slot_by_handle.contains_key(&r.intent.handle))
            .map(|r| r.intent.handle)
            .collect();

        for handle in &finished {
            if let Some(record) = self.orders.remove(handle) {
                self.archived.count(record.status);
            }
        }
        if !finished.is_empty() {
            debug!(basket = %key, pruned = finished.len(), "Finished orders pruned");
        }
        finished.len()
    }

    /// 체결을 반영하고 해당 주문 기록을 반환합니다.
    ///
    /// 알 수 없는 핸들의 체결은 `None`을 반환합니다.
    pub fn record_fill(&mut self, fill: &FillEvent) -> Option<&OrderRecord> {
        let record = self.orders.get_mut(&fill.handle)?;
        record.filled_volume += fill.volume;
        record.updated_at = fill.time;
        record.status = if record.filled_volume >= record.intent.volume {
            OrderStatusType::Filled
        } else {
            OrderStatusType::PartiallyFilled
        };
        Some(&*record)
    }

    /// 주문 상태 통지를 반영합니다.
    ///
    /// 보호 주문 슬롯이 교체를 이어가야 하면 새 명령을 반환합니다.
    pub fn on_update(&mut self, update: &OrderUpdate) -> TraderResult<Vec<OrderCommand>> {
        match self.orders.get_mut(&update.handle) {
            Some(record) => {
                if record.status.is_final() && update.status != record.status {
                    debug!(handle = %update.handle, status = ?update.status, "Ignoring update for finished order");
                } else {
                    record.status = update.status;
                    record.updated_at = update.time;
                }
            }
            None => {
                warn!(handle = %update.handle, "Update for unknown order");
                return Ok(Vec::new());
            }
        }

        let Some(slot_key) = self.slot_by_handle.get(&update.handle).cloned() else {
            return Ok(Vec::new());
        };
        if update.status.is_final() {
            self.slot_by_handle.remove(&update.handle);
        }

        let action = match self.slots.get_mut(&slot_key) {
            Some(slot) => slot.on_status(update.handle, update.status)?,
            None => SlotAction::None,
        };
        Ok(self.apply_action(&slot_key, action, update.time))
    }

    /// 보호 주문을 원하는 목표로 맞춥니다.
    pub fn sync_protective(
        &mut self,
        key: &BasketKey,
        leg: ProtectiveLeg,
        desired: Option<ProtectiveTarget>,
        time: DateTime<Utc>,
    ) -> Vec<OrderCommand> {
        let slot_key = (key.clone(), leg);
        let action = self.slots.entry(slot_key.clone()).or_default().request(desired);
        self.apply_action(&slot_key, action, time)
    }

    /// 보호 주문 슬롯 상태.
    pub fn slot(&self, key: &BasketKey, leg: ProtectiveLeg) -> Option<&OrderSlot> {
        self.slots.get(&(key.clone(), leg))
    }

    /// 바스켓의 보호 주문을 모두 취소합니다.
    pub fn cancel_protective(&mut self, key: &BasketKey, time: DateTime<Utc>) -> Vec<OrderCommand> {
        let mut commands = self.sync_protective(key, ProtectiveLeg::Stop, None, time);
        commands.extend(self.sync_protective(key, ProtectiveLeg::Take, None, time));
        commands
    }

    /// 바스켓의 보호 주문 핸들인지 확인합니다.
    pub fn is_protective(&self, handle: OrderHandle) -> bool {
        self.slot_by_handle.contains_key(&handle)
    }

    /// 주문 통계.
    pub fn stats(&self) -> OrderStats {
        let mut stats = self.archived.clone();
        for record in self.orders.values() {
            stats.count(record.status);
        }
        stats
    }

    fn apply_action(
        &mut self,
        slot_key: &(BasketKey, ProtectiveLeg),
        action: SlotAction,
        time: DateTime<Utc>,
    ) -> Vec<OrderCommand> {
        let (key, leg) = slot_key;
        match action {
            SlotAction::None => Vec::new(),
            SlotAction::Cancel(handle) => {
                debug!(basket = %key, leg = ?leg, handle = %handle, "Cancelling protective order");
                vec![OrderCommand::Cancel {
                    handle,
                    symbol: key.group.clone(),
                }]
            }
            SlotAction::Submit(target) => {
                let handle = self.next_handle();
                let intent = OrderIntent::resting(
                    handle,
                    key.group.clone(),
                    leg.order_kind(),
                    key.side.exit_side(),
                    target.volume,
                    target.price,
                    key.side,
                    leg.purpose(),
                );
                if let Some(slot) = self.slots.get_mut(slot_key) {
                    slot.submitted(handle, target);
                }
                self.slot_by_handle.insert(handle, slot_key.clone());
                self.track(intent.clone(), time);
                debug!(basket = %key, leg = ?leg, handle = %handle, price = %target.price, "Submitting protective order");
                vec![OrderCommand::Submit(intent)]
            }
        }
    }
}
