//! 주문 의도 및 주문 생명주기 이벤트.
//!
//! 엔진은 거래소에 직접 주문하지 않고 `OrderCommand`를 내보냅니다.
//! 거래소 측 결과는 `FillEvent`와 `OrderUpdate`로 되돌아옵니다.

use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 주문 방향 (매수 또는 매도).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl Side {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// 이 방향의 체결이 늘리는 포지션 방향.
    pub fn position_side(&self) -> PositionSide {
        match self {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 포지션(바스켓) 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    /// 롱
    Long,
    /// 숏
    Short,
}

impl PositionSide {
    /// 양쪽 방향 (순회용).
    pub const BOTH: [PositionSide; 2] = [PositionSide::Long, PositionSide::Short];

    /// 손익 부호 (롱 = +1, 숏 = -1).
    pub fn sign(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// 포지션을 여는 주문 방향.
    pub fn entry_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Buy,
            PositionSide::Short => Side::Sell,
        }
    }

    /// 포지션을 닫는 주문 방향.
    pub fn exit_side(&self) -> Side {
        self.entry_side().opposite()
    }

    /// 기준 가격에서 유리한 방향으로 `distance`만큼 떨어진 가격.
    pub fn favorable(&self, base: Price, distance: Decimal) -> Price {
        base + self.sign() * distance
    }

    /// 기준 가격에서 불리한 방향으로 `distance`만큼 떨어진 가격.
    pub fn adverse(&self, base: Price, distance: Decimal) -> Price {
        base - self.sign() * distance
    }

    /// `candidate`가 `current`보다 이 방향에서 엄격하게 유리한지 확인합니다.
    pub fn is_better(&self, candidate: Price, current: Price) -> bool {
        match self {
            PositionSide::Long => candidate > current,
            PositionSide::Short => candidate < current,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// 엔진이 발급하는 주문 핸들.
///
/// 리플레이 결정성을 위해 단조 증가 카운터로 발급됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderHandle(u64);

impl OrderHandle {
    /// 새 핸들을 생성합니다.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// 내부 ID.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OrderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ORD-{:06}", self.0)
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// 시장가
    Market,
    /// 역지정가 (손절)
    Stop,
    /// 지정가 (익절)
    Limit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::Stop => write!(f, "STOP"),
            OrderKind::Limit => write!(f, "LIMIT"),
        }
    }
}

/// 바스켓 청산 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// 손절가 도달
    StopHit,
    /// 익절가 도달
    TakeHit,
    /// 바스켓 목표 수익 도달
    ProfitTarget,
    /// 바스켓 손실 한도 도달
    LossLimit,
    /// 자산 낙폭 긴급 정지
    EquityStop,
    /// 세션 종료/블랙아웃 강제 청산
    ForceFlatten,
}

impl CloseReason {
    /// 긴급 청산 여부 (거부 시 즉시 재시도 대상).
    pub fn is_emergency(&self) -> bool {
        matches!(self, CloseReason::EquityStop | CloseReason::ForceFlatten)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CloseReason::StopHit => "stop_hit",
            CloseReason::TakeHit => "take_hit",
            CloseReason::ProfitTarget => "profit_target",
            CloseReason::LossLimit => "loss_limit",
            CloseReason::EquityStop => "equity_stop",
            CloseReason::ForceFlatten => "force_flatten",
        };
        write!(f, "{}", name)
    }
}

/// 주문 의도의 목적.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "purpose")]
pub enum OrderPurpose {
    /// 그리드 레벨 진입
    GridEntry {
        /// 진입하려는 그리드 단계
        step: u32,
    },
    /// 거래소에 걸어 두는 손절 주문
    ProtectiveStop,
    /// 거래소에 걸어 두는 익절 주문
    ProtectiveTake,
    /// 단계별 부분 청산
    PartialExit {
        /// 부분 청산 단계 (1부터)
        tier: u8,
    },
    /// 바스켓 전체 청산
    BasketClose {
        /// 청산 사유
        reason: CloseReason,
    },
    /// 청산 주문이 초과 체결되어 생긴 반대 방향 로트 정리
    ExcessFlatten,
}

impl OrderPurpose {
    /// 포지션을 줄이는 주문인지 확인합니다.
    pub fn is_reducing(&self) -> bool {
        !matches!(self, OrderPurpose::GridEntry { .. })
    }
}

/// 엔진이 내보내는 주문 의도.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// 주문 핸들
    pub handle: OrderHandle,
    /// 종목
    pub symbol: String,
    /// 주문 유형
    pub kind: OrderKind,
    /// 주문 방향
    pub side: Side,
    /// 주문 수량
    pub volume: Quantity,
    /// 가격 (역지정가/지정가 주문용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    /// 대상 바스켓 방향
    pub basket_side: PositionSide,
    /// 주문 목적
    pub purpose: OrderPurpose,
}

impl OrderIntent {
    /// 시장가 주문 의도를 생성합니다.
    pub fn market(
        handle: OrderHandle,
        symbol: impl Into<String>,
        side: Side,
        volume: Quantity,
        basket_side: PositionSide,
        purpose: OrderPurpose,
    ) -> Self {
        Self {
            handle,
            symbol: symbol.into(),
            kind: OrderKind::Market,
            side,
            volume,
            price: None,
            basket_side,
            purpose,
        }
    }

    /// 가격이 있는 대기 주문 의도를 생성합니다.
    #[allow(clippy::too_many_arguments)]
    pub fn resting(
        handle: OrderHandle,
        symbol: impl Into<String>,
        kind: OrderKind,
        side: Side,
        volume: Quantity,
        price: Price,
        basket_side: PositionSide,
        purpose: OrderPurpose,
    ) -> Self {
        Self {
            handle,
            symbol: symbol.into(),
            kind,
            side,
            volume,
            price: Some(price),
            basket_side,
            purpose,
        }
    }
}

/// 거래소로 전달할 명령.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum OrderCommand {
    /// 주문 제출
    Submit(OrderIntent),
    /// 주문 취소 (이미 종료된 주문에 대한 취소는 no-op)
    Cancel {
        /// 취소할 주문
        handle: OrderHandle,
        /// 종목
        symbol: String,
    },
}

impl OrderCommand {
    /// 명령 대상 핸들.
    pub fn handle(&self) -> OrderHandle {
        match self {
            OrderCommand::Submit(intent) => intent.handle,
            OrderCommand::Cancel { handle, .. } => *handle,
        }
    }
}

/// 주문 상태 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    /// 생성됨 (거래소 확인 전)
    Pending,
    /// 거래소에 접수됨
    Open,
    /// 부분 체결됨
    PartiallyFilled,
    /// 전량 체결됨
    Filled,
    /// 취소됨
    Cancelled,
    /// 거부됨
    Rejected,
    /// 만료됨
    Expired,
}

impl OrderStatusType {
    /// 주문이 최종 상태인지 확인합니다.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatusType::Filled
                | OrderStatusType::Cancelled
                | OrderStatusType::Rejected
                | OrderStatusType::Expired
        )
    }

    /// 주문이 여전히 활성 상태인지 확인합니다.
    pub fn is_active(&self) -> bool {
        !self.is_final()
    }
}

/// 체결 통지.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    /// 체결된 주문 핸들
    pub handle: OrderHandle,
    /// 종목
    pub symbol: String,
    /// 체결 가격
    pub price: Price,
    /// 체결 수량
    pub volume: Quantity,
    /// 체결 방향
    pub side: Side,
    /// 체결 시각
    pub time: DateTime<Utc>,
}

/// 주문 상태 변경 통지.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// 대상 주문 핸들
    pub handle: OrderHandle,
    /// 새 상태
    pub status: OrderStatusType,
    /// 사유 (거부 등)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// 통지 시각
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(PositionSide::Long.exit_side(), Side::Sell);
        assert_eq!(PositionSide::Short.entry_side(), Side::Sell);
        assert_eq!(Side::Sell.position_side(), PositionSide::Short);
    }

    #[test]
    fn test_position_side_price_helpers() {
        assert_eq!(PositionSide::Long.favorable(dec!(1.1000), dec!(0.0010)), dec!(1.1010));
        assert_eq!(PositionSide::Short.favorable(dec!(1.1000), dec!(0.0010)), dec!(1.0990));
        assert_eq!(PositionSide::Long.adverse(dec!(1.1000), dec!(0.0020)), dec!(1.0980));
        assert!(PositionSide::Long.is_better(dec!(1.2), dec!(1.1)));
        assert!(PositionSide::Short.is_better(dec!(1.0), dec!(1.1)));
        assert!(!PositionSide::Short.is_better(dec!(1.1), dec!(1.1)));
    }

    #[test]
    fn test_close_reason_emergency() {
        assert!(CloseReason::EquityStop.is_emergency());
        assert!(CloseReason::ForceFlatten.is_emergency());
        assert!(!CloseReason::ProfitTarget.is_emergency());
    }

    #[test]
    fn test_order_command_serialization() {
        let intent = OrderIntent::market(
            OrderHandle::new(3),
            "EURUSD",
            Side::Buy,
            dec!(0.1),
            PositionSide::Long,
            OrderPurpose::GridEntry { step: 0 },
        );
        let json = serde_json::to_string(&OrderCommand::Submit(intent.clone())).unwrap();
        let back: OrderCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderCommand::Submit(intent));
        assert_eq!(OrderHandle::new(3).to_string(), "ORD-000003");
    }
}
