//! 포지션 로트.
//!
//! 그리드 레벨 하나의 체결은 하나의 `PositionLot`이 됩니다.
//! 로트의 가격, 방향, 진입 시각은 변하지 않으며 수량만 감소할 수 있습니다.

use crate::domain::order::PositionSide;
use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 단일 체결로 생긴 포지션 묶음.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLot {
    price: Price,
    volume: Quantity,
    side: PositionSide,
    opened_at: DateTime<Utc>,
}

impl PositionLot {
    /// 새 로트를 생성합니다.
    pub fn new(price: Price, volume: Quantity, side: PositionSide, opened_at: DateTime<Utc>) -> Self {
        Self {
            price,
            volume: volume.max(Decimal::ZERO),
            side,
            opened_at,
        }
    }

    /// 진입 가격.
    pub fn price(&self) -> Price {
        self.price
    }

    /// 남은 수량.
    pub fn volume(&self) -> Quantity {
        self.volume
    }

    /// 방향.
    pub fn side(&self) -> PositionSide {
        self.side
    }

    /// 진입 시각.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// 진입 명목 가치 (가격 × 수량).
    pub fn notional(&self) -> Decimal {
        self.price * self.volume
    }

    /// 수량이 모두 소진되었는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.volume.is_zero()
    }

    /// 수량을 최대 `quantity`만큼 줄이고 실제로 줄인 수량을 반환합니다.
    pub fn reduce(&mut self, quantity: Quantity) -> Quantity {
        let consumed = quantity.max(Decimal::ZERO).min(self.volume);
        self.volume -= consumed;
        consumed
    }

    /// 같은 가격/방향/시각으로 `volume`만큼 떼어낸 로트를 만듭니다.
    pub fn split_off(&self, volume: Quantity) -> Self {
        Self::new(self.price, volume.min(self.volume), self.side, self.opened_at)
    }
}

/// 로트들의 수량 가중 평균 가격. 로트가 없으면 `None`.
pub fn weighted_average_price<'a, I>(lots: I) -> Option<Price>
where
    I: IntoIterator<Item = &'a PositionLot>,
{
    let (notional, volume) = lots
        .into_iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(n, v), lot| {
            (n + lot.notional(), v + lot.volume())
        });

    if volume.is_zero() {
        None
    } else {
        Some(notional / volume)
    }
}
