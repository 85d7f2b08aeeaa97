//! 포지션 원장.
//!
//! 제공 기능:
//! - 종목/방향별 열린 로트 보관
//! - 체결 시 반대 방향 로트를 FIFO로 상계하고 남은 수량으로 새 로트 생성
//! - 가중 평균 진입가, 총 수량, 플랫 여부 조회
//!
//! 원장의 총 수량은 절대 음수가 되지 않으며, 수량이 0이 된 로트는 즉시 제거됩니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use trader_core::{weighted_average_price, InstrumentMeta, PositionLot, PositionSide, Price, Quantity, Side};

/// 상계로 닫힌 로트 조각.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedLot {
    /// 종목
    pub symbol: String,
    /// 닫힌 로트의 방향
    pub side: PositionSide,
    /// 진입 가격
    pub entry_price: Price,
    /// 청산 가격
    pub exit_price: Price,
    /// 닫힌 수량
    pub volume: Quantity,
    /// 진입 시각
    pub opened_at: DateTime<Utc>,
    /// 청산 시각
    pub closed_at: DateTime<Utc>,
}

impl ClosedLot {
    /// 실현 손익.
    pub fn pnl(&self, meta: &InstrumentMeta) -> Decimal {
        meta.pnl(self.side, self.entry_price, self.exit_price, self.volume)
    }
}

/// 체결 반영 결과.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillOutcome {
    /// 상계로 닫힌 로트들 (오래된 순)
    pub closed: Vec<ClosedLot>,
    /// 남은 수량으로 새로 열린 로트
    pub opened: Option<PositionLot>,
}

impl FillOutcome {
    /// 닫힌 총 수량.
    pub fn closed_volume(&self) -> Quantity {
        self.closed.iter().map(|c| c.volume).sum()
    }
}

/// 종목 하나의 양방향 로트.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InstrumentBook {
    long: Vec<PositionLot>,
    short: Vec<PositionLot>,
}

impl InstrumentBook {
    fn lots(&self, side: PositionSide) -> &[PositionLot] {
        match side {
            PositionSide::Long => &self.long,
            PositionSide::Short => &self.short,
        }
    }

    fn lots_mut(&mut self, side: PositionSide) -> &mut Vec<PositionLot> {
        match side {
            PositionSide::Long => &mut self.long,
            PositionSide::Short => &mut self.short,
        }
    }

    fn is_empty(&self) -> bool {
        self.long.is_empty() && self.short.is_empty()
    }
}

/// 종목별 FIFO 상계 원장.
#[derive(Debug, Default)]
pub struct PositionLedger {
    books: HashMap<String, InstrumentBook>,
}

impl PositionLedger {
    /// 빈 원장을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 체결을 반영합니다.
    ///
    /// 반대 방향 로트가 있으면 가장 오래된 로트부터 상계하고,
    /// 남은 수량은 체결 방향의 새 로트가 됩니다.
    pub fn record_fill(
        &mut self,
        symbol: &str,
        side: Side,
        price: Price,
        volume: Quantity,
        time: DateTime<Utc>,
    ) -> FillOutcome {
        let mut outcome = FillOutcome::default();
        if volume <= Decimal::ZERO {
            return outcome;
        }

        let book = self.books.entry(symbol.to_string()).or_default();
        let opposite = side.position_side().opposite();
        let mut remaining = volume;

        let lots = book.lots_mut(opposite);
        for lot in lots.iter_mut() {
            if remaining.is_zero() {
                break;
            }
            let consumed = lot.reduce(remaining);
            remaining -= consumed;
            outcome.closed.push(ClosedLot {
                symbol: symbol.to_string(),
                side: opposite,
                entry_price: lot.price(),
                exit_price: price,
                volume: consumed,
                opened_at: lot.opened_at(),
                closed_at: time,
            });
        }
        lots.retain(|lot| !lot.is_empty());

        if remaining > Decimal::ZERO {
            let lot = PositionLot::new(price, remaining, side.position_side(), time);
            book.lots_mut(side.position_side()).push(lot.clone());
            outcome.opened = Some(lot);
        }

        if book.is_empty() {
            self.books.remove(symbol);
        }

        debug!(
            symbol,
            side = %side,
            price = %price,
            volume = %volume,
            closed = %outcome.closed_volume(),
            opened = ?outcome.opened.as_ref().map(|l| l.volume()),
            "Fill recorded in ledger"
        );
        outcome
    }

    /// 열린 로트 (오래된 순).
    pub fn lots(&self, symbol: &str, side: PositionSide) -> &[PositionLot] {
        self.books.get(symbol).map(|b| b.lots(side)).unwrap_or(&[])
    }

    /// 가중 평균 진입가. 수량이 없으면 `None`.
    pub fn weighted_average_price(&self, symbol: &str, side: PositionSide) -> Option<Price> {
        weighted_average_price(self.lots(symbol, side))
    }

    /// 총 수량.
    pub fn total_volume(&self, symbol: &str, side: PositionSide) -> Quantity {
        self.lots(symbol, side).iter().map(|l| l.volume()).sum()
    }

    /// 플랫 여부.
    pub fn is_flat(&self, symbol: &str, side: PositionSide) -> bool {
        self.lots(symbol, side).is_empty()
    }

    /// 열린 로트가 있는 종목.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.books.keys().map(String::as_str)
    }
}
