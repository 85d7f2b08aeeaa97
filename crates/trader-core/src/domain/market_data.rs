//! 시장 데이터 타입.
//!
//! 엔진은 두 종류의 가격 입력을 받습니다:
//! - `Candle` - 완성된 OHLC 캔들 (봉 단위 평가)
//! - `Quote` - 매수/매도 호가 스냅샷 (틱 단위 평가)

use crate::domain::order::PositionSide;
use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLC 캔들 데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 종료 시각
    pub time: DateTime<Utc>,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량
    #[serde(default)]
    pub volume: Quantity,
}

impl Candle {
    /// 새 캔들을 생성합니다.
    pub fn new(time: DateTime<Utc>, open: Price, high: Price, low: Price, close: Price) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume: Decimal::ZERO,
        }
    }

    /// 캔들 범위 (고가 - 저가).
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// 호가 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// 호가 시각
    pub time: DateTime<Utc>,
    /// 매수 호가
    pub bid: Price,
    /// 매도 호가
    pub ask: Price,
}

impl Quote {
    /// 새 호가를 생성합니다.
    pub fn new(time: DateTime<Utc>, bid: Price, ask: Price) -> Self {
        Self { time, bid, ask }
    }

    /// 중간 가격.
    pub fn mid(&self) -> Price {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// 스프레드.
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// 시장 데이터 페이로드.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketData {
    /// 캔들
    Candle(Candle),
    /// 호가
    Quote(Quote),
}

/// 종목별 시장 데이터 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    /// 종목
    pub symbol: String,
    /// 데이터
    pub data: MarketData,
}

impl MarketEvent {
    /// 캔들 이벤트를 생성합니다.
    pub fn candle(symbol: impl Into<String>, candle: Candle) -> Self {
        Self {
            symbol: symbol.into(),
            data: MarketData::Candle(candle),
        }
    }

    /// 호가 이벤트를 생성합니다.
    pub fn quote(symbol: impl Into<String>, quote: Quote) -> Self {
        Self {
            symbol: symbol.into(),
            data: MarketData::Quote(quote),
        }
    }

    /// 이벤트 시각.
    pub fn time(&self) -> DateTime<Utc> {
        match &self.data {
            MarketData::Candle(c) => c.time,
            MarketData::Quote(q) => q.time,
        }
    }

    /// 주어진 방향의 포지션을 청산할 때 적용되는 현재 가격.
    ///
    /// 호가에서는 롱은 bid, 숏은 ask로 청산됩니다. 캔들은 종가를 사용합니다.
    pub fn exit_price(&self, side: PositionSide) -> Price {
        match &self.data {
            MarketData::Candle(c) => c.close,
            MarketData::Quote(q) => match side {
                PositionSide::Long => q.bid,
                PositionSide::Short => q.ask,
            },
        }
    }

    /// 주어진 방향의 포지션에 진입할 때 적용되는 현재 가격.
    pub fn entry_price(&self, side: PositionSide) -> Price {
        match &self.data {
            MarketData::Candle(c) => c.close,
            MarketData::Quote(q) => match side {
                PositionSide::Long => q.ask,
                PositionSide::Short => q.bid,
            },
        }
    }

    /// 보호 가격 교차 판정에 사용하는 (저가, 고가) 범위.
    ///
    /// 캔들은 봉 전체 범위를, 호가는 청산 측 가격 한 점을 사용합니다.
    pub fn exit_range(&self, side: PositionSide) -> (Price, Price) {
        match &self.data {
            MarketData::Candle(c) => (c.low, c.high),
            MarketData::Quote(_) => {
                let price = self.exit_price(side);
                (price, price)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_prices_by_side() {
        let event = MarketEvent::quote("EURUSD", Quote::new(Utc::now(), dec!(1.1000), dec!(1.1002)));
        assert_eq!(event.exit_price(PositionSide::Long), dec!(1.1000));
        assert_eq!(event.exit_price(PositionSide::Short), dec!(1.1002));
        assert_eq!(event.entry_price(PositionSide::Long), dec!(1.1002));
        assert_eq!(event.exit_range(PositionSide::Short), (dec!(1.1002), dec!(1.1002)));
    }

    #[test]
    fn test_candle_range() {
        let candle = Candle::new(Utc::now(), dec!(1.10), dec!(1.12), dec!(1.09), dec!(1.11));
        assert_eq!(candle.range(), dec!(0.03));
        let event = MarketEvent::candle("EURUSD", candle);
        assert_eq!(event.exit_range(PositionSide::Long), (dec!(1.09), dec!(1.12)));
        assert_eq!(event.exit_price(PositionSide::Short), dec!(1.11));
    }

    #[test]
    fn test_market_event_json() {
        let json = r#"{"symbol":"EURUSD","data":{"quote":{"time":"2024-01-02T10:00:00Z","bid":"1.1","ask":"1.1002"}}}"#;
        let event: MarketEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.symbol, "EURUSD");
        assert!(matches!(event.data, MarketData::Quote(_)));
    }
}
