//! 종목 메타데이터와 가격/수량 단위 처리.
//!
//! 거래 규칙(가격 단위, 수량 단위, 최소/최대 수량)과
//! pip/point 변환, 손익 계산 공식을 한 곳에 모아 둡니다.

use crate::domain::order::PositionSide;
use crate::error::{TraderError, TraderResult};
use crate::types::{DecimalExt, Price, Quantity, RoundMethod};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 호가 단위 제공자 trait.
pub trait TickSizeProvider: Send + Sync {
    /// 주어진 가격에 대한 호가 단위를 반환합니다.
    fn tick_size(&self, price: Price) -> Decimal;

    /// 가격을 호가 단위로 라운딩합니다.
    fn round_to_tick(&self, price: Price, method: RoundMethod) -> Price {
        price.round_to_step(self.tick_size(price), method)
    }

    /// 가격이 호가 단위에 맞는지 검증합니다.
    fn is_valid_price(&self, price: Price) -> bool {
        let tick = self.tick_size(price);
        if tick.is_zero() {
            return true;
        }
        (price % tick).is_zero()
    }
}

/// 종목 메타데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    /// 종목 코드
    pub symbol: String,
    /// 최소 가격 단위 (point)
    pub price_step: Decimal,
    /// 수량 단위
    pub volume_step: Decimal,
    /// 최소 주문 수량
    pub min_volume: Quantity,
    /// 최대 주문 수량
    pub max_volume: Quantity,
    /// 가격 소수점 자릿수
    pub decimals: u32,
    /// 1로트당 price_step 한 단위의 손익 금액
    #[serde(default = "default_tick_value")]
    pub tick_value: Decimal,
}

fn default_tick_value() -> Decimal {
    Decimal::ONE
}

impl InstrumentMeta {
    /// 메타데이터 값을 검증합니다.
    pub fn validate(&self) -> TraderResult<()> {
        let invalid = |msg: &str| Err(TraderError::InvalidConfig(format!("{}: {}", self.symbol, msg)));

        if self.symbol.is_empty() {
            return Err(TraderError::InvalidConfig("instrument symbol is empty".to_string()));
        }
        if self.price_step <= Decimal::ZERO {
            return invalid("price_step must be > 0");
        }
        if self.volume_step <= Decimal::ZERO {
            return invalid("volume_step must be > 0");
        }
        if self.min_volume <= Decimal::ZERO {
            return invalid("min_volume must be > 0");
        }
        if self.max_volume < self.min_volume {
            return invalid("max_volume must be >= min_volume");
        }
        if self.tick_value <= Decimal::ZERO {
            return invalid("tick_value must be > 0");
        }
        Ok(())
    }

    /// pip/point 변환기를 반환합니다.
    pub fn converter(&self) -> PriceConverter {
        PriceConverter::new(self.price_step, self.decimals)
    }

    /// 수량을 수량 단위로 내림합니다.
    pub fn floor_volume(&self, volume: Quantity) -> Quantity {
        volume.round_to_step(self.volume_step, RoundMethod::Floor)
    }

    /// 가격을 가격 단위로 라운딩합니다.
    pub fn round_price(&self, price: Price) -> Price {
        self.round_to_tick(price, RoundMethod::Round)
    }

    /// 한 로트 묶음의 손익을 계산합니다.
    ///
    /// `sign × (exit − entry) / tick_size × tick_value × volume`
    pub fn pnl(&self, side: PositionSide, entry: Price, exit: Price, volume: Quantity) -> Decimal {
        if self.price_step.is_zero() {
            return Decimal::ZERO;
        }
        side.sign() * (exit - entry) / self.price_step * self.tick_value * volume
    }
}

impl TickSizeProvider for InstrumentMeta {
    fn tick_size(&self, _price: Price) -> Decimal {
        self.price_step
    }
}

/// pip 단위 거리와 가격 거리 사이의 변환기.
///
/// 3자리/5자리 호가 종목은 1 pip = 10 point, 그 외에는 1 pip = 1 point입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceConverter {
    pip_size: Decimal,
}

impl PriceConverter {
    /// 가격 단위와 소수점 자릿수로 변환기를 생성합니다.
    pub fn new(price_step: Decimal, decimals: u32) -> Self {
        let pip_size = if decimals == 3 || decimals == 5 {
            price_step * Decimal::TEN
        } else {
            price_step
        };
        Self { pip_size }
    }

    /// 1 pip의 가격 크기.
    pub fn pip_size(&self) -> Decimal {
        self.pip_size
    }

    /// pip 거리를 가격 거리로 변환합니다.
    pub fn pips_to_price(&self, pips: Decimal) -> Decimal {
        pips * self.pip_size
    }

    /// 가격 거리를 pip 거리로 변환합니다.
    pub fn price_to_pips(&self, distance: Decimal) -> Decimal {
        if self.pip_size.is_zero() {
            return Decimal::ZERO;
        }
        distance / self.pip_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn eurusd() -> InstrumentMeta {
        InstrumentMeta {
            symbol: "EURUSD".to_string(),
            price_step: dec!(0.00001),
            volume_step: dec!(0.01),
            min_volume: dec!(0.01),
            max_volume: dec!(100),
            decimals: 5,
            tick_value: dec!(1),
        }
    }

    #[test]
    fn test_pip_size_by_digits() {
        assert_eq!(PriceConverter::new(dec!(0.00001), 5).pip_size(), dec!(0.0001));
        assert_eq!(PriceConverter::new(dec!(0.001), 3).pip_size(), dec!(0.01));
        assert_eq!(PriceConverter::new(dec!(0.0001), 4).pip_size(), dec!(0.0001));
        assert_eq!(PriceConverter::new(dec!(0.01), 2).pip_size(), dec!(0.01));
    }

    #[test]
    fn test_pnl_long_and_short() {
        let meta = eurusd();
        // 10 pip = 100 point, 1로트당 point당 1
        let long = meta.pnl(PositionSide::Long, dec!(1.10000), dec!(1.10100), dec!(1));
        assert_eq!(long, dec!(100));
        let short = meta.pnl(PositionSide::Short, dec!(1.10000), dec!(1.10100), dec!(0.5));
        assert_eq!(short, dec!(-50));
    }

    #[test]
    fn test_validate_rejects_bad_meta() {
        let mut meta = eurusd();
        assert!(meta.validate().is_ok());
        meta.max_volume = dec!(0.001);
        assert!(matches!(meta.validate(), Err(TraderError::InvalidConfig(_))));
    }

    #[test]
    fn test_round_helpers() {
        let meta = eurusd();
        assert_eq!(meta.floor_volume(dec!(0.237)), dec!(0.23));
        assert_eq!(meta.round_price(dec!(1.100004)), dec!(1.1));
        assert!(meta.is_valid_price(dec!(1.10001)));
        assert!(!meta.is_valid_price(dec!(1.100005)));
    }

    proptest! {
        #[test]
        fn prop_pips_round_trip(pips in 0u32..100_000) {
            let conv = PriceConverter::new(dec!(0.00001), 5);
            let pips = Decimal::from(pips);
            prop_assert_eq!(conv.price_to_pips(conv.pips_to_price(pips)), pips);
        }
    }
}
