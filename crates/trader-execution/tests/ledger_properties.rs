//! 포지션 원장 속성 테스트.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use trader_core::{PositionSide, Side};
use trader_execution::PositionLedger;

fn fill_strategy() -> impl Strategy<Value = (bool, u32, u32)> {
    // (매수 여부, 가격 틱, 수량 0.01 단위)
    (any::<bool>(), 10_000u32..12_000, 0u32..50)
}

proptest! {
    #[test]
    fn prop_ledger_volume_never_negative(fills in prop::collection::vec(fill_strategy(), 1..40)) {
        let mut ledger = PositionLedger::new();
        let now = Utc::now();
        let mut net = Decimal::ZERO;

        for (buy, ticks, lots) in fills {
            let side = if buy { Side::Buy } else { Side::Sell };
            let price = Decimal::new(ticks as i64, 4);
            let volume = Decimal::new(lots as i64, 2);
            ledger.record_fill("EURUSD", side, price, volume, now);
            net += if buy { volume } else { -volume };

            let long = ledger.total_volume("EURUSD", PositionSide::Long);
            let short = ledger.total_volume("EURUSD", PositionSide::Short);
            prop_assert!(long >= Decimal::ZERO);
            prop_assert!(short >= Decimal::ZERO);
            // 한 종목에서 양방향이 동시에 열리지 않음
            prop_assert!(long.is_zero() || short.is_zero());
            prop_assert_eq!(long - short, net);
            prop_assert_eq!(ledger.is_flat("EURUSD", PositionSide::Long), long.is_zero());
            prop_assert_eq!(ledger.is_flat("EURUSD", PositionSide::Short), short.is_zero());
        }
    }

    #[test]
    fn prop_average_price_within_lot_range(prices in prop::collection::vec(10_000u32..12_000, 1..20)) {
        let mut ledger = PositionLedger::new();
        let now = Utc::now();
        for (i, ticks) in prices.iter().enumerate() {
            let volume = Decimal::new((i as i64 % 5) + 1, 2);
            ledger.record_fill("EURUSD", Side::Buy, Decimal::new(*ticks as i64, 4), volume, now);
        }

        let min = Decimal::new(*prices.iter().min().unwrap() as i64, 4);
        let max = Decimal::new(*prices.iter().max().unwrap() as i64, 4);
        let avg = ledger.weighted_average_price("EURUSD", PositionSide::Long).unwrap();
        prop_assert!(avg >= min && avg <= max);
    }
}
