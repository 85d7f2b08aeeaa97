//! 정밀한 금융 계산을 위한 Decimal 유틸리티.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// 가격 타입.
pub type Price = Decimal;

/// 주문/포지션 수량(로트) 타입.
pub type Quantity = Decimal;

/// 퍼센트 타입 (5 = 5%).
pub type Percentage = Decimal;

/// 단위 라운딩 방법.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundMethod {
    /// 일반 반올림 (0.5는 0에서 먼 쪽으로)
    #[default]
    Round,
    /// 내림
    Floor,
    /// 올림
    Ceil,
}

/// Decimal 연산을 위한 확장 트레이트.
pub trait DecimalExt {
    /// 주어진 단위(step)의 배수로 라운딩합니다. step이 0 이하이면 그대로 반환합니다.
    fn round_to_step(&self, step: Decimal, method: RoundMethod) -> Decimal;

    /// 값의 `pct`%를 반환합니다.
    fn percent_of(&self, pct: Percentage) -> Decimal;

    /// 퍼센트 문자열로 변환합니다 (예: 0.0525 -> "5.25%").
    fn to_percentage_string(&self) -> String;
}

impl DecimalExt for Decimal {
    fn round_to_step(&self, step: Decimal, method: RoundMethod) -> Decimal {
        if step <= Decimal::ZERO {
            return *self;
        }

        let steps = *self / step;
        let rounded = match method {
            RoundMethod::Round => steps.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
            RoundMethod::Floor => steps.floor(),
            RoundMethod::Ceil => steps.ceil(),
        };

        (rounded * step).normalize()
    }

    fn percent_of(&self, pct: Percentage) -> Decimal {
        *self * pct / Decimal::ONE_HUNDRED
    }

    fn to_percentage_string(&self) -> String {
        let pct = *self * Decimal::ONE_HUNDRED;
        format!("{:.2}%", pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_step() {
        assert_eq!(dec!(0.27).round_to_step(dec!(0.1), RoundMethod::Round), dec!(0.3));
        assert_eq!(dec!(0.27).round_to_step(dec!(0.1), RoundMethod::Floor), dec!(0.2));
        assert_eq!(dec!(0.21).round_to_step(dec!(0.1), RoundMethod::Ceil), dec!(0.3));
        assert_eq!(dec!(0.225).round_to_step(dec!(0.01), RoundMethod::Round), dec!(0.23));
        assert_eq!(dec!(1.23456).round_to_step(dec!(0.00001), RoundMethod::Round), dec!(1.23456));
        // step이 0이면 원래 값
        assert_eq!(dec!(0.27).round_to_step(Decimal::ZERO, RoundMethod::Round), dec!(0.27));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(dec!(10000).percent_of(dec!(5)), dec!(500));
        assert_eq!(dec!(0.0525).to_percentage_string(), "5.25%");
    }
}
