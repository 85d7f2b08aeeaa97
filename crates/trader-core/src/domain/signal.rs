//! 진입 방향 신호.
//!
//! 그리드 엔진은 신호를 직접 만들지 않습니다. 외부 지표나 필터가
//! 현재 선호 방향만 알려 주면 새 바스켓의 첫 진입 방향으로 사용합니다.

use crate::domain::order::PositionSide;
use serde::{Deserialize, Serialize};

/// 현재 진입 방향을 알려 주는 신호 게이트.
pub trait SignalGate: Send + Sync {
    /// 현재 선호 방향. 진입하지 말아야 하면 `None`.
    fn current_bias(&self) -> Option<PositionSide>;
}

/// 고정된 방향을 반환하는 신호 게이트.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedBias(pub Option<PositionSide>);

impl SignalGate for FixedBias {
    fn current_bias(&self) -> Option<PositionSide> {
        self.0
    }
}

impl<F> SignalGate for F
where
    F: Fn() -> Option<PositionSide> + Send + Sync,
{
    fn current_bias(&self) -> Option<PositionSide> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_and_closure_gates() {
        let gate = FixedBias(Some(PositionSide::Short));
        assert_eq!(gate.current_bias(), Some(PositionSide::Short));

        let closure = || Some(PositionSide::Long);
        assert_eq!(closure.current_bias(), Some(PositionSide::Long));
        assert_eq!(FixedBias::default().current_bias(), None);
    }
}
