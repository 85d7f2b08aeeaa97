//! 바스켓 식별자.

use serde::{Deserialize, Serialize};
use trader_core::PositionSide;

/// 바스켓 식별자 (종목 또는 종목 그룹 + 방향).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BasketKey {
    /// 종목 (또는 종목 그룹) 이름
    pub group: String,
    /// 방향
    pub side: PositionSide,
}

impl BasketKey {
    /// 새 식별자를 생성합니다.
    pub fn new(group: impl Into<String>, side: PositionSide) -> Self {
        Self {
            group: group.into(),
            side,
        }
    }
}

impl std::fmt::Display for BasketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.group, self.side)
    }
}
