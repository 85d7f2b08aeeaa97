//! 계좌 자산 스냅샷.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 엔진이 참조하는 계좌 자산 상태.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// 시작 시점 자산
    pub initial_equity: Decimal,
    /// 현재 자산 (미실현 손익 포함)
    pub current_equity: Decimal,
}

impl AccountState {
    /// 시작 자산으로 계좌 상태를 생성합니다.
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            initial_equity,
            current_equity: initial_equity,
        }
    }

    /// 시작 대비 손익.
    pub fn pnl(&self) -> Decimal {
        self.current_equity - self.initial_equity
    }
}
