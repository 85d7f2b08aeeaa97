//! 주문 실행 및 포지션 관리.
//!
//! 이 crate는 다음을 제공합니다:
//! - 종목/방향별 FIFO 포지션 원장
//! - 주문 생명주기 추적과 보호 주문 교체 상태 머신
//! - 거래소 추상화(`ExecutionVenue`)와 리플레이용 모의 거래소
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_execution::{OrderManager, PaperVenue, PositionLedger};
//!
//! let mut ledger = PositionLedger::new();
//! let mut orders = OrderManager::new();
//! let venue = PaperVenue::new(instruments);
//!
//! // 체결 반영
//! ledger.record_fill("EURUSD", Side::Buy, dec!(1.1000), dec!(0.1), now);
//! ```

pub mod order_manager;
pub mod position_ledger;
pub mod simulated;
pub mod venue;

// 주요 타입 재내보내기
pub use order_manager::{
    OrderManager, OrderRecord, OrderSlot, OrderStats, ProtectiveLeg, ProtectiveTarget, SlotAction,
    SlotState,
};
pub use position_ledger::{ClosedLot, FillOutcome, PositionLedger};
pub use simulated::{PaperMatchingEngine, PaperVenue};
pub use venue::{ExecutionReport, ExecutionVenue};
