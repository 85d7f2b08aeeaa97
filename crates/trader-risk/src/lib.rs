//! 그리드 바스켓 리스크 관리.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 단계별 물량/트리거 거리 진행 (`ProgressionEngine`)
//! - 손절/익절, 트레일링, 본전 스톱, 부분 청산 (`ProtectiveLevelManager`)
//! - 바스켓 손익 평가와 히스테리시스, 자산 낙폭 가드, 세션 가드
//! - 연속 손실 기반 자금 관리
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_risk::{ProgressionConfig, ProgressionEngine, VolumeDecision};
//!
//! let engine = ProgressionEngine::new(ProgressionConfig::default())?;
//! if let VolumeDecision::Trade(volume) = engine.next_volume(2, &meta)? {
//!     // 0.4 로트 주문
//! }
//! ```

pub mod basket_risk;
pub mod config;
pub mod key;
pub mod money_management;
pub mod progression;
pub mod protective;

// 주요 타입 재내보내기
pub use basket_risk::{
    floating_pnl, BasketRiskEvaluator, CloseDecision, CloseKind, EquityGuard, Exposure,
    HysteresisCounter, SessionGuard, SessionStatus,
};
pub use config::{
    BasketMode, BasketRiskConfig, BreakEvenConfig, BreakEvenParams, ConfigValidationError,
    EquityConfig, InstrumentPair, MoneyManagementConfig, PartialExitTier, ProgressionConfig,
    ProgressionKind, ProtectiveConfig, ProtectiveMode, ProtectiveParams, SessionConfig,
    TrailingConfig, TrailingParams,
};
pub use key::BasketKey;
pub use money_management::{LossHistory, MoneyManager};
pub use progression::{next_trigger_distance, progress, ProgressionEngine, VolumeDecision};
pub use protective::{
    ExitReason, LevelChange, PartialExit, ProtectiveLevelManager, ProtectivePhase, ProtectiveState,
    TrailTier,
};
