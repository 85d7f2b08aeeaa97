//! # Trader Grid
//!
//! 이벤트 기반 그리드/마틴게일 바스켓 엔진.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 바스켓 생명주기 (`Basket`)와 진입 판단 (`GridSequencer`)
//! - `handle(state, event) -> (state, output)` 형태의 순수 엔진 (`GridEngine`)
//! - 섹션별 엔진 설정과 검증 (`GridEngineConfig`)
//! - tokio mpsc 기반 단일 소비자 런타임 (`GridRuntime`)
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_grid::{EngineEvent, GridEngine, GridEngineConfig};
//!
//! let engine = GridEngine::new(GridEngineConfig::load("config/grid.toml")?)?;
//! let state = engine.initial_state();
//! let (state, output) = engine.handle(state, EngineEvent::Tick { market, bias })?;
//! for command in output.commands {
//!     // 거래소로 전달
//! }
//! ```

pub mod basket;
pub mod config;
pub mod engine;
pub mod events;
pub mod runtime;
pub mod sequencer;

pub use basket::{Basket, Closing, CycleResult};
pub use config::{EntryPolicy, ExecutionConfig, GridConfig, GridEngineConfig};
pub use engine::{BasketSnapshot, EngineSnapshot, EngineState, GridEngine};
pub use events::{Alert, EngineEvent, EngineOutput};
pub use runtime::{
    GridRuntime, RuntimeHandle, RuntimeInput, RuntimeStats, RuntimeSummary, DEFAULT_LOG_CAPACITY,
};
pub use sequencer::{EntryDecision, GridSequencer, SkipReason};
