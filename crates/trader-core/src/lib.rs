//! # Trader Core
//!
//! 그리드/마틴게일 포지션 엔진의 핵심 도메인 모델 및 타입을 제공합니다.
//!
//! 이 크레이트는 엔진 전반에서 사용되는 기본 타입을 제공합니다:
//! - 주문 의도(intent), 체결 및 주문 상태 이벤트
//! - 포지션 로트(lot)
//! - 시장 데이터 이벤트 (캔들/호가)
//! - 종목 메타데이터와 pip/point 변환
//! - 설정 로딩
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
