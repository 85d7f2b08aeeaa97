//! 그리드 엔진의 에러 타입.
//!
//! 설정 단계의 치명적 에러와 런타임에 국소적으로 복구되는 에러를
//! 하나의 열거형으로 정의합니다.

use crate::domain::OrderHandle;
use thiserror::Error;

/// 핵심 엔진 에러.
#[derive(Debug, Error)]
pub enum TraderError {
    /// 설정 값이 유효하지 않음 (거래 시작 전 치명적)
    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),

    /// 계산에 필요한 데이터/체결 이력이 부족함
    #[error("데이터 부족: {0}")]
    InsufficientData(String),

    /// 거래소가 주문 의도를 거부함
    #[error("주문 거부 ({handle}): {reason}")]
    OrderRejected {
        /// 거부된 주문 핸들
        handle: OrderHandle,
        /// 거부 사유
        reason: String,
    },

    /// 보호 주문 교체가 체결과 경합함
    #[error("오래된 보호 주문: {0}")]
    StaleProtectiveOrder(String),

    /// 긴급 청산이 재시도 한도 내에 실행되지 않음 (수동 개입 필요)
    #[error("긴급 청산 실패: {symbol} ({attempts}회 시도)")]
    EmergencyCloseFailed {
        /// 청산 대상 종목
        symbol: String,
        /// 시도 횟수
        attempts: u32,
    },

    /// 설정 파일 로딩 에러
    #[error("설정 로딩 에러: {0}")]
    Config(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 런타임 채널이 닫힘
    #[error("채널 에러: {0}")]
    Channel(String),
}

/// 엔진 작업을 위한 Result 타입.
pub type TraderResult<T> = Result<T, TraderError>;

impl TraderError {
    /// 다음 틱에서 다시 시도할 수 있는 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TraderError::InsufficientData(_)
                | TraderError::OrderRejected { .. }
                | TraderError::StaleProtectiveOrder(_)
        )
    }

    /// 엔진을 멈춰야 하는 치명적 에러인지 확인합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TraderError::InvalidConfig(_)
                | TraderError::EmergencyCloseFailed { .. }
                | TraderError::Config(_)
                | TraderError::Channel(_)
        )
    }
}

impl From<serde_json::Error> for TraderError {
    fn from(err: serde_json::Error) -> Self {
        TraderError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for TraderError {
    fn from(err: config::ConfigError) -> Self {
        TraderError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let rejected = TraderError::OrderRejected {
            handle: OrderHandle::new(7),
            reason: "below min volume".to_string(),
        };
        assert!(rejected.is_retryable());
        assert!(!rejected.is_fatal());

        let stale = TraderError::StaleProtectiveOrder("stop filled".to_string());
        assert!(stale.is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        let invalid = TraderError::InvalidConfig("multiplier must be > 0".to_string());
        assert!(invalid.is_fatal());
        assert!(!invalid.is_retryable());

        let emergency = TraderError::EmergencyCloseFailed {
            symbol: "EURUSD".to_string(),
            attempts: 3,
        };
        assert!(emergency.is_fatal());
        assert!(emergency.to_string().contains("EURUSD"));
    }
}
