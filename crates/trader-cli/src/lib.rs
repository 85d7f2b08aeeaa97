//! CLI 도구 모음.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 기록된 시장 데이터 리플레이 (모의 거래소)
//! - 설정 파일 검증
//! - 기본 설정 파일 생성

pub mod commands;
