//! CLI 명령어 구현 모듈.

pub mod replay;
pub mod sample_config;
pub mod validate;
