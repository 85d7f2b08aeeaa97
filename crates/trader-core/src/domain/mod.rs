//! 그리드 엔진 운영을 위한 도메인 모델.

mod account;
mod instrument;
mod market_data;
mod order;
mod position;
mod signal;

pub use account::*;
pub use instrument::*;
pub use market_data::*;
pub use order::*;
pub use position::*;
pub use signal::*;
