//! 주문 실행 거래소 추상화.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trader_core::{FillEvent, MarketEvent, OrderHandle, OrderIntent, OrderUpdate, TraderResult};

/// 거래소가 엔진에 돌려주는 실행 보고.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "report")]
pub enum ExecutionReport {
    /// 체결
    Fill(FillEvent),
    /// 주문 상태 변경
    Update(OrderUpdate),
}

/// 주문을 실행하는 거래소.
///
/// 제출이 동기적으로 거부되면 `TraderError::OrderRejected`를 반환합니다.
/// 이미 종료된 주문에 대한 취소는 에러가 아닙니다.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// 거래소 이름.
    fn name(&self) -> &str;

    /// 주문을 제출합니다.
    async fn submit(&self, intent: &OrderIntent) -> TraderResult<OrderHandle>;

    /// 주문을 취소합니다.
    async fn cancel(&self, symbol: &str, handle: OrderHandle) -> TraderResult<()>;

    /// 시장 데이터를 거래소에 전달합니다 (대기 주문 트리거용).
    async fn on_market(&self, event: &MarketEvent) -> TraderResult<()>;

    /// 쌓인 실행 보고를 가져옵니다.
    async fn drain_reports(&self) -> Vec<ExecutionReport>;
}
