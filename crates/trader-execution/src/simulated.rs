//! 리플레이/테스트용 모의 거래소.
//!
//! - 시장가 주문은 마지막 시세로 즉시 체결 (호가: 매수 ask / 매도 bid, 캔들: 종가)
//! - 역지정가/지정가 주문은 이후 봉의 고가/저가로 트리거
//! - 최소 수량 미만이나 수량 단위가 맞지 않는 주문은 거부

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use trader_core::{
    FillEvent, InstrumentMeta, MarketData, MarketEvent, OrderHandle, OrderIntent, OrderKind,
    OrderPurpose, OrderStatusType, OrderUpdate, PositionSide, Price, Side, TraderError,
    TraderResult,
};

use crate::venue::{ExecutionReport, ExecutionVenue};

/// 모의 거래소 주문 매칭 엔진.
#[derive(Debug, Default)]
pub struct PaperMatchingEngine {
    instruments: HashMap<String, InstrumentMeta>,
    last_market: HashMap<String, MarketEvent>,
    resting: Vec<OrderIntent>,
    reports: Vec<ExecutionReport>,
    reject_next: u32,
}

impl PaperMatchingEngine {
    /// 종목 메타데이터로 매칭 엔진을 생성합니다.
    pub fn new(instruments: impl IntoIterator<Item = InstrumentMeta>) -> Self {
        Self {
            instruments: instruments
                .into_iter()
                .map(|m| (m.symbol.clone(), m))
                .collect(),
            ..Default::default()
        }
    }

    /// 다음 `count`개의 제출을 거부합니다 (장애 시뮬레이션).
    pub fn reject_next(&mut self, count: u32) {
        self.reject_next = count;
    }

    /// 대기 주문 수.
    pub fn resting_count(&self) -> usize {
        self.resting.len()
    }

    /// 주문을 제출합니다.
    pub fn submit(&mut self, intent: &OrderIntent) -> TraderResult<OrderHandle> {
        let reject = |reason: String| TraderError::OrderRejected {
            handle: intent.handle,
            reason,
        };

        if self.reject_next > 0 {
            self.reject_next -= 1;
            return Err(reject("venue unavailable".to_string()));
        }

        let meta = self
            .instruments
            .get(&intent.symbol)
            .ok_or_else(|| reject(format!("unknown symbol {}", intent.symbol)))?;
        if intent.volume < meta.min_volume {
            return Err(reject(format!(
                "volume {} below min volume {}",
                intent.volume, meta.min_volume
            )));
        }
        if !(intent.volume % meta.volume_step).is_zero() {
            return Err(reject(format!(
                "volume {} not a multiple of {}",
                intent.volume, meta.volume_step
            )));
        }

        match intent.kind {
            OrderKind::Market => {
                let event = self
                    .last_market
                    .get(&intent.symbol)
                    .ok_or_else(|| reject("no market data".to_string()))?;
                let price = match &event.data {
                    MarketData::Candle(c) => c.close,
                    MarketData::Quote(q) => match intent.side {
                        Side::Buy => q.ask,
                        Side::Sell => q.bid,
                    },
                };
                let time = event.time();
                self.fill(intent, price, time);
            }
            OrderKind::Stop | OrderKind::Limit => {
                let Some(price) = intent.price else {
                    return Err(reject("resting order without price".to_string()));
                };
                let time = self
                    .last_market
                    .get(&intent.symbol)
                    .map(MarketEvent::time)
                    .unwrap_or_else(Utc::now);
                debug!(handle = %intent.handle, kind = %intent.kind, price = %price, "Paper order resting");
                self.resting.push(intent.clone());
                self.push_update(intent.handle, OrderStatusType::Open, None, time);
            }
        }

        Ok(intent.handle)
    }

    /// 주문을 취소합니다. 대기 중이 아니면 아무 일도 하지 않습니다.
    pub fn cancel(&mut self, handle: OrderHandle, time: DateTime<Utc>) {
        if let Some(pos) = self.resting.iter().position(|o| o.handle == handle) {
            self.resting.remove(pos);
            self.push_update(handle, OrderStatusType::Cancelled, None, time);
        }
    }

    /// 새 시장 데이터로 대기 주문을 트리거합니다.
    ///
    /// 같은 바스켓의 손절/익절은 OCO로 묶입니다. 한쪽이 체결되면 다른 쪽은
    /// 취소되고, 한 봉에서 둘 다 트리거되면 손절만 체결합니다.
    pub fn on_market(&mut self, event: &MarketEvent) {
        self.last_market.insert(event.symbol.clone(), event.clone());
        let time = event.time();

        let (mut triggered, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.resting)
            .into_iter()
            .partition(|o| o.symbol == event.symbol && trigger_price(o, event).is_some());
        self.resting = waiting;

        // 손절 먼저
        triggered.sort_by_key(|o| o.purpose != OrderPurpose::ProtectiveStop);

        let mut filled_groups: Vec<(String, PositionSide)> = Vec::new();
        for order in triggered {
            let group = oco_group(&order);
            if group.as_ref().is_some_and(|g| filled_groups.contains(g)) {
                debug!(handle = %order.handle, "Paper OCO sibling cancelled");
                self.push_update(
                    order.handle,
                    OrderStatusType::Cancelled,
                    Some("oco sibling filled".to_string()),
                    time,
                );
                continue;
            }

            if let Some(price) = trigger_price(&order, event) {
                self.fill(&order, price, time);
            }
            if let Some(group) = group {
                self.cancel_siblings(&order, time);
                filled_groups.push(group);
            }
        }
    }

    /// 체결된 보호 주문과 같은 바스켓의 나머지 보호 주문을 취소합니다.
    fn cancel_siblings(&mut self, order: &OrderIntent, time: DateTime<Utc>) {
        let group = oco_group(order);
        let (siblings, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.resting)
            .into_iter()
            .partition(|o| o.handle != order.handle && oco_group(o) == group);
        self.resting = rest;

        for sibling in siblings {
            debug!(handle = %sibling.handle, filled = %order.handle, "Paper OCO sibling cancelled");
            self.push_update(
                sibling.handle,
                OrderStatusType::Cancelled,
                Some("oco sibling filled".to_string()),
                time,
            );
        }
    }

    /// 쌓인 실행 보고를 가져옵니다.
    pub fn drain(&mut self) -> Vec<ExecutionReport> {
        std::mem::take(&mut self.reports)
    }

    fn fill(&mut self, intent: &OrderIntent, price: Price, time: DateTime<Utc>) {
        info!(
            handle = %intent.handle,
            symbol = %intent.symbol,
            side = %intent.side,
            price = %price,
            volume = %intent.volume,
            "Paper fill"
        );
        self.reports.push(ExecutionReport::Fill(FillEvent {
            handle: intent.handle,
            symbol: intent.symbol.clone(),
            price,
            volume: intent.volume,
            side: intent.side,
            time,
        }));
        self.push_update(intent.handle, OrderStatusType::Filled, None, time);
    }

    fn push_update(
        &mut self,
        handle: OrderHandle,
        status: OrderStatusType,
        reason: Option<String>,
        time: DateTime<Utc>,
    ) {
        self.reports.push(ExecutionReport::Update(OrderUpdate {
            handle,
            status,
            reason,
            time,
        }));
    }
}

/// 보호 주문의 OCO 묶음 (종목, 바스켓 방향).
fn oco_group(order: &OrderIntent) -> Option<(String, PositionSide)> {
    match order.purpose {
        OrderPurpose::ProtectiveStop | OrderPurpose::ProtectiveTake => {
            Some((order.symbol.clone(), order.basket_side))
        }
        _ => None,
    }
}

/// 대기 주문이 이 이벤트에서 체결되는 가격.
///
/// 갭이 나면 봉의 시가로 체결합니다.
fn trigger_price(order: &OrderIntent, event: &MarketEvent) -> Option<Price> {
    let level = order.price?;
    let (open, low, high) = match &event.data {
        MarketData::Candle(c) => (c.open, c.low, c.high),
        MarketData::Quote(q) => {
            let p = match order.side {
                Side::Buy => q.ask,
                Side::Sell => q.bid,
            };
            (p, p, p)
        }
    };

    match (order.kind, order.side) {
        (OrderKind::Stop, Side::Sell) if low <= level => Some(open.min(level)),
        (OrderKind::Stop, Side::Buy) if high >= level => Some(open.max(level)),
        (OrderKind::Limit, Side::Sell) if high >= level => Some(open.max(level)),
        (OrderKind::Limit, Side::Buy) if low <= level => Some(open.min(level)),
        _ => None,
    }
}

/// 비동기 인터페이스를 가진 모의 거래소.
#[derive(Debug)]
pub struct PaperVenue {
    engine: Mutex<PaperMatchingEngine>,
}

impl PaperVenue {
    /// 종목 메타데이터로 모의 거래소를 생성합니다.
    pub fn new(instruments: impl IntoIterator<Item = InstrumentMeta>) -> Self {
        Self {
            engine: Mutex::new(PaperMatchingEngine::new(instruments)),
        }
    }

    /// 다음 `count`개의 제출을 거부합니다.
    pub async fn reject_next(&self, count: u32) {
        self.engine.lock().await.reject_next(count);
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit(&self, intent: &OrderIntent) -> TraderResult<OrderHandle> {
        self.engine.lock().await.submit(intent)
    }

    async fn cancel(&self, _symbol: &str, handle: OrderHandle) -> TraderResult<()> {
        let mut engine = self.engine.lock().await;
        let time = engine
            .resting
            .iter()
            .find(|o| o.handle == handle)
            .and_then(|o| engine.last_market.get(&o.symbol))
            .map(MarketEvent::time)
            .unwrap_or_else(Utc::now);
        engine.cancel(handle, time);
        Ok(())
    }

    async fn on_market(&self, event: &MarketEvent) -> TraderResult<()> {
        self.engine.lock().await.on_market(event);
        Ok(())
    }

    async fn drain_reports(&self) -> Vec<ExecutionReport> {
        self.engine.lock().await.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{Candle, Quote};

    fn meta() -> InstrumentMeta {
        InstrumentMeta {
            symbol: "EURUSD".to_string(),
            price_step: dec!(0.00001),
            volume_step: dec!(0.01),
            min_volume: dec!(0.01),
            max_volume: dec!(100),
            decimals: 5,
            tick_value: dec!(1),
        }
    }

    fn quote(bid: Price, ask: Price) -> MarketEvent {
        MarketEvent::quote("EURUSD", Quote::new(Utc::now(), bid, ask))
    }

    fn stop_sell(id: u64, price: Price) -> OrderIntent {
        OrderIntent::resting(
            OrderHandle::new(id),
            "EURUSD",
            OrderKind::Stop,
            Side::Sell,
            dec!(0.1),
            price,
            PositionSide::Long,
            OrderPurpose::ProtectiveStop,
        )
    }

    #[test]
    fn test_market_order_fills_at_ask() {
        let mut engine = PaperMatchingEngine::new([meta()]);
        engine.on_market(&quote(dec!(1.1000), dec!(1.1002)));
        let intent = OrderIntent::market(
            OrderHandle::new(1),
            "EURUSD",
            Side::Buy,
            dec!(0.1),
            PositionSide::Long,
            OrderPurpose::GridEntry { step: 0 },
        );
        engine.submit(&intent).unwrap();

        let reports = engine.drain();
        assert_eq!(reports.len(), 2);
        assert!(matches!(&reports[0], ExecutionReport::Fill(f) if f.price == dec!(1.1002)));
        assert!(matches!(&reports[1], ExecutionReport::Update(u) if u.status == OrderStatusType::Filled));
    }

    #[test]
    fn test_rejects_below_min_volume() {
        let mut engine = PaperMatchingEngine::new([meta()]);
        engine.on_market(&quote(dec!(1.1000), dec!(1.1002)));
        let intent = OrderIntent::market(
            OrderHandle::new(1),
            "EURUSD",
            Side::Buy,
            dec!(0.001),
            PositionSide::Long,
            OrderPurpose::GridEntry { step: 0 },
        );
        assert!(matches!(engine.submit(&intent), Err(TraderError::OrderRejected { .. })));
        assert!(engine.drain().is_empty());
    }

    #[test]
    fn test_stop_triggers_on_candle_low_with_gap() {
        let mut engine = PaperMatchingEngine::new([meta()]);
        engine.on_market(&quote(dec!(1.1000), dec!(1.1002)));
        engine.submit(&stop_sell(1, dec!(1.0980))).unwrap();
        assert_eq!(engine.resting_count(), 1);
        engine.drain();

        // 갭 하락: 시가 1.0970에서 체결
        let candle = Candle::new(Utc::now(), dec!(1.0970), dec!(1.0975), dec!(1.0960), dec!(1.0965));
        engine.on_market(&MarketEvent::candle("EURUSD", candle));
        let reports = engine.drain();
        assert!(matches!(&reports[0], ExecutionReport::Fill(f) if f.price == dec!(1.0970)));
        assert_eq!(engine.resting_count(), 0);
    }

    fn take_sell(id: u64, price: Price) -> OrderIntent {
        OrderIntent::resting(
            OrderHandle::new(id),
            "EURUSD",
            OrderKind::Limit,
            Side::Sell,
            dec!(0.1),
            price,
            PositionSide::Long,
            OrderPurpose::ProtectiveTake,
        )
    }

    fn fills(reports: &[ExecutionReport]) -> Vec<OrderHandle> {
        reports
            .iter()
            .filter_map(|r| match r {
                ExecutionReport::Fill(f) => Some(f.handle),
                ExecutionReport::Update(_) => None,
            })
            .collect()
    }

    fn cancelled(reports: &[ExecutionReport]) -> Vec<OrderHandle> {
        reports
            .iter()
            .filter_map(|r| match r {
                ExecutionReport::Update(u) if u.status == OrderStatusType::Cancelled => Some(u.handle),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_stop_and_take_on_same_candle_fill_only_stop() {
        let mut engine = PaperMatchingEngine::new([meta()]);
        engine.on_market(&quote(dec!(1.1000), dec!(1.1000)));
        // 익절을 먼저 걸어도 손절이 우선
        engine.submit(&take_sell(2, dec!(1.1020))).unwrap();
        engine.submit(&stop_sell(1, dec!(1.0990))).unwrap();
        engine.drain();

        let candle = Candle::new(Utc::now(), dec!(1.1000), dec!(1.1030), dec!(1.0980), dec!(1.1000));
        engine.on_market(&MarketEvent::candle("EURUSD", candle));
        let reports = engine.drain();

        assert_eq!(fills(&reports), vec![OrderHandle::new(1)]);
        assert_eq!(cancelled(&reports), vec![OrderHandle::new(2)]);
        assert!(matches!(&reports[0], ExecutionReport::Fill(f) if f.price == dec!(1.0990)));
        assert_eq!(engine.resting_count(), 0);
    }

    #[test]
    fn test_take_fill_cancels_resting_stop() {
        let mut engine = PaperMatchingEngine::new([meta()]);
        engine.on_market(&quote(dec!(1.1000), dec!(1.1000)));
        engine.submit(&stop_sell(1, dec!(1.0990))).unwrap();
        engine.submit(&take_sell(2, dec!(1.1020))).unwrap();
        // 다른 바스켓 방향의 주문은 그대로 남음
        let mut other = stop_sell(3, dec!(1.1050));
        other.side = Side::Buy;
        other.basket_side = PositionSide::Short;
        engine.submit(&other).unwrap();
        engine.drain();

        engine.on_market(&quote(dec!(1.1025), dec!(1.1025)));
        let reports = engine.drain();

        assert_eq!(fills(&reports), vec![OrderHandle::new(2)]);
        assert_eq!(cancelled(&reports), vec![OrderHandle::new(1)]);
        assert_eq!(engine.resting_count(), 1);
    }

    #[test]
    fn test_cancel_unknown_order_is_noop() {
        let mut engine = PaperMatchingEngine::new([meta()]);
        engine.cancel(OrderHandle::new(99), Utc::now());
        assert!(engine.drain().is_empty());
    }

    #[tokio::test]
    async fn test_paper_venue_reject_next() {
        let venue = PaperVenue::new([meta()]);
        venue.on_market(&quote(dec!(1.1000), dec!(1.1002))).await.unwrap();
        venue.reject_next(1).await;
        assert!(venue.submit(&stop_sell(1, dec!(1.0980))).await.is_err());
        assert!(venue.submit(&stop_sell(2, dec!(1.0980))).await.is_ok());
        venue.cancel("EURUSD", OrderHandle::new(2)).await.unwrap();
        let reports = venue.drain_reports().await;
        assert!(matches!(
            reports.last(),
            Some(ExecutionReport::Update(u)) if u.status == OrderStatusType::Cancelled
        ));
    }
}
