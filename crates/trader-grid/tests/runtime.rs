//! 비동기 런타임 테스트.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use trader_core::{
    AccountState, CloseReason, FixedBias, InstrumentMeta, MarketEvent, OrderCommand, OrderPurpose,
    PositionSide, Price, Quote, TraderError,
};
use trader_execution::PaperVenue;
use trader_grid::{Alert, GridEngine, GridEngineConfig, GridRuntime, RuntimeInput};

fn config() -> GridEngineConfig {
    GridEngineConfig {
        instruments: vec![InstrumentMeta {
            symbol: "EURUSD".to_string(),
            price_step: dec!(0.00001),
            volume_step: dec!(0.01),
            min_volume: dec!(0.01),
            max_volume: dec!(50),
            decimals: 5,
            tick_value: dec!(1),
        }],
        ..Default::default()
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap() + Duration::seconds(secs)
}

fn quote(secs: i64, price: Price) -> MarketEvent {
    MarketEvent::quote("EURUSD", Quote::new(at(secs), price, price))
}

fn runtime(config: GridEngineConfig, bias: Option<PositionSide>) -> (GridRuntime<PaperVenue>, Arc<PaperVenue>) {
    let venue = Arc::new(PaperVenue::new(config.instruments.clone()));
    let engine = GridEngine::new(config).unwrap();
    let runtime = GridRuntime::new(engine, venue.clone(), Arc::new(FixedBias(bias)));
    (runtime, venue)
}

#[tokio::test]
async fn test_runtime_processes_take_profit_cycle() {
    let mut cfg = config();
    cfg.protective.take_distance_pips = Some(dec!(10));
    let (mut runtime, _venue) = runtime(cfg, Some(PositionSide::Long));

    runtime.on_market(quote(0, dec!(1.10000))).await.unwrap();
    assert_eq!(
        runtime.state().ledger().total_volume("EURUSD", PositionSide::Long),
        dec!(0.1)
    );

    runtime.on_market(quote(60, dec!(1.10100))).await.unwrap();
    let summary = runtime.summary();

    assert!(summary
        .alerts
        .iter()
        .any(|a| matches!(a, Alert::BasketClosed { reason: CloseReason::TakeHit, .. })));
    assert_eq!(summary.snapshot.realized_pnl, dec!(10));
    assert_eq!(summary.stats.fills, 2);
    // 같은 틱에서 청산 후 재진입하지 않음
    assert_eq!(
        summary
            .command_log
            .iter()
            .filter(|c| matches!(c, OrderCommand::Submit(i) if matches!(i.purpose, OrderPurpose::GridEntry { .. })))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_runtime_keeps_only_recent_log_entries() {
    let mut cfg = config();
    cfg.protective.take_distance_pips = Some(dec!(10));
    let (runtime, _venue) = runtime(cfg, Some(PositionSide::Long));
    let mut runtime = runtime.with_log_capacity(1);

    runtime.on_market(quote(0, dec!(1.10000))).await.unwrap();
    runtime.on_market(quote(60, dec!(1.10100))).await.unwrap();
    let summary = runtime.summary();

    // 통계는 전체, 기록은 마지막 것만
    assert_eq!(summary.stats.commands, 2);
    assert!(summary.stats.alerts > 1);
    assert_eq!(summary.command_log.len(), 1);
    assert!(matches!(
        &summary.command_log[0],
        OrderCommand::Submit(i) if matches!(i.purpose, OrderPurpose::BasketClose { .. })
    ));
    assert_eq!(summary.alerts.len(), 1);
    assert!(matches!(
        runtime.alerts().next(),
        Some(Alert::BasketClosed { reason: CloseReason::TakeHit, .. })
    ));
}

#[tokio::test]
async fn test_runtime_surfaces_emergency_failure() {
    let mut cfg = config();
    cfg.progression.base_volume = dec!(1);
    cfg.equity.risk_percent = Some(dec!(1));
    cfg.execution.emergency_retry_limit = 1;
    let (mut runtime, venue) = runtime(cfg, Some(PositionSide::Long));

    runtime.on_market(quote(0, dec!(1.10000))).await.unwrap();
    venue.reject_next(5).await;

    let err = runtime.on_market(quote(60, dec!(1.09800))).await.unwrap_err();
    assert!(matches!(err, TraderError::EmergencyCloseFailed { attempts: 2, .. }));
    assert!(err.is_fatal());
    assert!(runtime.state().is_halted());
    assert_eq!(runtime.stats().rejections, 2);
}

#[tokio::test]
async fn test_spawned_runtime_serializes_inputs() {
    let (runtime, _venue) = runtime(config(), Some(PositionSide::Long));
    let handle = runtime.spawn(16);

    handle
        .send(RuntimeInput::Account(AccountState {
            initial_equity: dec!(20000),
            current_equity: dec!(20000),
        }))
        .await
        .unwrap();

    let sender = handle.sender();
    let producer = tokio::spawn(async move {
        for (i, price) in [dec!(1.10000), dec!(1.09800), dec!(1.09600)].into_iter().enumerate() {
            sender
                .send(RuntimeInput::Market(quote(i as i64 * 60, price)))
                .await
                .unwrap();
        }
    });
    producer.await.unwrap();

    let summary = handle.shutdown().await.unwrap();
    assert_eq!(summary.snapshot.equity.initial_equity, dec!(20000));
    assert_eq!(summary.snapshot.baskets.len(), 1);
    let basket = &summary.snapshot.baskets[0];
    assert_eq!(basket.step_index, 3);
    assert_eq!(basket.volume, dec!(0.7));
    assert_eq!(summary.stats.fills, 3);
}
