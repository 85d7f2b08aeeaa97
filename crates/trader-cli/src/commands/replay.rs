//! 리플레이 명령어.
//!
//! 기록된 시장 데이터(JSONL)를 모의 거래소와 함께 엔진에 흘려보내고
//! 체결, 종료된 사이클, 실현 손익, 알림을 요약합니다.
//!
//! # 입력 형식
//!
//! 한 줄에 하나의 시장 이벤트. `bias`가 있으면 이후 줄에도 유지됩니다.
//!
//! ```text
//! {"symbol":"EURUSD","data":{"quote":{"time":"2024-03-04T10:00:00Z","bid":"1.1","ask":"1.1001"}},"bias":"long"}
//! {"symbol":"EURUSD","data":{"candle":{"time":"2024-03-04T10:01:00Z","open":"1.1","high":"1.1005","low":"1.0990","close":"1.0995"}}}
//! ```
//!
//! # 사용 예시
//!
//! ```bash
//! trader replay -c config/grid.toml -e demos/eurusd_quotes.jsonl
//! trader replay -c config/grid.toml -e demos/eurusd_quotes.jsonl --bias short -o commands.json
//! ```

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use trader_core::{FixedBias, MarketEvent, PositionSide};
use trader_execution::PaperVenue;
use trader_grid::{
    Alert, EngineEvent, GridEngine, GridEngineConfig, GridRuntime, RuntimeSummary,
};

/// 리플레이 입력 한 줄.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// 시장 데이터
    #[serde(flatten)]
    pub market: MarketEvent,
    /// 이 줄부터 적용할 진입 방향
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias: Option<PositionSide>,
}

/// 리플레이 옵션.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// 이벤트 파일 경로
    pub events_path: PathBuf,
    /// 처음부터 적용할 진입 방향
    pub bias: Option<PositionSide>,
    /// 명령 로그 저장 경로
    pub output_path: Option<PathBuf>,
}

/// JSONL 이벤트를 읽습니다. 빈 줄과 `#` 주석은 건너뜁니다.
pub fn parse_events(reader: impl BufRead) -> Result<Vec<ReplayRecord>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", index + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: ReplayRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid event on line {}", index + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// 이벤트를 모의 거래소로 재생합니다.
pub async fn replay_records(
    config: GridEngineConfig,
    records: Vec<ReplayRecord>,
    initial_bias: Option<PositionSide>,
) -> Result<RuntimeSummary> {
    let venue = Arc::new(PaperVenue::new(config.instruments.clone()));
    let engine = GridEngine::new(config)?;
    let mut runtime = GridRuntime::new(engine, venue, Arc::new(FixedBias(initial_bias)));

    let mut bias = initial_bias;
    for (index, record) in records.into_iter().enumerate() {
        if record.bias.is_some() {
            bias = record.bias;
        }
        runtime
            .process(EngineEvent::Tick {
                market: record.market,
                bias,
            })
            .await
            .with_context(|| format!("replay stopped at event {}", index + 1))?;
    }

    Ok(runtime.summary())
}

/// 리플레이 명령을 실행하고 요약을 출력합니다.
pub async fn run_replay(config: GridEngineConfig, options: ReplayOptions) -> Result<RuntimeSummary> {
    let file = File::open(&options.events_path)
        .with_context(|| format!("failed to open {}", options.events_path.display()))?;
    let records = parse_events(BufReader::new(file))?;
    info!(events = records.len(), path = %options.events_path.display(), "Replaying events");

    let summary = replay_records(config, records, options.bias).await?;
    print_summary(&summary);

    if let Some(path) = &options.output_path {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &summary.command_log)?;
        println!("명령 로그 저장: {}", path.display());
    }

    Ok(summary)
}

/// 종료된 사이클 수와 실현 손익.
pub fn closed_cycles(summary: &RuntimeSummary) -> (usize, Decimal) {
    summary
        .alerts
        .iter()
        .filter_map(|alert| match alert {
            Alert::BasketClosed { realized_pnl, .. } => Some(*realized_pnl),
            _ => None,
        })
        .fold((0, Decimal::ZERO), |(count, total), pnl| (count + 1, total + pnl))
}

fn print_summary(summary: &RuntimeSummary) {
    let (cycles, cycle_pnl) = closed_cycles(summary);
    let snapshot = &summary.snapshot;

    println!("\n{}", "=".repeat(50));
    println!("리플레이 결과");
    println!("{}", "=".repeat(50));
    println!("처리 이벤트    : {}", summary.stats.events);
    println!("체결           : {}", summary.stats.fills);
    println!("주문 명령      : {}", summary.stats.commands);
    println!("거부           : {}", summary.stats.rejections);
    println!("종료된 사이클  : {} (손익 {})", cycles, cycle_pnl.round_dp(2));
    println!("실현 손익      : {}", snapshot.realized_pnl.round_dp(2));
    println!(
        "자산           : {} (최고 {}, 낙폭 {}%)",
        snapshot.equity.last_equity.round_dp(2),
        snapshot.equity.peak_equity.round_dp(2),
        snapshot.equity.drawdown_percent().round_dp(2)
    );
    if snapshot.halted {
        println!("⚠️  긴급 정지 상태");
    }

    for basket in snapshot.baskets.iter().filter(|b| b.step_index > 0) {
        println!(
            "열린 바스켓    : {} 단계 {} 수량 {} 평균가 {:?}",
            basket.basket, basket.step_index, basket.volume, basket.average_price
        );
    }

    let alerts = summary.alerts.len();
    if alerts > 0 {
        println!("알림           : {}", alerts);
    }
    for alert in &summary.alerts {
        if let Alert::EmergencyCloseFailed { basket, attempts, .. } = alert {
            warn!(basket = %basket, attempts, "Emergency close failed during replay");
        }
    }
}
