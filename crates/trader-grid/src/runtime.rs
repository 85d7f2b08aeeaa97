//! 단일 소비자 비동기 런타임.
//!
//! 시장 데이터, 체결, 주문 상태 변경은 어느 스레드에서든 들어올 수 있지만
//! 모두 원장과 바스켓 상태를 바꾸므로, 하나의 mpsc 채널로 모아 엔진 태스크
//! 하나에서만 처리합니다. 엔진이 낸 명령은 `ExecutionVenue`로 전달되고,
//! 거래소의 실행 보고는 다시 같은 루프로 들어옵니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trader_core::{
    AccountState, FillEvent, MarketEvent, OrderCommand, OrderStatusType, OrderUpdate, SignalGate,
    TraderError, TraderResult,
};
use trader_execution::{ExecutionReport, ExecutionVenue};

use crate::engine::{EngineSnapshot, EngineState, GridEngine};
use crate::events::{Alert, EngineEvent, EngineOutput};

/// 명령/알림 기록의 기본 보관 개수.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// 런타임 채널로 들어오는 입력.
#[derive(Debug, Clone)]
pub enum RuntimeInput {
    /// 계좌 기준 재설정
    Account(AccountState),
    /// 시장 데이터 (신호 게이트로 방향을 읽음)
    Market(MarketEvent),
    /// 외부 체결 통지
    Fill(FillEvent),
    /// 외부 주문 상태 변경
    Update(OrderUpdate),
    /// 루프 종료
    Shutdown,
}

/// 런타임 통계.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    /// 처리한 엔진 이벤트 수
    pub events: u64,
    /// 처리한 체결 수
    pub fills: u64,
    /// 거래소로 보낸 명령 수
    pub commands: u64,
    /// 발생한 알림 수
    pub alerts: u64,
    /// 동기 거부된 제출 수
    pub rejections: u64,
}

/// 런타임 종료 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSummary {
    /// 통계
    pub stats: RuntimeStats,
    /// 거래소로 보낸 최근 명령 (순서대로)
    pub command_log: Vec<OrderCommand>,
    /// 최근 알림
    pub alerts: Vec<Alert>,
    /// 마지막 엔진 상태
    pub snapshot: EngineSnapshot,
}

/// 엔진과 거래소를 잇는 런타임.
pub struct GridRuntime<V: ExecutionVenue> {
    engine: GridEngine,
    state: EngineState,
    venue: Arc<V>,
    gate: Arc<dyn SignalGate>,
    stats: RuntimeStats,
    command_log: VecDeque<OrderCommand>,
    alerts: VecDeque<Alert>,
    log_capacity: usize,
}

impl<V: ExecutionVenue + 'static> GridRuntime<V> {
    /// 새 런타임을 생성합니다.
    pub fn new(engine: GridEngine, venue: Arc<V>, gate: Arc<dyn SignalGate>) -> Self {
        let state = engine.initial_state();
        Self {
            engine,
            state,
            venue,
            gate,
            stats: RuntimeStats::default(),
            command_log: VecDeque::new(),
            alerts: VecDeque::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    /// 명령/알림 기록을 최근 `capacity`개만 보관합니다. 통계는 전체를 셉니다.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    pub fn engine(&self) -> &GridEngine {
        &self.engine
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    /// 보관 중인 최근 알림.
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    /// 시장 데이터 하나를 신호 게이트의 방향과 함께 처리합니다.
    pub async fn on_market(&mut self, market: MarketEvent) -> TraderResult<()> {
        let bias = self.gate.current_bias();
        self.process(EngineEvent::Tick { market, bias }).await
    }

    /// 엔진 이벤트 하나와 그로 인해 생긴 모든 실행 보고를 처리합니다.
    ///
    /// 틱은 먼저 거래소에 전달되어 대기 주문이 트리거되고, 그 체결이 틱보다
    /// 먼저 엔진에 반영됩니다. 긴급 청산이 최종 실패하면 `EmergencyCloseFailed`를
    /// 반환합니다.
    pub async fn process(&mut self, event: EngineEvent) -> TraderResult<()> {
        let mut pending = VecDeque::new();

        if let EngineEvent::Tick { market, .. } = &event {
            self.venue.on_market(market).await?;
            self.collect_reports(&mut pending).await;
        }
        pending.push_back(event);

        let mut failure = None;
        while let Some(event) = pending.pop_front() {
            self.stats.events += 1;
            if matches!(event, EngineEvent::Fill(_)) {
                self.stats.fills += 1;
            }

            let output = match self.engine.apply(&mut self.state, event) {
                Ok(output) => output,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Engine event failed, holding state until next tick");
                    continue;
                }
            };

            if let Some(e) = self.record(&output) {
                failure.get_or_insert(e);
            }
            for command in output.commands {
                self.dispatch(command, &mut pending).await?;
            }

            if pending.is_empty() {
                self.collect_reports(&mut pending).await;
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 현재 상태로 종료 요약을 만듭니다.
    pub fn summary(&self) -> RuntimeSummary {
        RuntimeSummary {
            stats: self.stats.clone(),
            command_log: self.command_log.iter().cloned().collect(),
            alerts: self.alerts.iter().cloned().collect(),
            snapshot: self.state.snapshot(),
        }
    }

    /// 런타임을 tokio 태스크로 띄우고 입력 채널을 반환합니다.
    pub fn spawn(self, buffer: usize) -> RuntimeHandle {
        let (tx, rx) = mpsc::channel(buffer);
        let join = tokio::spawn(self.run(rx));
        RuntimeHandle { tx, join }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RuntimeInput>) -> TraderResult<RuntimeSummary> {
        info!(venue = self.venue.name(), "Grid runtime started");

        while let Some(input) = rx.recv().await {
            let result = match input {
                RuntimeInput::Shutdown => break,
                RuntimeInput::Market(market) => self.on_market(market).await,
                RuntimeInput::Account(account) => {
                    self.process(EngineEvent::ConfigLoaded { account }).await
                }
                RuntimeInput::Fill(fill) => self.process(EngineEvent::Fill(fill)).await,
                RuntimeInput::Update(update) => self.process(EngineEvent::OrderUpdate(update)).await,
            };

            if let Err(e) = result {
                error!(error = %e, "Grid runtime stopped");
                return Err(e);
            }
        }

        let summary = self.summary();
        info!(
            events = summary.stats.events,
            fills = summary.stats.fills,
            commands = summary.stats.commands,
            "Grid runtime stopped"
        );
        Ok(summary)
    }

    /// 알림을 기록하고, 긴급 청산 실패가 있으면 에러로 바꿉니다.
    fn record(&mut self, output: &EngineOutput) -> Option<TraderError> {
        self.stats.alerts += output.alerts.len() as u64;
        for alert in &output.alerts {
            push_bounded(&mut self.alerts, alert.clone(), self.log_capacity);
        }

        output.alerts.iter().find_map(|alert| match alert {
            Alert::EmergencyCloseFailed { basket, attempts, .. } => {
                Some(TraderError::EmergencyCloseFailed {
                    symbol: basket.group.clone(),
                    attempts: *attempts,
                })
            }
            _ => None,
        })
    }

    async fn dispatch(
        &mut self,
        command: OrderCommand,
        pending: &mut VecDeque<EngineEvent>,
    ) -> TraderResult<()> {
        self.stats.commands += 1;
        push_bounded(&mut self.command_log, command.clone(), self.log_capacity);

        match command {
            OrderCommand::Submit(intent) => match self.venue.submit(&intent).await {
                Ok(handle) => {
                    debug!(handle = %handle, symbol = %intent.symbol, "Order submitted");
                }
                Err(TraderError::OrderRejected { handle, reason }) => {
                    self.stats.rejections += 1;
                    warn!(handle = %handle, symbol = %intent.symbol, reason = %reason, "Order rejected by venue");
                    pending.push_back(EngineEvent::OrderUpdate(OrderUpdate {
                        handle,
                        status: OrderStatusType::Rejected,
                        reason: Some(reason),
                        time: self.clock(),
                    }));
                }
                Err(e) => return Err(e),
            },
            OrderCommand::Cancel { handle, symbol } => {
                self.venue.cancel(&symbol, handle).await?;
            }
        }
        Ok(())
    }

    async fn collect_reports(&self, pending: &mut VecDeque<EngineEvent>) {
        for report in self.venue.drain_reports().await {
            pending.push_back(match report {
                ExecutionReport::Fill(fill) => EngineEvent::Fill(fill),
                ExecutionReport::Update(update) => EngineEvent::OrderUpdate(update),
            });
        }
    }

    /// 엔진 시계 (마지막 틱 시각).
    fn clock(&self) -> DateTime<Utc> {
        self.state.last_time().unwrap_or_else(Utc::now)
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, item: T, capacity: usize) {
    if log.len() >= capacity {
        log.pop_front();
    }
    log.push_back(item);
}

/// 실행 중인 런타임 태스크 핸들.
#[derive(Debug)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<RuntimeInput>,
    join: JoinHandle<TraderResult<RuntimeSummary>>,
}

impl RuntimeHandle {
    /// 입력 송신자. 여러 생산자가 복제해서 쓸 수 있습니다.
    pub fn sender(&self) -> mpsc::Sender<RuntimeInput> {
        self.tx.clone()
    }

    /// 입력 하나를 보냅니다.
    pub async fn send(&self, input: RuntimeInput) -> TraderResult<()> {
        self.tx
            .send(input)
            .await
            .map_err(|e| TraderError::Channel(e.to_string()))
    }

    /// 종료를 요청하고 요약을 기다립니다.
    ///
    /// 런타임이 먼저 에러로 멈췄다면 그 에러를 반환합니다.
    pub async fn shutdown(self) -> TraderResult<RuntimeSummary> {
        // 이미 멈춘 루프에는 보낼 수 없으므로 실패는 무시
        let _ = self.tx.send(RuntimeInput::Shutdown).await;
        self.join
            .await
            .map_err(|e| TraderError::Channel(e.to_string()))?
    }
}
