//! 이벤트 기반 그리드 엔진.
//!
//! `GridEngine::handle(state, event) -> (state, output)` 하나로 모든 입력을
//! 처리합니다. 엔진 자체는 불변 설정만 들고 있고, 변하는 상태는 전부
//! `EngineState`에 있으므로 기록된 이벤트 로그로 그대로 재현할 수 있습니다.
//!
//! 틱 처리 순서:
//! 1. 자산 낙폭 긴급 정지
//! 2. 세션 강제 청산
//! 3. 실패한 청산 재제출, 바스켓 밖 초과 체결 로트 정리
//! 4. 손절/익절 도달, 부분 청산
//! 5. 바스켓 목표 수익/손실 한도 (히스테리시스)
//! 6. 트레일링/본전 스톱 갱신
//! 7. 신규/추가 진입
//!
//! 청산 판단이 항상 진입보다 먼저입니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, warn};
use trader_core::{
    basket_span, AccountState, CloseReason, FillEvent, InstrumentMeta, MarketEvent, OrderCommand,
    OrderIntent, OrderPurpose, OrderStatusType, OrderUpdate, PositionSide, Price, Quantity,
    TraderError, TraderResult,
};
use trader_execution::{OrderManager, OrderStats, PositionLedger, ProtectiveLeg, ProtectiveTarget};
use trader_risk::{
    floating_pnl, BasketKey, BasketRiskEvaluator, EquityGuard, Exposure, MoneyManager,
    PartialExit, ProgressionEngine, ProtectiveLevelManager, ProtectiveMode, ProtectiveParams,
    ProtectivePhase, SessionGuard, TrailTier,
};

use crate::basket::Basket;
use crate::config::GridEngineConfig;
use crate::events::{Alert, EngineEvent, EngineOutput};
use crate::sequencer::{EntryDecision, GridSequencer};

/// 엔진의 가변 상태.
#[derive(Debug)]
pub struct EngineState {
    baskets: BTreeMap<BasketKey, Basket>,
    ledger: PositionLedger,
    orders: OrderManager,
    protective: ProtectiveLevelManager,
    risk: BasketRiskEvaluator,
    equity: EquityGuard,
    marks: HashMap<String, MarketEvent>,
    realized_pnl: Decimal,
    halted: bool,
    last_time: Option<DateTime<Utc>>,
}

impl EngineState {
    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn protective(&self) -> &ProtectiveLevelManager {
        &self.protective
    }

    pub fn equity(&self) -> &EquityGuard {
        &self.equity
    }

    pub fn basket(&self, key: &BasketKey) -> Option<&Basket> {
        self.baskets.get(key)
    }

    pub fn baskets(&self) -> impl Iterator<Item = &Basket> {
        self.baskets.values()
    }

    /// 누적 실현 손익.
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    /// 마지막으로 처리한 틱 시각.
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.last_time
    }

    /// 긴급 정지로 새 진입이 중단되었는지.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// 로그/CLI용 직렬화 가능한 상태 요약.
    pub fn snapshot(&self) -> EngineSnapshot {
        let baskets = self
            .baskets
            .values()
            .map(|basket| {
                let key = basket.key();
                let protective = self.protective.get(key);
                BasketSnapshot {
                    basket: key.clone(),
                    step_index: basket.step_index(),
                    volume: self.ledger.total_volume(&key.group, key.side),
                    average_price: self.ledger.weighted_average_price(&key.group, key.side),
                    stop_price: protective.and_then(|p| p.stop_price),
                    take_price: protective.and_then(|p| p.take_price),
                    phase: protective.map_or(ProtectivePhase::Unarmed, |p| p.phase),
                    tier: protective.map_or(TrailTier::None, |p| p.tier),
                    cycle_pnl: basket.cycle_pnl(),
                    cycles: basket.cycles(),
                    recent_losses: basket.loss_history().recent().filter(|loss| *loss).count(),
                    closing: basket.closing().map(|c| c.reason),
                }
            })
            .collect();

        EngineSnapshot {
            time: self.last_time,
            baskets,
            realized_pnl: self.realized_pnl,
            equity: self.equity.clone(),
            halted: self.halted,
            orders: self.orders.stats(),
        }
    }
}

/// 바스켓 한 방향의 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketSnapshot {
    /// 바스켓
    pub basket: BasketKey,
    /// 그리드 깊이
    pub step_index: u32,
    /// 총 수량
    pub volume: Quantity,
    /// 평균 진입가
    pub average_price: Option<Price>,
    /// 손절가
    pub stop_price: Option<Price>,
    /// 익절가
    pub take_price: Option<Price>,
    /// 보호 가격 단계
    pub phase: ProtectivePhase,
    /// 부분 청산 단계
    pub tier: TrailTier,
    /// 이번 사이클 실현 손익
    pub cycle_pnl: Decimal,
    /// 종료된 사이클 수
    pub cycles: u32,
    /// 기록된 손실 사이클 수
    pub recent_losses: usize,
    /// 진행 중인 청산 사유
    pub closing: Option<CloseReason>,
}

/// 엔진 상태 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// 마지막 이벤트 시각
    pub time: Option<DateTime<Utc>>,
    /// 바스켓별 요약
    pub baskets: Vec<BasketSnapshot>,
    /// 누적 실현 손익
    pub realized_pnl: Decimal,
    /// 자산 가드
    pub equity: EquityGuard,
    /// 긴급 정지 여부
    pub halted: bool,
    /// 주문 통계
    pub orders: OrderStats,
}

/// 그리드 엔진.
#[derive(Debug)]
pub struct GridEngine {
    config: GridEngineConfig,
    instruments: HashMap<String, InstrumentMeta>,
    params: HashMap<String, ProtectiveParams>,
    sequencer: GridSequencer,
    session: SessionGuard,
}

impl GridEngine {
    /// 설정을 검증하고 엔진을 생성합니다. 잘못된 설정이면 거래 시작 전에 실패합니다.
    pub fn new(config: GridEngineConfig) -> TraderResult<Self> {
        config.validate()?;

        let instruments: HashMap<String, InstrumentMeta> = config
            .instruments
            .iter()
            .map(|m| (m.symbol.clone(), m.clone()))
            .collect();
        let params = instruments
            .values()
            .map(|m| (m.symbol.clone(), config.protective.to_params(&m.converter())))
            .collect();
        let sequencer = GridSequencer::new(
            config.grid.clone(),
            ProgressionEngine::new(config.progression.clone())?,
            MoneyManager::new(config.money_management.clone()),
        );
        let session = SessionGuard::new(config.session.clone());

        info!(
            instruments = instruments.len(),
            max_depth = config.grid.max_depth,
            progression = ?config.progression.kind,
            protective_mode = ?config.execution.protective_mode,
            "Grid engine created"
        );

        Ok(Self {
            config,
            instruments,
            params,
            sequencer,
            session,
        })
    }

    pub fn config(&self) -> &GridEngineConfig {
        &self.config
    }

    /// 종목 메타데이터.
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentMeta> {
        self.instruments.get(symbol)
    }

    /// 빈 초기 상태.
    pub fn initial_state(&self) -> EngineState {
        EngineState {
            baskets: BTreeMap::new(),
            ledger: PositionLedger::new(),
            orders: OrderManager::new(),
            protective: ProtectiveLevelManager::new(),
            risk: BasketRiskEvaluator::new(self.config.basket.clone()),
            equity: EquityGuard::new(self.config.initial_equity, &self.config.equity),
            marks: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            halted: false,
            last_time: None,
        }
    }

    /// 이벤트 하나를 처리합니다.
    pub fn handle(
        &self,
        state: EngineState,
        event: EngineEvent,
    ) -> TraderResult<(EngineState, EngineOutput)> {
        let mut state = state;
        let output = self.apply(&mut state, event)?;
        Ok((state, output))
    }

    /// 상태를 제자리에서 갱신하는 `handle`.
    ///
    /// 에러가 나도 그때까지 반영된 상태는 유지되므로, 런타임은 복구 가능한
    /// 에러를 로그로 남기고 다음 이벤트를 계속 처리할 수 있습니다.
    pub fn apply(&self, state: &mut EngineState, event: EngineEvent) -> TraderResult<EngineOutput> {
        let mut output = EngineOutput::default();

        match event {
            EngineEvent::ConfigLoaded { account } => self.on_config_loaded(state, account),
            EngineEvent::Tick { market, bias } => {
                let span = basket_span!("grid_tick", market.symbol);
                let _guard = span.enter();
                self.on_tick(state, &market, bias, &mut output)?;
            }
            EngineEvent::Fill(fill) => self.on_fill(state, &fill, &mut output),
            EngineEvent::OrderUpdate(update) => self.on_update(state, &update, &mut output)?,
        }

        Ok(output)
    }

    fn on_config_loaded(&self, state: &mut EngineState, account: AccountState) {
        state.equity = EquityGuard::new(account.initial_equity, &self.config.equity);
        info!(
            initial_equity = %account.initial_equity,
            current_equity = %account.current_equity,
            "Account baseline loaded"
        );
    }

    fn on_tick(
        &self,
        state: &mut EngineState,
        market: &MarketEvent,
        bias: Option<PositionSide>,
        out: &mut EngineOutput,
    ) -> TraderResult<()> {
        let symbol = market.symbol.as_str();
        let Some(meta) = self.instruments.get(symbol) else {
            warn!(symbol, "Tick for unknown instrument ignored");
            return Ok(());
        };
        let time = market.time();
        state.last_time = Some(time);
        state.marks.insert(symbol.to_string(), market.clone());

        // 1. 자산 낙폭
        let equity = state.equity.initial_equity + state.realized_pnl + self.floating_total(state);
        if let Some(kind) = state.equity.update(equity) {
            if !state.halted {
                state.halted = true;
                error!(
                    equity = %equity,
                    peak = %state.equity.peak_equity,
                    "Equity stop triggered, halting new entries"
                );
                out.alerts.push(Alert::EngineHalted {
                    equity,
                    peak_equity: state.equity.peak_equity,
                    time,
                });
            }
            self.close_all(state, kind.into(), time, out);
            return Ok(());
        }

        // 2. 세션
        if let Some(kind) = self.session.evaluate(time) {
            self.close_all(state, kind.into(), time, out);
            return Ok(());
        }

        // 3. 실패한 청산 재제출, 바스켓 밖 초과 체결 로트 정리
        for side in PositionSide::BOTH {
            let key = BasketKey::new(symbol, side);
            let retry = state
                .baskets
                .get(&key)
                .and_then(|b| b.closing())
                .filter(|c| c.handle.is_none())
                .map(|c| c.reason);
            if let Some(reason) = retry {
                debug!(basket = %key, reason = %reason, "Resubmitting basket close");
                self.close_basket(state, &key, reason, time, out);
            }

            if state.baskets.get(&key).map_or(true, Basket::is_flat) {
                let excess = state.ledger.total_volume(symbol, side)
                    - state.orders.pending_exit_volume(&key);
                if excess > Decimal::ZERO {
                    self.flatten_excess(state, &key, excess, time, out);
                }
            }
        }

        // 4. 손절/익절, 부분 청산
        for side in PositionSide::BOTH {
            let key = BasketKey::new(symbol, side);
            if !self.is_active(state, &key) {
                continue;
            }

            if self.config.execution.protective_mode == ProtectiveMode::Virtual {
                let (low, high) = market.exit_range(side);
                if let Some(reason) = state.protective.check_exit(&key, low, high) {
                    self.close_basket(state, &key, reason.into(), time, out);
                    continue;
                }
            }

            if let Some(partial) = state.protective.check_partial_exit(&key, market.exit_price(side)) {
                self.partial_exit(state, &key, meta, partial, time, out);
            }
        }

        // 5. 바스켓 손익 (히스테리시스)
        let decisions = {
            let exposures: Vec<Exposure<'_>> = state
                .baskets
                .values()
                .filter(|b| !b.is_flat())
                .filter_map(|b| {
                    let key = b.key();
                    let meta = self.instruments.get(&key.group)?;
                    let mark = state.marks.get(&key.group)?.exit_price(key.side);
                    Some(Exposure {
                        key,
                        lots: state.ledger.lots(&key.group, key.side),
                        meta,
                        mark,
                    })
                })
                .collect();
            state.risk.evaluate(&exposures)
        };
        for decision in decisions {
            for key in &decision.members {
                if self.is_active(state, key) {
                    self.close_basket(state, key, decision.kind.into(), time, out);
                }
            }
        }

        // 6. 트레일링/본전 스톱
        for side in PositionSide::BOTH {
            let key = BasketKey::new(symbol, side);
            if !self.is_active(state, &key) {
                continue;
            }
            let price = market.exit_price(side);
            let break_even = state.protective.update_break_even(&key, price);
            let trailing = state.protective.update_trailing(&key, price);
            if break_even.is_some() || trailing.is_some() {
                self.protective_changed(state, &key, meta, time, out);
            }
        }

        // 7. 진입
        if state.halted {
            return Ok(());
        }
        if !state.equity.allows_entry() {
            debug!(equity = %state.equity.last_equity, "Equity below floor, entries skipped");
            return Ok(());
        }
        self.evaluate_entries(state, market, meta, bias, out)
    }

    fn evaluate_entries(
        &self,
        state: &mut EngineState,
        market: &MarketEvent,
        meta: &InstrumentMeta,
        bias: Option<PositionSide>,
        out: &mut EngineOutput,
    ) -> TraderResult<()> {
        let symbol = market.symbol.as_str();
        let time = market.time();

        // 추가 레벨
        let mut any_open = false;
        for side in PositionSide::BOTH {
            let key = BasketKey::new(symbol, side);
            let Some(basket) = state.baskets.get(&key) else {
                continue;
            };
            if basket.is_flat() && basket.is_idle() {
                continue;
            }
            any_open = true;
            if basket.is_flat() {
                continue;
            }

            let decision = self
                .sequencer
                .next_entry(basket, market.entry_price(side), time, meta)?;
            if let EntryDecision::Open {
                step,
                volume,
                base_volume,
            } = decision
            {
                self.submit_entry(state, &key, step, volume, base_volume, time, out);
            }
        }
        if any_open {
            return Ok(());
        }

        // 새 바스켓: 종목 양방향이 모두 플랫일 때만
        if PositionSide::BOTH
            .into_iter()
            .any(|side| !state.ledger.is_flat(symbol, side))
        {
            debug!(symbol, "Lots outside baskets still open, new basket deferred");
            return Ok(());
        }
        let Some(side) = self
            .sequencer
            .entry_side(symbol, bias, &self.config.basket.pairs)
        else {
            return Ok(());
        };
        let key = BasketKey::new(symbol, side);
        let money = self.sequencer.money();
        let basket = state
            .baskets
            .entry(key.clone())
            .or_insert_with(|| Basket::new(key.clone(), money.new_history()));

        match self.sequencer.first_entry(basket, meta)? {
            EntryDecision::Open {
                step,
                volume,
                base_volume,
            } => {
                // 새 사이클: 이전 사이클의 끝난 주문 기록 정리
                for side in PositionSide::BOTH {
                    state.orders.prune_finished(&BasketKey::new(symbol, side));
                }
                self.submit_entry(state, &key, step, volume, base_volume, time, out);
            }
            EntryDecision::Skip(reason) => {
                debug!(basket = %key, reason = ?reason, "First entry skipped");
            }
        }
        Ok(())
    }

    fn on_fill(&self, state: &mut EngineState, fill: &FillEvent, out: &mut EngineOutput) {
        let Some(record) = state.orders.record_fill(fill) else {
            warn!(handle = %fill.handle, symbol = %fill.symbol, "Fill for unknown order ignored");
            return;
        };
        let intent = record.intent.clone();
        let first_fill = record.filled_volume == fill.volume;
        let completed = record.status == OrderStatusType::Filled;

        let Some(meta) = self.instruments.get(&fill.symbol) else {
            warn!(symbol = %fill.symbol, "Fill for unknown instrument ignored");
            return;
        };

        let outcome = state
            .ledger
            .record_fill(&fill.symbol, fill.side, fill.price, fill.volume, fill.time);

        let mut reduced: Vec<PositionSide> = Vec::new();
        for closed in &outcome.closed {
            let pnl = closed.pnl(meta);
            state.realized_pnl += pnl;
            let key = BasketKey::new(&closed.symbol, closed.side);
            if let Some(basket) = state.baskets.get_mut(&key) {
                basket.add_realized(pnl);
            }
            if !reduced.contains(&closed.side) {
                reduced.push(closed.side);
            }
        }

        if let OrderPurpose::GridEntry { .. } = intent.purpose {
            let key = BasketKey::new(&intent.symbol, intent.basket_side);
            if completed {
                if let Some(basket) = state.baskets.get_mut(&key) {
                    basket.entry_finished(fill.handle);
                }
            }
        }

        if let Some(lot) = &outcome.opened {
            let key = BasketKey::new(&fill.symbol, lot.side());
            let is_entry = matches!(intent.purpose, OrderPurpose::GridEntry { .. })
                && intent.basket_side == lot.side();

            if !is_entry {
                // 청산 주문의 초과 체결: 바스켓으로 받지 않고 즉시 되돌림
                warn!(
                    basket = %key,
                    handle = %fill.handle,
                    purpose = ?intent.purpose,
                    excess = %lot.volume(),
                    "Exit order overfilled, flattening excess"
                );
                self.flatten_excess(state, &key, lot.volume(), fill.time, out);
            } else {
                self.entry_lot_opened(state, &key, fill, first_fill, meta, out);
            }
        }

        for side in reduced {
            let key = BasketKey::new(&fill.symbol, side);
            if state.ledger.is_flat(&fill.symbol, side) {
                self.finish_basket(state, &key, intent.purpose, fill.time, out);
                continue;
            }

            let Some(basket) = state.baskets.get_mut(&key) else {
                continue;
            };
            if basket.closing().is_none() {
                state.protective.reopen(&key);
            } else if completed && matches!(intent.purpose, OrderPurpose::BasketClose { .. }) {
                warn!(basket = %key, handle = %fill.handle, "Basket close filled with volume left, closing remainder on next tick");
                basket.close_left_remainder(fill.handle);
            }
            self.refresh_protective(state, &key, meta, fill.time, out);
        }
    }

    /// 진입 주문 체결로 로트가 생겼습니다. 첫 체결이면 단계를 확정합니다.
    fn entry_lot_opened(
        &self,
        state: &mut EngineState,
        key: &BasketKey,
        fill: &FillEvent,
        first_fill: bool,
        meta: &InstrumentMeta,
        out: &mut EngineOutput,
    ) {
        let money = self.sequencer.money();
        let basket = state
            .baskets
            .entry(key.clone())
            .or_insert_with(|| Basket::new(key.clone(), money.new_history()));

        if first_fill {
            basket.entry_filled(fill.price, fill.time);
            let depth = basket.step_index();
            let average_price = state
                .ledger
                .weighted_average_price(&fill.symbol, key.side)
                .unwrap_or(fill.price);
            info!(
                basket = %key,
                depth,
                price = %fill.price,
                volume = %fill.volume,
                average = %average_price,
                "Grid level opened"
            );
            out.alerts.push(Alert::GridLevelOpened {
                basket: key.clone(),
                depth,
                price: fill.price,
                volume: fill.volume,
                average_price,
                time: fill.time,
            });
        }

        self.refresh_protective(state, key, meta, fill.time, out);
    }

    fn on_update(
        &self,
        state: &mut EngineState,
        update: &OrderUpdate,
        out: &mut EngineOutput,
    ) -> TraderResult<()> {
        let intent = state.orders.get(update.handle).map(|r| r.intent.clone());

        match state.orders.on_update(update) {
            Ok(commands) => out.commands.extend(commands),
            Err(TraderError::StaleProtectiveOrder(reason)) => {
                warn!(handle = %update.handle, reason = %reason, "Stale protective order, re-deriving from ledger");
                if let Some(intent) = &intent {
                    let key = BasketKey::new(&intent.symbol, intent.basket_side);
                    if let Some(meta) = self.instruments.get(&intent.symbol) {
                        self.refresh_protective(state, &key, meta, update.time, out);
                    }
                }
            }
            Err(e) => return Err(e),
        }

        let Some(intent) = intent else {
            return Ok(());
        };
        if !update.status.is_final() || update.status == OrderStatusType::Filled {
            return Ok(());
        }

        let key = BasketKey::new(&intent.symbol, intent.basket_side);
        match intent.purpose {
            OrderPurpose::GridEntry { step } => {
                if let Some(basket) = state.baskets.get_mut(&key) {
                    basket.entry_finished(update.handle);
                }
                warn!(
                    basket = %key,
                    step,
                    status = ?update.status,
                    reason = ?update.reason,
                    "Grid entry not filled, retrying on next eligible tick"
                );
            }
            OrderPurpose::BasketClose { reason } => {
                let Some(attempts) = state
                    .baskets
                    .get_mut(&key)
                    .and_then(|b| b.close_failed(update.handle))
                else {
                    return Ok(());
                };

                if !reason.is_emergency() {
                    warn!(basket = %key, reason = %reason, attempts, "Basket close not filled, retrying on next tick");
                } else if attempts > self.config.execution.emergency_retry_limit {
                    error!(
                        basket = %key,
                        reason = %reason,
                        attempts,
                        "Emergency close failed, manual intervention required"
                    );
                    if let Some(basket) = state.baskets.get_mut(&key) {
                        basket.abandon_close();
                    }
                    state.halted = true;
                    out.alerts.push(Alert::EmergencyCloseFailed {
                        basket: key,
                        attempts,
                        time: update.time,
                    });
                } else {
                    warn!(basket = %key, reason = %reason, attempts, "Emergency close rejected, retrying immediately");
                    self.close_basket(state, &key, reason, update.time, out);
                }
            }
            OrderPurpose::PartialExit { tier } => {
                warn!(basket = %key, tier, status = ?update.status, "Partial exit not filled");
            }
            OrderPurpose::ExcessFlatten => {
                warn!(
                    basket = %key,
                    status = ?update.status,
                    reason = ?update.reason,
                    "Excess flatten not filled, retrying on next tick"
                );
            }
            OrderPurpose::ProtectiveStop | OrderPurpose::ProtectiveTake => {
                debug!(basket = %key, status = ?update.status, "Protective order finished without fill");
            }
        }
        Ok(())
    }

    /// 열려 있고 청산 중이 아닌 바스켓인지.
    fn is_active(&self, state: &EngineState, key: &BasketKey) -> bool {
        state
            .baskets
            .get(key)
            .is_some_and(|b| !b.is_flat() && b.closing().is_none())
    }

    fn floating_total(&self, state: &EngineState) -> Decimal {
        state
            .baskets
            .values()
            .filter(|b| !b.is_flat())
            .filter_map(|b| {
                let key = b.key();
                let meta = self.instruments.get(&key.group)?;
                let mark = state.marks.get(&key.group)?.exit_price(key.side);
                Some(floating_pnl(state.ledger.lots(&key.group, key.side), meta, mark))
            })
            .sum()
    }

    #[allow(clippy::too_many_arguments)]
    fn submit_entry(
        &self,
        state: &mut EngineState,
        key: &BasketKey,
        step: u32,
        volume: Quantity,
        base_volume: Quantity,
        time: DateTime<Utc>,
        out: &mut EngineOutput,
    ) {
        let Some(basket) = state.baskets.get_mut(key) else {
            return;
        };
        let handle = state.orders.next_handle();
        let intent = OrderIntent::market(
            handle,
            key.group.clone(),
            key.side.entry_side(),
            volume,
            key.side,
            OrderPurpose::GridEntry { step },
        );
        state.orders.track(intent.clone(), time);
        basket.entry_submitted(handle, base_volume);
        info!(basket = %key, step, volume = %volume, handle = %handle, "Submitting grid entry");
        out.commands.push(OrderCommand::Submit(intent));
    }

    fn close_all(
        &self,
        state: &mut EngineState,
        reason: CloseReason,
        time: DateTime<Utc>,
        out: &mut EngineOutput,
    ) {
        let keys: Vec<BasketKey> = state
            .baskets
            .values()
            .filter(|b| !b.is_flat())
            .map(|b| b.key().clone())
            .collect();
        for key in keys {
            self.close_basket(state, &key, reason, time, out);
        }
    }

    /// 바스켓 전체를 시장가로 청산합니다. 이미 청산 주문이 나가 있으면 무시합니다.
    ///
    /// 같은 틱에 나간 부분 청산처럼 아직 체결되지 않은 청산 수량은 빼고 주문합니다.
    fn close_basket(
        &self,
        state: &mut EngineState,
        key: &BasketKey,
        reason: CloseReason,
        time: DateTime<Utc>,
        out: &mut EngineOutput,
    ) {
        let volume = self.available_volume(state, key);
        let Some(basket) = state.baskets.get_mut(key) else {
            return;
        };
        if volume <= Decimal::ZERO || basket.closing().is_some_and(|c| c.handle.is_some()) {
            return;
        }

        if self.config.execution.protective_mode == ProtectiveMode::Resting {
            out.commands.extend(state.orders.cancel_protective(key, time));
        }

        let handle = state.orders.next_handle();
        let intent = OrderIntent::market(
            handle,
            key.group.clone(),
            key.side.exit_side(),
            volume,
            key.side,
            OrderPurpose::BasketClose { reason },
        );
        state.orders.track(intent.clone(), time);
        basket.begin_close(reason, handle);
        info!(basket = %key, reason = %reason, volume = %volume, handle = %handle, "Closing basket");
        out.commands.push(OrderCommand::Submit(intent));
    }

    fn partial_exit(
        &self,
        state: &mut EngineState,
        key: &BasketKey,
        meta: &InstrumentMeta,
        partial: PartialExit,
        time: DateTime<Utc>,
        out: &mut EngineOutput,
    ) {
        let total = state.ledger.total_volume(&key.group, key.side);
        let available = self.available_volume(state, key);
        let volume = meta.floor_volume(total * partial.fraction).min(available);
        if volume < meta.min_volume {
            debug!(basket = %key, tier = ?partial.tier, volume = %volume, "Partial exit below min volume, skipped");
            return;
        }
        if volume >= available {
            self.close_basket(state, key, CloseReason::TakeHit, time, out);
            return;
        }

        let handle = state.orders.next_handle();
        let intent = OrderIntent::market(
            handle,
            key.group.clone(),
            key.side.exit_side(),
            volume,
            key.side,
            OrderPurpose::PartialExit {
                tier: partial.tier.number(),
            },
        );
        state.orders.track(intent.clone(), time);
        info!(basket = %key, tier = ?partial.tier, volume = %volume, "Submitting partial exit");
        out.commands.push(OrderCommand::Submit(intent));
    }

    /// 원장 수량에서 체결 대기 중인 청산 수량을 뺀 값.
    fn available_volume(&self, state: &EngineState, key: &BasketKey) -> Quantity {
        state.ledger.total_volume(&key.group, key.side) - state.orders.pending_exit_volume(key)
    }

    /// 바스켓에 속하지 않은 초과 체결 로트를 시장가로 되돌립니다.
    fn flatten_excess(
        &self,
        state: &mut EngineState,
        key: &BasketKey,
        volume: Quantity,
        time: DateTime<Utc>,
        out: &mut EngineOutput,
    ) {
        let handle = state.orders.next_handle();
        let intent = OrderIntent::market(
            handle,
            key.group.clone(),
            key.side.exit_side(),
            volume,
            key.side,
            OrderPurpose::ExcessFlatten,
        );
        state.orders.track(intent.clone(), time);
        info!(basket = %key, volume = %volume, handle = %handle, "Flattening excess position");
        out.commands.push(OrderCommand::Submit(intent));
    }

    /// 원장 기준으로 보호 가격을 설정/재계산합니다.
    fn refresh_protective(
        &self,
        state: &mut EngineState,
        key: &BasketKey,
        meta: &InstrumentMeta,
        time: DateTime<Utc>,
        out: &mut EngineOutput,
    ) {
        let Some(average) = state.ledger.weighted_average_price(&key.group, key.side) else {
            state.protective.clear(key);
            return;
        };
        let params = self.params.get(&key.group).cloned().unwrap_or_default();
        let change = state.protective.arm(key, average, params);
        if change.any() {
            self.protective_changed(state, key, meta, time, out);
        } else {
            self.sync_resting(state, key, meta, time, out);
        }
    }

    fn protective_changed(
        &self,
        state: &mut EngineState,
        key: &BasketKey,
        meta: &InstrumentMeta,
        time: DateTime<Utc>,
        out: &mut EngineOutput,
    ) {
        let Some(levels) = state.protective.get(key) else {
            return;
        };
        info!(basket = %key, stop = ?levels.stop_price, take = ?levels.take_price, "Protective level updated");
        out.alerts.push(Alert::ProtectiveUpdated {
            basket: key.clone(),
            stop: levels.stop_price,
            take: levels.take_price,
            time,
        });
        self.sync_resting(state, key, meta, time, out);
    }

    /// `resting` 모드에서 거래소 보호 주문을 현재 가격/수량에 맞춥니다.
    fn sync_resting(
        &self,
        state: &mut EngineState,
        key: &BasketKey,
        meta: &InstrumentMeta,
        time: DateTime<Utc>,
        out: &mut EngineOutput,
    ) {
        if self.config.execution.protective_mode != ProtectiveMode::Resting {
            return;
        }
        let Some(levels) = state.protective.get(key) else {
            return;
        };
        let volume = state.ledger.total_volume(&key.group, key.side);
        let target = |price: Option<Price>| {
            price.map(|p| ProtectiveTarget {
                price: meta.round_price(p),
                volume,
            })
        };
        let stop = target(levels.stop_price);
        let take = target(levels.take_price);

        out.commands
            .extend(state.orders.sync_protective(key, ProtectiveLeg::Stop, stop, time));
        out.commands
            .extend(state.orders.sync_protective(key, ProtectiveLeg::Take, take, time));
    }

    /// 바스켓이 플랫이 되면 사이클을 마감합니다.
    fn finish_basket(
        &self,
        state: &mut EngineState,
        key: &BasketKey,
        purpose: OrderPurpose,
        time: DateTime<Utc>,
        out: &mut EngineOutput,
    ) {
        let Some(basket) = state.baskets.get_mut(key) else {
            return;
        };
        if basket.is_flat() {
            return;
        }

        let reason = basket
            .closing()
            .map(|c| c.reason)
            .unwrap_or_else(|| close_reason_of(purpose));
        let result = basket.finish_cycle();
        state.protective.clear(key);
        if self.config.execution.protective_mode == ProtectiveMode::Resting {
            out.commands.extend(state.orders.cancel_protective(key, time));
        }

        info!(
            basket = %key,
            reason = %reason,
            steps = result.steps,
            pnl = %result.realized_pnl,
            loss = result.loss,
            "Basket closed"
        );
        out.alerts.push(Alert::BasketClosed {
            basket: key.clone(),
            reason,
            steps: result.steps,
            realized_pnl: result.realized_pnl,
            time,
        });
    }
}

/// 청산 사유가 기록되지 않은 체결의 사유.
fn close_reason_of(purpose: OrderPurpose) -> CloseReason {
    match purpose {
        OrderPurpose::BasketClose { reason } => reason,
        OrderPurpose::ProtectiveStop => CloseReason::StopHit,
        OrderPurpose::ProtectiveTake | OrderPurpose::PartialExit { .. } => CloseReason::TakeHit,
        OrderPurpose::GridEntry { .. } | OrderPurpose::ExcessFlatten => CloseReason::ForceFlatten,
    }
}
