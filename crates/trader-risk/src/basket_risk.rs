//! 바스켓 단위 청산 판단.
//!
//! - 부동 손익 합산 (방향별 / 전체 / 종목 쌍별)
//! - 목표 수익 / 손실 한도에 대한 히스테리시스 카운터
//! - 최고 자산 대비 낙폭 긴급 정지 (`EquityGuard`)
//! - 거래 시간 외 강제 청산 (`SessionGuard`)

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trader_core::{CloseReason, InstrumentMeta, PositionLot, Price};

use crate::config::{BasketMode, BasketRiskConfig, EquityConfig, SessionConfig};
use crate::key::BasketKey;

/// 바스켓 청산 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    /// 목표 수익 도달
    ProfitTarget,
    /// 손실 한도 도달
    LossLimit,
    /// 자산 낙폭 긴급 정지
    EquityStop,
    /// 세션 외 강제 청산
    ForceFlatten,
}

impl CloseKind {
    /// 긴급 청산 여부.
    pub fn is_emergency(&self) -> bool {
        matches!(self, CloseKind::EquityStop | CloseKind::ForceFlatten)
    }
}

impl From<CloseKind> for CloseReason {
    fn from(kind: CloseKind) -> Self {
        match kind {
            CloseKind::ProfitTarget => CloseReason::ProfitTarget,
            CloseKind::LossLimit => CloseReason::LossLimit,
            CloseKind::EquityStop => CloseReason::EquityStop,
            CloseKind::ForceFlatten => CloseReason::ForceFlatten,
        }
    }
}

/// 로트 목록의 부동 손익.
///
/// `Σ side_sign · (mark − lot.price) / tick_size · tick_value · lot.volume`
pub fn floating_pnl(lots: &[PositionLot], meta: &InstrumentMeta, mark: Price) -> Decimal {
    lots.iter()
        .map(|lot| meta.pnl(lot.side(), lot.price(), mark, lot.volume()))
        .sum()
}

/// 평가 대상 바스켓 한 방향의 노출.
#[derive(Debug, Clone, Copy)]
pub struct Exposure<'a> {
    /// 바스켓 식별자
    pub key: &'a BasketKey,
    /// 열린 로트
    pub lots: &'a [PositionLot],
    /// 종목 메타데이터
    pub meta: &'a InstrumentMeta,
    /// 청산 기준 가격
    pub mark: Price,
}

impl Exposure<'_> {
    /// 이 노출의 부동 손익.
    pub fn floating_pnl(&self) -> Decimal {
        floating_pnl(self.lots, self.meta, self.mark)
    }
}

/// 히스테리시스 카운터.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HysteresisCounter {
    /// 목표 수익 조건 연속 횟수
    pub profit: u32,
    /// 손실 한도 조건 연속 횟수
    pub loss: u32,
}

/// 청산 결정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseDecision {
    /// 평가 범위 식별자
    pub scope: String,
    /// 청산할 바스켓들
    pub members: Vec<BasketKey>,
    /// 청산 유형
    pub kind: CloseKind,
    /// 평가 시점 부동 손익
    pub floating_pnl: Decimal,
}

/// 바스켓 리스크 평가기.
#[derive(Debug)]
pub struct BasketRiskEvaluator {
    config: BasketRiskConfig,
    counters: HashMap<String, HysteresisCounter>,
}

impl BasketRiskEvaluator {
    /// 범위 식별자: 전체 바스켓.
    pub const WHOLE_SCOPE: &'static str = "*";

    /// 새 평가기를 생성합니다.
    pub fn new(config: BasketRiskConfig) -> Self {
        Self {
            config,
            counters: HashMap::new(),
        }
    }

    /// 설정.
    pub fn config(&self) -> &BasketRiskConfig {
        &self.config
    }

    /// 바스켓이 속한 평가 범위.
    pub fn scope_of(&self, key: &BasketKey) -> String {
        match self.config.mode {
            BasketMode::PerSide => key.to_string(),
            BasketMode::WholeBasket => Self::WHOLE_SCOPE.to_string(),
            BasketMode::PerInstrumentPair => self
                .config
                .pairs
                .iter()
                .find(|pair| pair.contains(&key.group))
                .map(|pair| pair.id())
                .unwrap_or_else(|| key.group.clone()),
        }
    }

    /// 범위의 현재 카운터.
    pub fn counter(&self, scope: &str) -> HysteresisCounter {
        self.counters.get(scope).copied().unwrap_or_default()
    }

    /// 범위의 카운터를 초기화합니다.
    pub fn reset(&mut self, scope: &str) {
        self.counters.remove(scope);
    }

    /// 노출 목록을 범위별로 합산해 평가합니다.
    ///
    /// 노출이 사라진 범위의 카운터는 제거됩니다.
    pub fn evaluate(&mut self, exposures: &[Exposure<'_>]) -> Vec<CloseDecision> {
        let mut scopes: BTreeMap<String, (Decimal, Vec<BasketKey>)> = BTreeMap::new();
        for exposure in exposures.iter().filter(|e| !e.lots.is_empty()) {
            let entry = scopes
                .entry(self.scope_of(exposure.key))
                .or_insert_with(|| (Decimal::ZERO, Vec::new()));
            entry.0 += exposure.floating_pnl();
            entry.1.push(exposure.key.clone());
        }

        self.counters.retain(|scope, _| scopes.contains_key(scope));

        let mut decisions = Vec::new();
        for (scope, (pnl, members)) in scopes {
            if let Some(kind) = self.evaluate_scope(&scope, pnl) {
                decisions.push(CloseDecision {
                    scope,
                    members,
                    kind,
                    floating_pnl: pnl,
                });
            }
        }
        decisions
    }

    /// 단일 범위의 부동 손익을 평가합니다.
    ///
    /// 조건이 `delay`번 연속 유지되어야 발동하며, 한 번이라도 깨지면
    /// 카운터가 0으로 돌아갑니다. 손실 한도가 목표 수익보다 우선합니다.
    pub fn evaluate_scope(&mut self, scope: &str, pnl: Decimal) -> Option<CloseKind> {
        let profit_hit = self.config.profit_target.is_some_and(|target| pnl >= target);
        let loss_hit = self.config.loss_limit.is_some_and(|limit| pnl <= -limit);
        let required = self.config.delay.max(1);

        let counter = self.counters.entry(scope.to_string()).or_default();
        counter.profit = if profit_hit { counter.profit + 1 } else { 0 };
        counter.loss = if loss_hit { counter.loss + 1 } else { 0 };

        if profit_hit || loss_hit {
            debug!(
                scope,
                pnl = %pnl,
                profit_count = counter.profit,
                loss_count = counter.loss,
                required,
                "Basket hysteresis"
            );
        }

        let kind = if counter.loss >= required {
            CloseKind::LossLimit
        } else if counter.profit >= required {
            CloseKind::ProfitTarget
        } else {
            return None;
        };

        *counter = HysteresisCounter::default();
        info!(scope, pnl = %pnl, kind = ?kind, "Basket close condition confirmed");
        Some(kind)
    }
}

/// 자산 낙폭 가드.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityGuard {
    /// 시작 자산
    pub initial_equity: Decimal,
    /// 최고 자산
    pub peak_equity: Decimal,
    /// 마지막으로 관측한 자산
    pub last_equity: Decimal,
    risk_percent: Option<Decimal>,
    min_equity: Option<Decimal>,
}

impl EquityGuard {
    /// 시작 자산으로 가드를 생성합니다.
    pub fn new(initial_equity: Decimal, config: &EquityConfig) -> Self {
        Self {
            initial_equity,
            peak_equity: initial_equity,
            last_equity: initial_equity,
            risk_percent: config.risk_percent,
            min_equity: config.min_equity,
        }
    }

    /// 현재 낙폭 (최고 자산 대비 %).
    pub fn drawdown_percent(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.peak_equity - self.last_equity) / self.peak_equity * Decimal::ONE_HUNDRED
    }

    /// 자산을 갱신하고 허용 낙폭을 넘으면 `EquityStop`을 반환합니다.
    ///
    /// 히스테리시스 없이 즉시 발동합니다.
    pub fn update(&mut self, equity: Decimal) -> Option<CloseKind> {
        self.last_equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        let limit = self.risk_percent?;
        let drawdown = self.drawdown_percent();
        if drawdown > limit {
            warn!(
                equity = %equity,
                peak = %self.peak_equity,
                drawdown = %drawdown.round_dp(2),
                limit = %limit,
                "Equity drawdown limit breached"
            );
            return Some(CloseKind::EquityStop);
        }
        None
    }

    /// 자산 하한 필터: 새 바스켓 진입 허용 여부.
    pub fn allows_entry(&self) -> bool {
        self.min_equity.map_or(true, |floor| self.last_equity >= floor)
    }
}

/// 세션 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// 거래 시간
    Open,
    /// 거래 시간 외
    Closed,
    /// 금요일 마감 전 블랙아웃
    Blackout,
}

/// 거래 세션 가드.
#[derive(Debug, Clone)]
pub struct SessionGuard {
    config: SessionConfig,
}

impl SessionGuard {
    /// 새 가드를 생성합니다.
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// 주어진 시각의 세션 상태.
    pub fn status(&self, time: DateTime<Utc>) -> SessionStatus {
        if !self.config.enabled {
            return SessionStatus::Open;
        }

        let local = time.with_timezone(&self.config.timezone);
        let weekday = local.weekday();
        let clock = local.time();

        if weekday == Weekday::Fri && self.config.friday_blackout.is_some_and(|b| clock >= b) {
            return SessionStatus::Blackout;
        }
        if !self.config.trading_days.contains(&weekday) {
            return SessionStatus::Closed;
        }
        if in_window(clock, self.config.start, self.config.end) {
            SessionStatus::Open
        } else {
            SessionStatus::Closed
        }
    }

    /// 세션 외이면 `ForceFlatten`을 반환합니다.
    pub fn evaluate(&self, time: DateTime<Utc>) -> Option<CloseKind> {
        match self.status(time) {
            SessionStatus::Open => None,
            status => {
                debug!(time = %time, status = ?status, "Outside trading session");
                Some(CloseKind::ForceFlatten)
            }
        }
    }
}

fn in_window(clock: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start == end {
        true
    } else if start < end {
        clock >= start && clock < end
    } else {
        clock >= start || clock < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstrumentPair;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use trader_core::PositionSide;

    fn meta(symbol: &str) -> InstrumentMeta {
        InstrumentMeta {
            symbol: symbol.to_string(),
            price_step: dec!(0.00001),
            volume_step: dec!(0.01),
            min_volume: dec!(0.01),
            max_volume: dec!(100),
            decimals: 5,
            tick_value: dec!(1),
        }
    }

    fn lot(price: Decimal, volume: Decimal, side: PositionSide) -> PositionLot {
        PositionLot::new(price, volume, side, Utc::now())
    }

    fn evaluator(delay: u32) -> BasketRiskEvaluator {
        BasketRiskEvaluator::new(BasketRiskConfig {
            profit_target: Some(dec!(50)),
            loss_limit: Some(dec!(100)),
            delay,
            ..Default::default()
        })
    }

    #[test]
    fn test_floating_pnl_formula() {
        let lots = vec![
            lot(dec!(1.10000), dec!(0.1), PositionSide::Long),
            lot(dec!(1.09800), dec!(0.2), PositionSide::Long),
        ];
        // (1.1 - 1.099) / 0.00001 * 0.1 = -10 ; (1.099 - 1.098) / 0.00001 * 0.2 = 20
        assert_eq!(floating_pnl(&lots, &meta("EURUSD"), dec!(1.09900)), dec!(10));
    }

    #[test]
    fn test_hysteresis_requires_consecutive_ticks() {
        let mut eval = evaluator(3);
        assert_eq!(eval.evaluate_scope("s", dec!(60)), None);
        assert_eq!(eval.evaluate_scope("s", dec!(60)), None);
        // delay - 1 틱 유지 후 실패 -> 카운터 리셋
        assert_eq!(eval.evaluate_scope("s", dec!(40)), None);
        assert_eq!(eval.counter("s").profit, 0);

        assert_eq!(eval.evaluate_scope("s", dec!(60)), None);
        assert_eq!(eval.evaluate_scope("s", dec!(60)), None);
        assert_eq!(eval.evaluate_scope("s", dec!(60)), Some(CloseKind::ProfitTarget));
        assert_eq!(eval.counter("s"), HysteresisCounter::default());
    }

    #[test]
    fn test_zero_delay_fires_immediately() {
        let mut eval = evaluator(0);
        assert_eq!(eval.evaluate_scope("s", dec!(-100)), Some(CloseKind::LossLimit));
        assert_eq!(eval.evaluate_scope("s", dec!(-99)), None);
    }

    #[test]
    fn test_whole_basket_sums_sides() {
        let mut eval = BasketRiskEvaluator::new(BasketRiskConfig {
            mode: BasketMode::WholeBasket,
            profit_target: Some(dec!(50)),
            delay: 1,
            ..Default::default()
        });
        let m = meta("EURUSD");
        let long_key = BasketKey::new("EURUSD", PositionSide::Long);
        let short_key = BasketKey::new("EURUSD", PositionSide::Short);
        let long_lots = vec![lot(dec!(1.10000), dec!(1), PositionSide::Long)];
        let short_lots = vec![lot(dec!(1.10100), dec!(1), PositionSide::Short)];

        // 롱 +60, 숏 +40 -> 전체 +100
        let decisions = eval.evaluate(&[
            Exposure { key: &long_key, lots: &long_lots, meta: &m, mark: dec!(1.10060) },
            Exposure { key: &short_key, lots: &short_lots, meta: &m, mark: dec!(1.10060) },
        ]);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].scope, BasketRiskEvaluator::WHOLE_SCOPE);
        assert_eq!(decisions[0].members.len(), 2);
        assert_eq!(decisions[0].floating_pnl, dec!(100));
    }

    #[test]
    fn test_per_side_and_pair_scopes() {
        let key = BasketKey::new("EURUSD", PositionSide::Long);
        assert_eq!(evaluator(1).scope_of(&key), "EURUSD:LONG");

        let eval = BasketRiskEvaluator::new(BasketRiskConfig {
            mode: BasketMode::PerInstrumentPair,
            pairs: vec![InstrumentPair { first: "EURUSD".into(), second: "GBPUSD".into() }],
            ..Default::default()
        });
        assert_eq!(eval.scope_of(&key), "EURUSD/GBPUSD");
        assert_eq!(eval.scope_of(&BasketKey::new("USDJPY", PositionSide::Short)), "USDJPY");
    }

    #[test]
    fn test_counters_dropped_for_flat_scopes() {
        let mut eval = evaluator(3);
        let m = meta("EURUSD");
        let key = BasketKey::new("EURUSD", PositionSide::Long);
        let lots = vec![lot(dec!(1.10000), dec!(1), PositionSide::Long)];
        eval.evaluate(&[Exposure { key: &key, lots: &lots, meta: &m, mark: dec!(1.10100) }]);
        assert_eq!(eval.counter("EURUSD:LONG").profit, 1);

        eval.evaluate(&[]);
        assert_eq!(eval.counter("EURUSD:LONG").profit, 0);
    }

    #[test]
    fn test_equity_guard_drawdown() {
        let mut guard = EquityGuard::new(
            dec!(10000),
            &EquityConfig { risk_percent: Some(dec!(10)), min_equity: Some(dec!(9500)) },
        );
        assert_eq!(guard.update(dec!(12000)), None);
        assert_eq!(guard.peak_equity, dec!(12000));
        // 정확히 10%는 발동하지 않음
        assert_eq!(guard.update(dec!(10800)), None);
        assert_eq!(guard.update(dec!(10799)), Some(CloseKind::EquityStop));
        assert!(guard.allows_entry());
        guard.update(dec!(9000));
        assert!(!guard.allows_entry());
        assert_eq!(guard.peak_equity, dec!(12000));
    }

    #[test]
    fn test_session_window_and_blackout() {
        let guard = SessionGuard::new(SessionConfig {
            enabled: true,
            timezone: chrono_tz::Europe::Berlin,
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            friday_blackout: Some(NaiveTime::from_hms_opt(18, 0, 0).unwrap()),
            ..Default::default()
        });

        // 2024-01-03 (수) 10:00 UTC = 11:00 베를린
        let wed = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        assert_eq!(guard.status(wed), SessionStatus::Open);
        // 2024-01-03 20:30 UTC = 21:30 베를린
        let late = Utc.with_ymd_and_hms(2024, 1, 3, 20, 30, 0).unwrap();
        assert_eq!(guard.evaluate(late), Some(CloseKind::ForceFlatten));
        // 2024-01-05 (금) 17:30 UTC = 18:30 베를린
        let friday = Utc.with_ymd_and_hms(2024, 1, 5, 17, 30, 0).unwrap();
        assert_eq!(guard.status(friday), SessionStatus::Blackout);
        // 2024-01-06 (토)
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap();
        assert_eq!(guard.status(saturday), SessionStatus::Closed);
    }

    #[test]
    fn test_overnight_window() {
        let start = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        assert!(in_window(NaiveTime::from_hms_opt(23, 0, 0).unwrap(), start, end));
        assert!(in_window(NaiveTime::from_hms_opt(5, 59, 0).unwrap(), start, end));
        assert!(!in_window(NaiveTime::from_hms_opt(12, 0, 0).unwrap(), start, end));
    }
}
