//! 연속 손실 기반 자금 관리.
//!
//! 최근 바스켓 사이클의 승/패를 고정 크기 링 버퍼에 기록하고,
//! 최근 `history_depth` 사이클 중 손실이 `loss_trigger` 이상이면
//! 다음 진입부터 축소 물량을 사용합니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MoneyManagementConfig;

/// 바스켓 사이클 결과 링 버퍼.
///
/// 용량은 `max(history_depth, loss_trigger) * 2`이며, 가득 차면
/// 가장 오래된 결과를 덮어씁니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossHistory {
    slots: Vec<bool>,
    head: usize,
    len: usize,
}

impl LossHistory {
    /// 주어진 용량의 버퍼를 생성합니다 (최소 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![false; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    /// 자금 관리 설정에 맞는 용량으로 생성합니다.
    pub fn for_config(config: &MoneyManagementConfig) -> Self {
        Self::with_capacity(config.history_depth.max(config.loss_trigger) * 2)
    }

    /// 용량.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 저장된 결과 수.
    pub fn len(&self) -> usize {
        self.len
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 사이클 결과를 기록합니다 (`true` = 손실).
    pub fn record(&mut self, loss: bool) {
        let capacity = self.capacity();
        self.slots[self.head] = loss;
        self.head = (self.head + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
    }

    /// 최근 결과부터 거꾸로 순회합니다.
    pub fn recent(&self) -> impl Iterator<Item = bool> + '_ {
        let capacity = self.capacity();
        (1..=self.len).map(move |back| self.slots[(self.head + capacity - back) % capacity])
    }

    /// 최근 `depth`개 결과 중 손실 수.
    pub fn recent_losses(&self, depth: usize) -> usize {
        self.recent().take(depth).filter(|loss| *loss).count()
    }
}

/// 연속 손실 기반 물량 선택기.
#[derive(Debug, Clone)]
pub struct MoneyManager {
    config: MoneyManagementConfig,
}

impl MoneyManager {
    /// 새 선택기를 생성합니다.
    pub fn new(config: MoneyManagementConfig) -> Self {
        Self { config }
    }

    /// 설정.
    pub fn config(&self) -> &MoneyManagementConfig {
        &self.config
    }

    /// 새 이력 버퍼를 생성합니다.
    pub fn new_history(&self) -> LossHistory {
        LossHistory::for_config(&self.config)
    }

    /// 축소 물량을 써야 하는지 확인합니다.
    pub fn is_reduced(&self, history: &LossHistory) -> bool {
        self.config.enabled
            && history.recent_losses(self.config.history_depth) >= self.config.loss_trigger
    }

    /// 다음 사이클의 기본 물량을 선택합니다. 0이면 거래하지 않습니다.
    pub fn base_volume(&self, history: &LossHistory, normal_volume: Decimal) -> Decimal {
        if self.is_reduced(history) {
            debug!(
                losses = history.recent_losses(self.config.history_depth),
                reduced = %self.config.reduced_volume,
                "Loss streak: using reduced volume"
            );
            self.config.reduced_volume
        } else {
            normal_volume
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn manager() -> MoneyManager {
        MoneyManager::new(MoneyManagementConfig {
            enabled: true,
            history_depth: 5,
            loss_trigger: 3,
            reduced_volume: dec!(0.01),
        })
    }

    #[test]
    fn test_ring_buffer_wraps() {
        let mut history = LossHistory::with_capacity(3);
        for outcome in [true, false, true, true] {
            history.record(outcome);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.recent().collect::<Vec<_>>(), vec![true, true, false]);
    }

    #[test]
    fn test_capacity_from_config() {
        let history = manager().new_history();
        assert_eq!(history.capacity(), 10);
        assert!(history.is_empty());
    }

    #[test]
    fn test_reduced_on_third_loss() {
        let mm = manager();
        let mut history = mm.new_history();

        history.record(true);
        history.record(false);
        history.record(true);
        assert_eq!(mm.base_volume(&history, dec!(0.1)), dec!(0.1));

        // 세 번째 손실이 기록된 직후 사이클부터 축소
        history.record(true);
        assert_eq!(mm.base_volume(&history, dec!(0.1)), dec!(0.01));
    }

    #[test]
    fn test_old_losses_fall_out_of_window() {
        let mm = manager();
        let mut history = mm.new_history();
        for outcome in [true, true, true, false, false, false] {
            history.record(outcome);
        }
        // 최근 5개: false, false, false, true, true
        assert_eq!(history.recent_losses(5), 2);
        assert!(!mm.is_reduced(&history));
    }

    #[test]
    fn test_disabled_never_reduces() {
        let mm = MoneyManager::new(MoneyManagementConfig::default());
        let mut history = mm.new_history();
        for _ in 0..5 {
            history.record(true);
        }
        assert_eq!(mm.base_volume(&history, dec!(0.1)), dec!(0.1));
    }
}
