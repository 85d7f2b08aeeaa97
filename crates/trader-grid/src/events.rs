//! 엔진 입출력 이벤트.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{
    AccountState, CloseReason, FillEvent, MarketEvent, OrderCommand, OrderUpdate, PositionSide,
    Price, Quantity,
};
use trader_risk::BasketKey;

/// 엔진이 소비하는 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum EngineEvent {
    /// 설정 로드 완료 / 세션 시작. 계좌 자산 기준을 다시 잡습니다.
    ConfigLoaded {
        /// 계좌 상태
        account: AccountState,
    },
    /// 시장 데이터 틱 (캔들 또는 호가)
    Tick {
        /// 시장 데이터
        market: MarketEvent,
        /// 틱 시점의 신호 방향
        #[serde(default)]
        bias: Option<PositionSide>,
    },
    /// 체결 통지
    Fill(FillEvent),
    /// 주문 상태 변경
    OrderUpdate(OrderUpdate),
}

/// 엔진이 내보내는 알림.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "alert")]
pub enum Alert {
    /// 그리드 레벨 체결
    GridLevelOpened {
        /// 바스켓
        basket: BasketKey,
        /// 체결된 단계 (1부터 센 깊이)
        depth: u32,
        /// 체결 가격
        price: Price,
        /// 체결 수량
        volume: Quantity,
        /// 체결 후 평균 진입가
        average_price: Price,
        /// 시각
        time: DateTime<Utc>,
    },
    /// 바스켓 사이클 종료
    BasketClosed {
        /// 바스켓
        basket: BasketKey,
        /// 청산 사유
        reason: CloseReason,
        /// 사이클 단계 수
        steps: u32,
        /// 사이클 실현 손익
        realized_pnl: Decimal,
        /// 시각
        time: DateTime<Utc>,
    },
    /// 보호 가격 변경
    ProtectiveUpdated {
        /// 바스켓
        basket: BasketKey,
        /// 손절가
        stop: Option<Price>,
        /// 익절가
        take: Option<Price>,
        /// 시각
        time: DateTime<Utc>,
    },
    /// 자산 낙폭 긴급 정지 (새 진입 중단)
    EngineHalted {
        /// 현재 자산
        equity: Decimal,
        /// 최고 자산
        peak_equity: Decimal,
        /// 시각
        time: DateTime<Utc>,
    },
    /// 긴급 청산 실패 (수동 개입 필요)
    EmergencyCloseFailed {
        /// 바스켓
        basket: BasketKey,
        /// 시도 횟수
        attempts: u32,
        /// 시각
        time: DateTime<Utc>,
    },
}

/// 이벤트 하나를 처리한 결과.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    /// 거래소로 보낼 명령 (순서대로 실행)
    pub commands: Vec<OrderCommand>,
    /// 알림
    pub alerts: Vec<Alert>,
}

impl EngineOutput {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.alerts.is_empty()
    }

    /// 다른 결과를 이어 붙입니다.
    pub fn extend(&mut self, other: EngineOutput) {
        self.commands.extend(other.commands);
        self.alerts.extend(other.alerts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{OrderHandle, Quote};

    #[test]
    fn test_tick_event_json() {
        let json = r#"{
            "event": "tick",
            "market": {"symbol": "EURUSD", "data": {"quote": {"time": "2024-03-04T10:00:00Z", "bid": "1.1000", "ask": "1.1002"}}},
            "bias": "long"
        }"#;
        let event: EngineEvent = serde_json::from_str(json).unwrap();
        match event {
            EngineEvent::Tick { market, bias } => {
                assert_eq!(market.symbol, "EURUSD");
                assert_eq!(bias, Some(PositionSide::Long));
                assert_eq!(market.exit_price(PositionSide::Long), dec!(1.1000));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_tick_without_bias() {
        let event = EngineEvent::Tick {
            market: MarketEvent::quote("EURUSD", Quote::new(Utc::now(), dec!(1.1), dec!(1.1001))),
            bias: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_output_extend() {
        let mut output = EngineOutput::default();
        assert!(output.is_empty());
        output.extend(EngineOutput {
            commands: vec![OrderCommand::Cancel {
                handle: OrderHandle::new(1),
                symbol: "EURUSD".to_string(),
            }],
            alerts: Vec::new(),
        });
        assert_eq!(output.commands.len(), 1);
        assert!(!output.is_empty());
    }
}
