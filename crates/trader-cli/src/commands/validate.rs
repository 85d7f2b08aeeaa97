//! 설정 검증 명령어.

use anyhow::Result;
use trader_grid::{GridEngine, GridEngineConfig};

/// 설정으로 엔진을 생성해 보고 주요 값을 출력합니다.
///
/// 설정 로딩 단계의 검증을 통과한 뒤에도 엔진 생성(진행 엔진 등)에서
/// 실패할 수 있으므로 실제로 엔진을 만들어 확인합니다.
pub fn validate_config(config: GridEngineConfig) -> Result<()> {
    let engine = GridEngine::new(config)?;
    let config = engine.config();

    println!("✅ 설정이 유효합니다");
    println!("시작 자산      : {}", config.initial_equity);
    for meta in &config.instruments {
        println!(
            "종목           : {} (pip {}, 수량 {}~{})",
            meta.symbol,
            meta.converter().pip_size(),
            meta.min_volume,
            meta.max_volume
        );
    }
    println!(
        "그리드         : 최대 {}단계, 트리거 {} pip ({:?} × {})",
        config.grid.max_depth,
        config.grid.trigger_distance_pips,
        config.grid.trigger_kind,
        config.grid.trigger_growth
    );
    println!(
        "물량 진행      : {:?} 기본 {} × {} (상한 {})",
        config.progression.kind,
        config.progression.base_volume,
        config.progression.multiplier,
        config.progression.lot_limit
    );
    println!(
        "바스켓         : {:?}, 목표 {:?}, 손실 한도 {:?}, 지연 {}",
        config.basket.mode, config.basket.profit_target, config.basket.loss_limit, config.basket.delay
    );
    println!("진입 정책      : {:?}", config.grid.entry_policy);
    println!("보호 주문 방식 : {:?}", config.execution.protective_mode);
    if config.session.enabled {
        println!(
            "세션           : {} {}~{} ({:?})",
            config.session.timezone, config.session.start, config.session.end, config.session.trading_days
        );
    }
    Ok(())
}
