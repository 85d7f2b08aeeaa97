//! 그리드 바스켓 엔진 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 기본 설정 파일 생성
//! trader sample-config -o config/grid.toml
//!
//! # 설정 검증
//! trader validate -c config/grid.toml
//!
//! # 기록된 시세로 리플레이
//! trader replay -c config/grid.toml -e demos/eurusd_quotes.jsonl --bias long
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use trader_cli::commands::replay::{run_replay, ReplayOptions};
use trader_cli::commands::sample_config::write_sample;
use trader_cli::commands::validate::validate_config;
use trader_core::{init_logging, LogConfig, PositionSide};
use trader_grid::GridEngineConfig;

#[derive(Parser)]
#[command(name = "trader")]
#[command(about = "Grid/martingale basket engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// 진입 방향 인자.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum BiasArg {
    Long,
    Short,
}

impl From<BiasArg> for PositionSide {
    fn from(bias: BiasArg) -> Self {
        match bias {
            BiasArg::Long => PositionSide::Long,
            BiasArg::Short => PositionSide::Short,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// 기록된 시장 데이터(JSONL)를 모의 거래소로 리플레이
    Replay {
        /// 엔진 설정 파일 (TOML 또는 JSON)
        #[arg(short, long, default_value = "config/grid.toml")]
        config: PathBuf,

        /// 이벤트 파일 (한 줄에 시장 이벤트 하나)
        #[arg(short, long)]
        events: PathBuf,

        /// 처음부터 적용할 진입 방향
        #[arg(long, value_enum)]
        bias: Option<BiasArg>,

        /// 명령 로그 저장 경로 (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 설정 파일 검증
    Validate {
        /// 엔진 설정 파일
        #[arg(short, long, default_value = "config/grid.toml")]
        config: PathBuf,
    },

    /// 기본 설정 파일 출력
    SampleConfig {
        /// 출력 파일 경로 (지정하지 않으면 stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// 설정 파일과 `GRID__` 환경 변수에서 엔진 설정을 로드합니다.
fn load_config(path: &PathBuf) -> Result<GridEngineConfig> {
    GridEngineConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn setup_logging(config: &LogConfig) -> Result<()> {
    init_logging(&config.clone().override_from_env())
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            config,
            events,
            bias,
            output,
        } => {
            let engine_config = load_config(&config)?;
            setup_logging(&engine_config.logging)?;
            info!(config = %config.display(), "Starting replay");

            let options = ReplayOptions {
                events_path: events,
                bias: bias.map(PositionSide::from),
                output_path: output,
            };
            run_replay(engine_config, options).await?;
        }

        Commands::Validate { config } => {
            let engine_config = load_config(&config)?;
            setup_logging(&engine_config.logging)?;
            validate_config(engine_config)?;
        }

        Commands::SampleConfig { output } => {
            setup_logging(&LogConfig::default())?;
            write_sample(output.as_deref())?;
        }
    }

    Ok(())
}
