use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use backtest_optimizer::config;
use backtest_optimizer::config::{ApplicationConfig, ExecutorConfig};
use backtest_optimizer::domain_types::ParameterSpec;
use backtest_optimizer::executor::{SubprocessEngine, TimeRange};
use backtest_optimizer::orchestrator::{run_search, OrchestratorError, RunOptions};
use backtest_optimizer::promotion::PromotionPipeline;
use backtest_optimizer::scoring::Scorer;
use backtest_optimizer::search::{StrategyKind, TpeOptions};
use backtest_optimizer::storage::{RunStateStore, StoreError};

/// 交易策略回測的超參數搜尋協調器
#[derive(Parser)]
#[command(name = "backtest-optimizer", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 執行一個搜尋回合
    Run {
        /// 參數規格檔（YAML）
        spec_file: PathBuf,
        /// 回合識別碼；省略時自動產生
        #[arg(long)]
        run_id: Option<String>,
        /// 續跑既有回合
        #[arg(long)]
        resume: bool,
        /// 規格變更時仍允許續跑
        #[arg(long)]
        allow_spec_change: bool,
        /// 試驗總數上限
        #[arg(long)]
        max_trials: Option<u64>,
        /// 單一試驗逾時（秒）
        #[arg(long)]
        timeout: Option<u64>,
        /// 併發試驗上限
        #[arg(long)]
        max_concurrent: Option<u32>,
        /// 搜尋策略 (grid|random|tpe)
        #[arg(long)]
        strategy: Option<String>,
        /// 隨機種子
        #[arg(long)]
        seed: Option<u64>,
        /// 連續重複上限
        #[arg(long)]
        max_duplicate_streak: Option<u32>,
        /// 回合輸出根目錄
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// 探索結束後接著執行驗證晉升階段
        #[arg(long)]
        promote: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Run {
            spec_file,
            run_id,
            resume,
            allow_spec_change,
            max_trials,
            timeout,
            max_concurrent,
            strategy,
            seed,
            max_duplicate_streak,
            output_dir,
            promote,
        } => {
            run_command(RunArgs {
                spec_file,
                run_id,
                resume,
                allow_spec_change,
                max_trials,
                timeout,
                max_concurrent,
                strategy,
                seed,
                max_duplicate_streak,
                output_dir,
                promote,
            })
            .await
        }
    };
    std::process::exit(exit_code);
}

struct RunArgs {
    spec_file: PathBuf,
    run_id: Option<String>,
    resume: bool,
    allow_spec_change: bool,
    max_trials: Option<u64>,
    timeout: Option<u64>,
    max_concurrent: Option<u32>,
    strategy: Option<String>,
    seed: Option<u64>,
    max_duplicate_streak: Option<u32>,
    output_dir: Option<PathBuf>,
    promote: bool,
}

async fn run_command(args: RunArgs) -> i32 {
    // 初始化配置
    let app_config = match config::init_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("配置加載失敗: {e}");
            return 1;
        }
    };

    // 初始化日誌系統
    if let Err(e) = init_logging(&app_config.log) {
        eprintln!("日誌系統初始化失敗: {e}");
        return 1;
    }

    match run_search_command(args, app_config).await {
        Ok(()) => 0,
        Err(e) => match e.downcast_ref::<OrchestratorError>() {
            Some(orchestrator_error) => {
                error!("回合失敗: {orchestrator_error}");
                orchestrator_error.exit_code()
            }
            None => {
                error!("回合失敗: {e}");
                1
            }
        },
    }
}

async fn run_search_command(args: RunArgs, app_config: &ApplicationConfig) -> Result<()> {
    // 載入並驗證參數規格
    let spec = ParameterSpec::load(&args.spec_file)
        .map_err(OrchestratorError::Spec)?;
    info!(
        spec = %args.spec_file.display(),
        parameters = spec.parameters.len(),
        "參數規格載入完成"
    );

    // CLI 參數覆蓋配置檔
    let strategy: StrategyKind = args
        .strategy
        .as_deref()
        .unwrap_or(&app_config.search.strategy)
        .parse()
        .map_err(OrchestratorError::Search)?;
    let trial_timeout =
        Duration::from_secs(args.timeout.unwrap_or(app_config.executor.trial_timeout_secs));
    let run_timeout = match app_config.search.run_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let opts = RunOptions {
        output_dir: args
            .output_dir
            .unwrap_or_else(|| PathBuf::from(&app_config.search.output_dir)),
        run_id: args.run_id,
        strategy,
        max_trials: args.max_trials.unwrap_or(app_config.search.max_trials),
        max_concurrent: args
            .max_concurrent
            .map(|n| n as usize)
            .unwrap_or_else(|| app_config.search.effective_max_concurrent()),
        trial_timeout,
        run_timeout,
        grace_timeout: Duration::from_secs(app_config.executor.grace_timeout_secs),
        max_duplicate_streak: args
            .max_duplicate_streak
            .unwrap_or(app_config.search.max_duplicate_streak),
        seed: args.seed.or(app_config.search.seed),
        resume: args.resume,
        allow_spec_change: args.allow_spec_change,
        cross_run_reuse: app_config.cache.cross_run_reuse,
        tpe: TpeOptions::from(&app_config.search.tpe),
    };

    let explore_range = parse_range(
        &app_config.executor.explore_start,
        &app_config.executor.explore_end,
    )?;
    let engine = Arc::new(build_engine(
        &app_config.executor,
        &opts.output_dir,
        trial_timeout,
    )?);
    let scorer = Arc::new(Scorer::new(app_config.scorer.clone()));

    // Ctrl-C → 協作式取消：停止派發，在途試驗於寬限期內收尾
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("接收到中斷訊號，協作式停止回合");
            cancel_tx.send(true).ok();
        }
    });

    let summary = run_search(
        &spec,
        engine.clone(),
        scorer,
        explore_range,
        &opts,
        cancel_rx,
    )
    .await?;

    info!(
        run_id = %summary.run_id,
        total = summary.total_attempted,
        best = summary.best.as_ref().map(|b| b.score),
        "搜尋回合完成"
    );

    // 驗證晉升階段
    if args.promote {
        let validate_range = parse_range(
            &app_config.executor.validate_start,
            &app_config.executor.validate_end,
        )?;
        let store = RunStateStore::load(&summary.run_dir, &spec.content_hash(), true)
            .map_err(OrchestratorError::Store)?;
        let records = store.load_trials().map_err(OrchestratorError::Store)?;

        let pipeline = PromotionPipeline::new(
            engine,
            Scorer::new(app_config.scorer.clone()),
            app_config.promotion.clone(),
        );
        let report = pipeline.evaluate(&records, &validate_range).await;
        // 報告寫入失敗屬不可恢復 IO 錯誤（退出碼 3）
        let path = PromotionPipeline::write_report(&report, &summary.run_dir)
            .map_err(|e| OrchestratorError::Store(StoreError::Io(e)))?;
        info!(report = %path.display(), promoted = report.promoted.is_some(), "晉升報告已寫出");
    }

    Ok(())
}

fn build_engine(
    executor: &ExecutorConfig,
    output_dir: &std::path::Path,
    trial_timeout: Duration,
) -> Result<SubprocessEngine> {
    SubprocessEngine::new(
        &executor.command,
        executor.args.clone(),
        output_dir.join("artifacts"),
        trial_timeout,
    )
    .map_err(|e| anyhow!("回測引擎初始化失敗: {e}"))
}

fn parse_range(start: &str, end: &str) -> Result<TimeRange> {
    let start: DateTime<Utc> = DateTime::parse_from_rfc3339(start)
        .map_err(|e| anyhow!("無效的時間範圍起點 {start}: {e}"))?
        .with_timezone(&Utc);
    let end: DateTime<Utc> = DateTime::parse_from_rfc3339(end)
        .map_err(|e| anyhow!("無效的時間範圍終點 {end}: {e}"))?
        .with_timezone(&Utc);
    Ok(TimeRange::new(start, end))
}

// 初始化日誌系統
fn init_logging(log_config: &config::LogConfig) -> Result<()> {
    let level = match log_config.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO, // 默認為INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("設置日誌系統失敗: {e}"))?;

    info!("日誌系統初始化完成");
    Ok(())
}
