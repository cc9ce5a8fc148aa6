#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backtest_optimizer::domain_types::Configuration;
use backtest_optimizer::executor::{
    BacktestEngine, BacktestMetrics, EngineReport, ExecutionError, TimeRange,
};
use backtest_optimizer::orchestrator::RunOptions;
use backtest_optimizer::search::{StrategyKind, TpeOptions};
use tokio::sync::watch;

type Script = Box<dyn Fn(&Configuration) -> Result<EngineReport, ExecutionError> + Send + Sync>;

/// Scripted in-process engine: maps each configuration to a canned
/// report without spawning any subprocess.
pub struct ScriptedEngine {
    script: Script,
    calls: AtomicU64,
}

impl ScriptedEngine {
    pub fn new(
        script: impl Fn(&Configuration) -> Result<EngineReport, ExecutionError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicU64::new(0),
        })
    }

    /// Number of actual engine invocations (cache hits never reach here).
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BacktestEngine for ScriptedEngine {
    async fn run_backtest(
        &self,
        config: &Configuration,
        _range: &TimeRange,
    ) -> Result<EngineReport, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(config)
    }
}

pub fn metrics(total_return: f64, trade_count: u64) -> BacktestMetrics {
    BacktestMetrics {
        total_return,
        max_drawdown: 0.1,
        profit_factor: 1.5,
        trade_count,
        sharpe_ratio: 1.0,
        extra: BTreeMap::new(),
    }
}

pub fn valid_report(total_return: f64) -> EngineReport {
    EngineReport {
        metrics: metrics(total_return, 50),
        artifact_path: PathBuf::from("artifacts/test.json"),
    }
}

pub fn zero_trade_report() -> EngineReport {
    EngineReport {
        metrics: metrics(0.0, 0),
        artifact_path: PathBuf::from("artifacts/test.json"),
    }
}

pub fn explore_range() -> TimeRange {
    let start: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let end: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-03-31T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    TimeRange::new(start, end)
}

pub fn run_options(output_dir: &Path, strategy: StrategyKind) -> RunOptions {
    RunOptions {
        output_dir: output_dir.to_path_buf(),
        run_id: Some("test-run".to_string()),
        strategy,
        max_trials: 100,
        max_concurrent: 1,
        trial_timeout: Duration::from_secs(5),
        run_timeout: None,
        grace_timeout: Duration::from_secs(1),
        max_duplicate_streak: 50,
        seed: Some(42),
        resume: false,
        allow_spec_change: false,
        cross_run_reuse: false,
        tpe: TpeOptions::default(),
    }
}

pub fn no_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Keep the sender alive so the receiver never observes a closed channel
    std::mem::forget(tx);
    rx
}
