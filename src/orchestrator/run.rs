use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::context::OrchestratorContext;
use super::scheduler::TrialScheduler;
use super::OrchestratorError;
use crate::domain_types::{Configuration, ParamValue, ParameterSpec};
use crate::executor::{BacktestEngine, TimeRange, TrialOutcome};
use crate::scoring::Scorer;
use crate::search::{build_strategy, SearchStrategy, StrategyKind, TpeOptions};
use crate::signature::{canonicalize, TrialSignature};
use crate::storage::{BestTrialRef, RunStatus, TrialRecord, TrialStatus};

/// 單一回合的執行選項
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub run_id: Option<String>,
    pub strategy: StrategyKind,
    pub max_trials: u64,
    pub max_concurrent: usize,
    pub trial_timeout: Duration,
    pub run_timeout: Option<Duration>,
    pub grace_timeout: Duration,
    pub max_duplicate_streak: u32,
    pub seed: Option<u64>,
    pub resume: bool,
    pub allow_spec_change: bool,
    pub cross_run_reuse: bool,
    pub tpe: TpeOptions,
}

/// 回合摘要
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub status: RunStatus,
    pub total_attempted: u64,
    pub duplicate_count: u64,
    pub cache_hit_count: u64,
    pub best: Option<BestTrialRef>,
}

/// 互斥鎖保護的共享可變狀態
///
/// 快取寫入、帳簿追加、狀態存放區與策略回饋全部經由這把鎖
/// 序列化（單一寫入者紀律），試驗本體的執行則在鎖外並行。
struct Shared {
    strategy: Box<dyn SearchStrategy>,
    ctx: OrchestratorContext,
    in_flight: HashMap<u64, PendingTrial>,
    fatal: Option<OrchestratorError>,
}

struct PendingTrial {
    signature: TrialSignature,
    parameters: BTreeMap<String, ParamValue>,
}

enum Dispatch {
    Execute {
        trial_number: u64,
        config: Configuration,
        signature: TrialSignature,
    },
    Skip,
    Exhausted,
    Abort,
}

/// 執行一個完整的搜尋回合
///
/// 停止條件：試驗數達上限、回合逾時、策略耗盡、連續重複中止
/// 或外部取消。試驗編號在派發時分配（單調遞增），與完成順序
/// 無關，續跑因此能確定性地略過既有簽章。
pub async fn run_search(
    spec: &ParameterSpec,
    engine: Arc<dyn BacktestEngine>,
    scorer: Arc<Scorer>,
    range: TimeRange,
    opts: &RunOptions,
    cancel_rx: watch::Receiver<bool>,
) -> Result<RunSummary, OrchestratorError> {
    let run_id = opts
        .run_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let run_dir = opts.output_dir.join(&run_id);
    let spec_hash = spec.content_hash();

    // 跨回合重用開啟時快取目錄掛在輸出根目錄下共享
    let cache_dir = if opts.cross_run_reuse {
        opts.output_dir.clone()
    } else {
        run_dir.clone()
    };

    let ctx = if opts.resume {
        OrchestratorContext::resume(
            &run_dir,
            &cache_dir,
            &spec_hash,
            opts.allow_spec_change,
            opts.max_duplicate_streak,
        )?
    } else {
        OrchestratorContext::create(
            &run_dir,
            &cache_dir,
            opts.cross_run_reuse,
            run_id.clone(),
            opts.strategy.to_string(),
            spec_hash,
            opts.max_duplicate_streak,
        )?
    };

    let mut strategy = build_strategy(
        opts.strategy,
        spec,
        opts.seed,
        &opts.tpe,
        scorer.config().penalties.execution_error,
    )?;
    let mut next_trial = ctx.store.next_trial_number()?;
    let mut dispatched = ctx.store.state().total_attempted;

    // 續跑：回放歷史觀測給策略，並記下待略過的簽章
    let mut resume_skip: HashSet<String> = HashSet::new();
    if opts.resume {
        let records = ctx.store.load_trials()?;
        info!(existing = records.len(), "續跑：回放既有試驗");
        for record in &records {
            resume_skip.insert(record.signature.clone());
            if let Some(score) = record.score {
                let config = Configuration::from_flat(record.parameters.clone());
                strategy.tell(record.trial_number, &config, score);
            }
        }
    }

    info!(
        run_id = %run_id,
        strategy = %opts.strategy,
        max_trials = opts.max_trials,
        max_concurrent = opts.max_concurrent,
        "開始搜尋回合"
    );

    let shared = Arc::new(Mutex::new(Shared {
        strategy,
        ctx,
        in_flight: HashMap::new(),
        fatal: None,
    }));
    let mut scheduler =
        TrialScheduler::new(opts.max_concurrent, cancel_rx.clone(), opts.grace_timeout);
    let deadline = opts.run_timeout.map(|t| Instant::now() + t);
    let mut exhausted = false;
    let mut timed_out = false;

    while dispatched < opts.max_trials {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                info!("回合逾時，停止派發新試驗");
                timed_out = true;
                break;
            }
        }
        let Some(permit) = scheduler.acquire().await else {
            break; // 已取消
        };

        let dispatch =
            propose_next(&shared, scorer.as_ref(), &mut next_trial, &mut resume_skip).await?;
        match dispatch {
            Dispatch::Exhausted => {
                drop(permit);
                exhausted = true;
                break;
            }
            Dispatch::Abort => {
                drop(permit);
                break;
            }
            Dispatch::Skip => {
                drop(permit);
                dispatched += 1;
            }
            Dispatch::Execute {
                trial_number,
                config,
                signature,
            } => {
                dispatched += 1;
                let worker = execute_trial(
                    shared.clone(),
                    engine.clone(),
                    scorer.clone(),
                    range,
                    opts.trial_timeout,
                    trial_number,
                    config,
                    signature,
                );
                scheduler.dispatch(permit, worker);
            }
        }
    }

    // 取消走寬限收尾，其餘停止條件等待在途試驗完成
    if scheduler.is_cancelled() {
        let killed = scheduler.shutdown().await;
        if killed > 0 {
            record_aborted_in_flight(&shared).await;
        }
    } else {
        scheduler.drain().await;
    }

    finalize(&shared, &run_id, &run_dir, scheduler.is_cancelled(), exhausted, timed_out).await
}

/// 在共享鎖內取得下一個派發決定
///
/// 重複簽章在此直接記錄與回饋（命中快取時回饋真實分數，
/// 否則回饋固定罰分），不會佔用執行工作者。
async fn propose_next(
    shared: &Arc<Mutex<Shared>>,
    scorer: &Scorer,
    next_trial: &mut u64,
    resume_skip: &mut HashSet<String>,
) -> Result<Dispatch, OrchestratorError> {
    let mut s = shared.lock().await;
    if s.fatal.is_some() {
        return Ok(Dispatch::Abort);
    }

    loop {
        let Some(config) = s.strategy.ask()? else {
            return Ok(Dispatch::Exhausted);
        };
        let signature = canonicalize(&config);

        // 前次回合已嘗試過的簽章：不重新執行、不編號、不計重複
        if resume_skip.remove(signature.as_str()) {
            continue;
        }

        let trial_number = *next_trial;
        *next_trial += 1;

        match s.ctx.guard.check(&signature, trial_number)? {
            crate::cache::DuplicateCheck::New => {
                s.strategy.tell_pending(trial_number, &config);
                s.in_flight.insert(
                    trial_number,
                    PendingTrial {
                        signature: signature.clone(),
                        parameters: config.flat().clone(),
                    },
                );
                return Ok(Dispatch::Execute {
                    trial_number,
                    config,
                    signature,
                });
            }
            crate::cache::DuplicateCheck::Duplicate { count } => {
                let cached = s.ctx.cache.get(&signature);
                let (status, score, metrics) = match &cached {
                    // 關鍵正確性規則：有快取分數就回饋真實分數，
                    // 絕不以中性零值混充
                    Some(record) => (
                        TrialStatus::SkippedCached,
                        record
                            .score
                            .unwrap_or_else(|| scorer.score_duplicate_without_cache().score),
                        record.metrics.clone(),
                    ),
                    None => (
                        TrialStatus::SkippedDuplicate,
                        scorer.score_duplicate_without_cache().score,
                        None,
                    ),
                };
                info!(
                    trial = trial_number,
                    signature = %signature,
                    count,
                    cached = cached.is_some(),
                    "偵測到重複配置"
                );
                let record = TrialRecord {
                    trial_number,
                    signature: signature.as_str().to_string(),
                    parameters: config.flat().clone(),
                    status,
                    metrics,
                    score: Some(score),
                    hard_failures: Vec::new(),
                    duration_ms: 0,
                    timestamp: Utc::now(),
                    artifact_path: None,
                };
                s.ctx.store.append_trial(&record)?;
                s.strategy.tell(trial_number, &config, score);

                // 重複屬非生產性試驗，累計連續計數
                if let Err(e) = s.ctx.guard.record_unproductive() {
                    warn!(error = %e, "連續重複達上限");
                    s.fatal = Some(OrchestratorError::Dedup(e));
                    return Ok(Dispatch::Abort);
                }
                return Ok(Dispatch::Skip);
            }
        }
    }
}

/// 單一試驗的執行與收尾（鎖外執行，收尾時短暫取鎖）
#[allow(clippy::too_many_arguments)]
async fn execute_trial(
    shared: Arc<Mutex<Shared>>,
    engine: Arc<dyn BacktestEngine>,
    scorer: Arc<Scorer>,
    range: TimeRange,
    trial_timeout: Duration,
    trial_number: u64,
    config: Configuration,
    signature: TrialSignature,
) {
    let started = Instant::now();
    // 協調器側逾時，獨立於引擎自身的逾時
    let outcome = match tokio::time::timeout(trial_timeout, engine.run_backtest(&config, &range))
        .await
    {
        Ok(Ok(report)) => TrialOutcome::classify(report),
        Ok(Err(e)) => {
            warn!(trial = trial_number, error = %e, "試驗執行失敗");
            TrialOutcome::ExecutionFailed {
                reason: e.to_string(),
            }
        }
        Err(_) => {
            warn!(
                trial = trial_number,
                timeout_secs = trial_timeout.as_secs(),
                "試驗逾時"
            );
            TrialOutcome::ExecutionFailed {
                reason: format!("逾時 ({} 秒)", trial_timeout.as_secs()),
            }
        }
    };

    let block = scorer.score(&outcome);
    let (status, artifact_path) = match &outcome {
        TrialOutcome::Valid { artifact_path, .. } => {
            (TrialStatus::Completed, Some(artifact_path.clone()))
        }
        TrialOutcome::InvalidNumeric { .. } | TrialOutcome::ZeroOutcome { .. } => {
            (TrialStatus::Completed, None)
        }
        TrialOutcome::ExecutionFailed { .. } => (TrialStatus::Error, None),
    };

    let record = TrialRecord {
        trial_number,
        signature: signature.as_str().to_string(),
        parameters: config.flat().clone(),
        status,
        metrics: block.metrics.clone(),
        score: Some(block.score),
        hard_failures: block.hard_failures.clone(),
        duration_ms: started.elapsed().as_millis() as u64,
        timestamp: Utc::now(),
        artifact_path,
    };

    let mut s = shared.lock().await;
    s.in_flight.remove(&trial_number);

    if let Err(e) = s.ctx.store.append_trial(&record) {
        error!(trial = trial_number, error = %e, "試驗記錄寫入失敗");
        s.fatal = Some(OrchestratorError::Store(e));
        return;
    }
    if let Err(e) = s.ctx.cache.put(&signature, &record) {
        error!(trial = trial_number, error = %e, "結果快取寫入失敗");
        s.fatal = Some(OrchestratorError::Cache(e));
        return;
    }

    if outcome.is_productive() {
        s.ctx.guard.record_productive();
    } else if let Err(e) = s.ctx.guard.record_unproductive() {
        warn!(error = %e, "連續退化試驗達上限");
        s.fatal = Some(OrchestratorError::Dedup(e));
    }

    s.strategy.tell(trial_number, &config, block.score);
    info!(
        trial = trial_number,
        score = block.score,
        status = ?record.status,
        duration_ms = record.duration_ms,
        "試驗完成"
    );
}

/// 為被強制中止的在途試驗補記錄；部分結果一律丟棄不計分
async fn record_aborted_in_flight(shared: &Arc<Mutex<Shared>>) {
    let mut s = shared.lock().await;
    let pending: Vec<(u64, PendingTrial)> = s.in_flight.drain().collect();
    for (trial_number, trial) in pending {
        let record = TrialRecord {
            trial_number,
            signature: trial.signature.as_str().to_string(),
            parameters: trial.parameters,
            status: TrialStatus::Aborted,
            metrics: None,
            score: None,
            hard_failures: Vec::new(),
            duration_ms: 0,
            timestamp: Utc::now(),
            artifact_path: None,
        };
        if let Err(e) = s.ctx.store.append_trial(&record) {
            error!(trial = trial_number, error = %e, "中止記錄寫入失敗");
        }
    }
}

async fn finalize(
    shared: &Arc<Mutex<Shared>>,
    run_id: &str,
    run_dir: &std::path::Path,
    cancelled: bool,
    exhausted: bool,
    timed_out: bool,
) -> Result<RunSummary, OrchestratorError> {
    let mut s = shared.lock().await;
    let fatal = s.fatal.take();

    let (status, abort_reason) = match (&fatal, cancelled) {
        (Some(OrchestratorError::Dedup(e)), _) => (RunStatus::Aborted, Some(e.to_string())),
        (Some(e), _) => (RunStatus::Failed, Some(e.to_string())),
        (None, true) => (RunStatus::Aborted, Some("已取消".to_string())),
        (None, false) => (RunStatus::Completed, None),
    };
    s.ctx.store.finalize(status, abort_reason)?;

    let state = s.ctx.store.state();
    let summary = RunSummary {
        run_id: run_id.to_string(),
        run_dir: run_dir.to_path_buf(),
        status,
        total_attempted: state.total_attempted,
        duplicate_count: state.duplicate_count,
        cache_hit_count: state.cache_hit_count,
        best: state.best_trial_ref.clone(),
    };
    info!(
        run_id,
        status = ?summary.status,
        total = summary.total_attempted,
        duplicates = summary.duplicate_count,
        cache_hits = summary.cache_hit_count,
        exhausted,
        timed_out,
        best = summary.best.as_ref().map(|b| b.score),
        "回合結束"
    );

    match fatal {
        Some(e) => Err(e),
        None if cancelled => Err(OrchestratorError::Cancelled),
        None => Ok(summary),
    }
}
