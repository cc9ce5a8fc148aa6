mod common;

use std::collections::HashMap;
use std::sync::Arc;

use assert_matches::assert_matches;
use backtest_optimizer::cache::DedupError;
use backtest_optimizer::domain_types::ParameterSpec;
use backtest_optimizer::orchestrator::{run_search, OrchestratorError};
use backtest_optimizer::scoring::{Scorer, ScorerConfig};
use backtest_optimizer::search::StrategyKind;
use backtest_optimizer::storage::{RunStateStore, RunState, RunStatus, TrialStatus};

use common::{explore_range, no_cancel, run_options, valid_report, zero_trade_report, ScriptedEngine};

#[tokio::test]
async fn test_duplicate_reuses_cached_score() {
    let dir = tempfile::tempdir().unwrap();
    // Two possible configurations only, so random sampling repeats fast
    let spec = ParameterSpec::parse(
        r#"
parameters:
  - path: x
    grid: [1, 2]
"#,
    )
    .unwrap();
    let engine = ScriptedEngine::new(|config| {
        let x = config.get("x").and_then(|v| v.as_i64()).unwrap();
        Ok(valid_report(0.01 * x as f64))
    });
    let scorer = Arc::new(Scorer::new(ScorerConfig::default()));
    let mut opts = run_options(dir.path(), StrategyKind::Random);
    opts.max_trials = 8;

    let summary = run_search(
        &spec,
        engine.clone(),
        scorer,
        explore_range(),
        &opts,
        no_cancel(),
    )
    .await
    .unwrap();

    assert_eq!(summary.total_attempted, 8);
    // The engine only ever runs once per distinct signature
    assert!(engine.call_count() <= 2);
    assert_eq!(summary.duplicate_count, 8 - engine.call_count());
    assert!(summary.duplicate_count >= 1);
    // Sequential execution means every duplicate finds its result cached
    assert_eq!(summary.cache_hit_count, summary.duplicate_count);

    let store = RunStateStore::load(&summary.run_dir, &spec.content_hash(), true).unwrap();
    let records = store.load_trials().unwrap();

    let mut completed_scores: HashMap<String, f64> = HashMap::new();
    for record in &records {
        if record.status == TrialStatus::Completed {
            completed_scores.insert(record.signature.clone(), record.score.unwrap());
        }
    }
    // Cached duplicates carry the real score of the original trial,
    // never a neutral zero
    for record in &records {
        if record.status == TrialStatus::SkippedCached {
            let original = completed_scores.get(&record.signature).unwrap();
            assert_eq!(record.score, Some(*original));
            assert_ne!(record.score, Some(0.0));
        }
    }
}

#[tokio::test]
async fn test_duplicate_streak_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    // Single-point domain: random sampling collapses to one signature
    let spec = ParameterSpec::parse(
        r#"
parameters:
  - path: x
    grid: [1]
"#,
    )
    .unwrap();
    let engine = ScriptedEngine::new(|_| Ok(valid_report(0.1)));
    let scorer = Arc::new(Scorer::new(ScorerConfig::default()));
    let mut opts = run_options(dir.path(), StrategyKind::Random);
    opts.max_duplicate_streak = 3;

    let err = run_search(
        &spec,
        engine.clone(),
        scorer,
        explore_range(),
        &opts,
        no_cancel(),
    )
    .await
    .unwrap_err();

    assert_matches!(
        err,
        OrchestratorError::Dedup(DedupError::StreakExceeded { streak: 3, bound: 3 })
    );
    assert_eq!(err.exit_code(), 2);
    // One real execution plus exactly three duplicate records
    assert_eq!(engine.call_count(), 1);

    let raw = std::fs::read_to_string(dir.path().join("test-run/run_meta.json")).unwrap();
    let state: RunState = serde_json::from_str(&raw).unwrap();
    assert_eq!(state.status, RunStatus::Aborted);
    assert_eq!(state.total_attempted, 4);
    assert!(state.diagnostics.abort_reason.is_some());
}

#[tokio::test]
async fn test_degenerate_outcomes_count_toward_streak() {
    let dir = tempfile::tempdir().unwrap();
    let spec = ParameterSpec::parse(
        r#"
parameters:
  - path: x
    grid: [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
"#,
    )
    .unwrap();
    // Distinct configurations, but none of them ever trades
    let engine = ScriptedEngine::new(|_| Ok(zero_trade_report()));
    let scorer = Arc::new(Scorer::new(ScorerConfig::default()));
    let mut opts = run_options(dir.path(), StrategyKind::Grid);
    opts.max_duplicate_streak = 3;

    let err = run_search(
        &spec,
        engine.clone(),
        scorer,
        explore_range(),
        &opts,
        no_cancel(),
    )
    .await
    .unwrap_err();

    assert_matches!(
        err,
        OrchestratorError::Dedup(DedupError::StreakExceeded { streak: 3, bound: 3 })
    );
    assert_eq!(engine.call_count(), 3);
}

#[tokio::test]
async fn test_productive_trials_reset_streak() {
    let dir = tempfile::tempdir().unwrap();
    let spec = ParameterSpec::parse(
        r#"
parameters:
  - path: x
    grid: [1, 2, 3, 4, 5, 6]
"#,
    )
    .unwrap();
    // Alternating degenerate and valid outcomes never accumulate a streak
    let engine = ScriptedEngine::new(|config| {
        let x = config.get("x").and_then(|v| v.as_i64()).unwrap();
        if x % 2 == 1 {
            Ok(zero_trade_report())
        } else {
            Ok(valid_report(0.1))
        }
    });
    let scorer = Arc::new(Scorer::new(ScorerConfig::default()));
    let mut opts = run_options(dir.path(), StrategyKind::Grid);
    opts.max_duplicate_streak = 2;

    let summary = run_search(
        &spec,
        engine,
        scorer,
        explore_range(),
        &opts,
        no_cancel(),
    )
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.total_attempted, 6);
}
