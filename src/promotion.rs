//! 晉升流程模組
//!
//! 兩階段工作流：探索（Explore）在短而便宜的時間窗上跑完整搜尋，
//! 驗證（Validate）只對排名前 N 的候選以相同參數在更長更嚴格的
//! 時間窗上重跑。只有驗證分數達到基準加最小改善幅度才晉升，
//! 防止只在探索窗上過擬合的配置被放行。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PromotionConfig;
use crate::domain_types::Configuration;
use crate::executor::{BacktestEngine, TimeRange, TrialOutcome};
use crate::scoring::Scorer;
use crate::storage::{TrialRecord, TrialStatus};

/// 單一候選的驗證結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub trial_number: u64,
    pub signature: String,
    pub explore_score: f64,
    pub validate_score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hard_failures: Vec<String>,
    pub eligible: bool,
}

/// 晉升報告，寫入回合目錄的 `promotion_report.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionReport {
    pub baseline_score: f64,
    pub min_improvement: f64,
    pub candidates: Vec<CandidateOutcome>,
    /// 晉升的候選簽章；無一通過則為 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted: Option<CandidateOutcome>,
    pub generated_at: DateTime<Utc>,
}

/// 晉升決策：驗證分數必須達到基準加最小改善幅度
pub fn meets_promotion_bar(validate_score: f64, baseline_score: f64, min_improvement: f64) -> bool {
    validate_score >= baseline_score + min_improvement
}

/// 探索 → 驗證晉升管線
pub struct PromotionPipeline {
    engine: Arc<dyn BacktestEngine>,
    /// 驗證階段計分器（約束可比探索階段更嚴格）
    scorer: Scorer,
    config: PromotionConfig,
}

impl PromotionPipeline {
    pub fn new(engine: Arc<dyn BacktestEngine>, scorer: Scorer, config: PromotionConfig) -> Self {
        Self {
            engine,
            scorer,
            config,
        }
    }

    /// 從探索記錄中選出排名前 N 的候選
    ///
    /// 只有完成且無硬約束違反的試驗可入榜；同一簽章只取一次。
    pub fn rank_candidates<'a>(&self, records: &'a [TrialRecord]) -> Vec<&'a TrialRecord> {
        let mut eligible: Vec<&TrialRecord> = records
            .iter()
            .filter(|r| {
                r.status == TrialStatus::Completed
                    && r.hard_failures.is_empty()
                    && r.score.is_some()
            })
            .collect();
        eligible.sort_by(|a, b| b.score.unwrap().total_cmp(&a.score.unwrap()));

        let mut seen = std::collections::HashSet::new();
        eligible
            .into_iter()
            .filter(|r| seen.insert(r.signature.clone()))
            .take(self.config.top_n)
            .collect()
    }

    /// 對候選逐一重跑驗證窗並做晉升決策
    pub async fn evaluate(
        &self,
        explore_records: &[TrialRecord],
        validate_range: &TimeRange,
    ) -> PromotionReport {
        let candidates = self.rank_candidates(explore_records);
        info!(
            candidates = candidates.len(),
            baseline = self.config.baseline_score,
            min_improvement = self.config.min_improvement,
            "進入驗證階段"
        );

        let mut outcomes = Vec::with_capacity(candidates.len());
        for record in candidates {
            let config = Configuration::from_flat(record.parameters.clone());
            let outcome = match self.engine.run_backtest(&config, validate_range).await {
                Ok(report) => TrialOutcome::classify(report),
                Err(e) => {
                    warn!(trial = record.trial_number, error = %e, "驗證重跑失敗");
                    TrialOutcome::ExecutionFailed {
                        reason: e.to_string(),
                    }
                }
            };
            let block = self.scorer.score(&outcome);
            let eligible = block.hard_failures.is_empty()
                && meets_promotion_bar(
                    block.score,
                    self.config.baseline_score,
                    self.config.min_improvement,
                );
            info!(
                trial = record.trial_number,
                explore_score = record.score.unwrap_or_default(),
                validate_score = block.score,
                eligible,
                "驗證完成"
            );
            outcomes.push(CandidateOutcome {
                trial_number: record.trial_number,
                signature: record.signature.clone(),
                explore_score: record.score.unwrap_or_default(),
                validate_score: block.score,
                hard_failures: block.hard_failures,
                eligible,
            });
        }

        let promoted = outcomes
            .iter()
            .filter(|c| c.eligible)
            .max_by(|a, b| a.validate_score.total_cmp(&b.validate_score))
            .cloned();

        match &promoted {
            Some(c) => info!(
                signature = %c.signature,
                validate_score = c.validate_score,
                "候選晉升"
            ),
            None => info!("無候選通過驗證門檻"),
        }

        PromotionReport {
            baseline_score: self.config.baseline_score,
            min_improvement: self.config.min_improvement,
            candidates: outcomes,
            promoted,
            generated_at: Utc::now(),
        }
    }

    /// 將報告寫入回合目錄
    pub fn write_report(
        report: &PromotionReport,
        run_dir: &Path,
    ) -> Result<PathBuf, std::io::Error> {
        let path = run_dir.join("promotion_report.json");
        let payload = serde_json::to_string_pretty(report)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, payload)?;
        Ok(path)
    }
}
