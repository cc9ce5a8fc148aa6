//! 計分模組
//!
//! 將原始回測指標或退化結果類別換算為單一可比較的純量分數。
//! 退化類別使用固定且嚴格排序的罰分：
//! 執行失敗 < 無效數值 < 零交易 < 無快取重複 < 違反硬約束 < 完全有效。
//! 此全序讓自適應搜尋永遠偏好更接近可行域的配置。
//!
//! 罰分大小為經驗常數，可由 `[scorer]` 配置段覆寫；排序關係由
//! 測試保證，數值本身不是。

use serde::{Deserialize, Serialize};

use crate::config::validation::{ValidationError, ValidationUtils, Validator};
use crate::executor::{BacktestMetrics, TrialOutcome};

/// 執行失敗（崩潰/逾時）罰分
pub const PENALTY_EXECUTION_ERROR: f64 = -2000.0;
/// 指標含 NaN/Inf 罰分
pub const PENALTY_INVALID_NUMERIC: f64 = -1800.0;
/// 零交易罰分
pub const PENALTY_ZERO_OUTCOME: f64 = -1500.0;
/// 重複且無快取分數可用時的罰分
pub const PENALTY_DUPLICATE_NO_CACHE: f64 = -1200.0;
/// 違反硬約束的罰分帶基準
pub const PENALTY_CONSTRAINT_BASE: f64 = -1000.0;
/// 有效分數下限，保證有效試驗永遠高於所有罰分帶
pub const VALID_SCORE_FLOOR: f64 = -900.0;
/// 軟約束罰分帶半寬：軟模式分數落在 constraint_base ± 此值
pub const SOFT_CONSTRAINT_BAND: f64 = 50.0;

/// 罰分表，全部可由配置覆寫
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyTable {
    pub execution_error: f64,
    pub invalid_numeric: f64,
    pub zero_outcome: f64,
    pub duplicate_no_cache: f64,
    pub constraint_base: f64,
    pub valid_floor: f64,
}

impl Default for PenaltyTable {
    fn default() -> Self {
        Self {
            execution_error: PENALTY_EXECUTION_ERROR,
            invalid_numeric: PENALTY_INVALID_NUMERIC,
            zero_outcome: PENALTY_ZERO_OUTCOME,
            duplicate_no_cache: PENALTY_DUPLICATE_NO_CACHE,
            constraint_base: PENALTY_CONSTRAINT_BASE,
            valid_floor: VALID_SCORE_FLOOR,
        }
    }
}

impl Validator for PenaltyTable {
    fn validate(&self) -> Result<(), ValidationError> {
        // 罰分必須維持嚴格全序；軟約束罰分帶 constraint_base ± SOFT_CONSTRAINT_BAND
        // 需完整落在 duplicate_no_cache 與 valid_floor 之間
        let ordered = self.execution_error < self.invalid_numeric
            && self.invalid_numeric < self.zero_outcome
            && self.zero_outcome < self.duplicate_no_cache
            && self.duplicate_no_cache < self.constraint_base - SOFT_CONSTRAINT_BAND
            && self.constraint_base + SOFT_CONSTRAINT_BAND <= self.valid_floor;
        if !ordered {
            return Err(ValidationError::InvalidValue(
                "scorer.penalties 未維持罰分全序（含軟約束罰分帶）".to_string(),
            ));
        }
        Ok(())
    }
}

/// 目標函數權重
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// 總報酬權重（報酬以百分比計入）
    pub total_return: f64,
    /// 回撤調整報酬權重
    pub drawdown_adjusted: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            total_return: 1.0,
            drawdown_adjusted: 0.5,
            sharpe_ratio: 2.0,
            profit_factor: 1.0,
        }
    }
}

/// 硬約束門檻
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardConstraints {
    pub min_trade_count: u64,
    /// 最大可容忍回撤（小數）
    pub max_drawdown: f64,
    pub min_profit_factor: f64,
}

impl Default for HardConstraints {
    fn default() -> Self {
        Self {
            min_trade_count: 10,
            max_drawdown: 0.30,
            min_profit_factor: 1.0,
        }
    }
}

/// 約束違反處理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintMode {
    /// 有界罰分，保留與原始分數的相對關係
    Soft,
    /// 固定大罰分並標記 hard_failures
    HardFail,
}

/// 計分器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default)]
    pub constraints: HardConstraints,
    #[serde(default = "default_constraint_mode")]
    pub constraint_mode: ConstraintMode,
    #[serde(default)]
    pub penalties: PenaltyTable,
}

fn default_constraint_mode() -> ConstraintMode {
    ConstraintMode::Soft
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            constraints: HardConstraints::default(),
            constraint_mode: default_constraint_mode(),
            penalties: PenaltyTable::default(),
        }
    }
}

impl Validator for ScorerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        self.penalties.validate()?;
        ValidationUtils::in_range(
            self.constraints.max_drawdown,
            0.0,
            1.0,
            "scorer.constraints.max_drawdown",
        )?;
        Ok(())
    }
}

/// 單一試驗的計分結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBlock {
    pub score: f64,
    pub metrics: Option<BacktestMetrics>,
    /// 被違反的硬約束名稱
    pub hard_failures: Vec<String>,
}

impl ScoreBlock {
    fn penalty(score: f64) -> Self {
        Self {
            score,
            metrics: None,
            hard_failures: Vec::new(),
        }
    }
}

/// 計分器
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScorerConfig,
}

impl Scorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// 將試驗結果換算為 ScoreBlock
    pub fn score(&self, outcome: &TrialOutcome) -> ScoreBlock {
        let p = &self.config.penalties;
        match outcome {
            TrialOutcome::ExecutionFailed { .. } => ScoreBlock::penalty(p.execution_error),
            TrialOutcome::InvalidNumeric { metrics } => ScoreBlock {
                score: p.invalid_numeric,
                metrics: Some(metrics.clone()),
                hard_failures: Vec::new(),
            },
            TrialOutcome::ZeroOutcome { metrics } => ScoreBlock {
                score: p.zero_outcome,
                metrics: Some(metrics.clone()),
                hard_failures: Vec::new(),
            },
            TrialOutcome::Valid { metrics, .. } => self.score_valid(metrics),
        }
    }

    /// 重複且無快取分數時的固定罰分
    pub fn score_duplicate_without_cache(&self) -> ScoreBlock {
        ScoreBlock::penalty(self.config.penalties.duplicate_no_cache)
    }

    fn score_valid(&self, metrics: &BacktestMetrics) -> ScoreBlock {
        let failures = self.check_constraints(metrics);
        let raw = self.composite(metrics);
        let p = &self.config.penalties;

        if failures.is_empty() {
            return ScoreBlock {
                score: raw.max(p.valid_floor),
                metrics: Some(metrics.clone()),
                hard_failures: Vec::new(),
            };
        }

        let score = match self.config.constraint_mode {
            // 有界壓縮到約束罰分帶 constraint_base ± SOFT_CONSTRAINT_BAND
            ConstraintMode::Soft => {
                p.constraint_base + SOFT_CONSTRAINT_BAND * raw / (1.0 + raw.abs())
            }
            ConstraintMode::HardFail => p.constraint_base,
        };
        ScoreBlock {
            score,
            metrics: Some(metrics.clone()),
            hard_failures: failures,
        }
    }

    fn composite(&self, metrics: &BacktestMetrics) -> f64 {
        let w = &self.config.weights;
        let drawdown_adjusted = metrics.total_return / metrics.max_drawdown.max(0.01);
        w.total_return * metrics.total_return * 100.0
            + w.drawdown_adjusted * drawdown_adjusted
            + w.sharpe_ratio * metrics.sharpe_ratio
            + w.profit_factor * metrics.profit_factor
    }

    fn check_constraints(&self, metrics: &BacktestMetrics) -> Vec<String> {
        let c = &self.config.constraints;
        let mut failures = Vec::new();
        if metrics.trade_count < c.min_trade_count {
            failures.push(format!(
                "min_trade_count: {} < {}",
                metrics.trade_count, c.min_trade_count
            ));
        }
        if metrics.max_drawdown > c.max_drawdown {
            failures.push(format!(
                "max_drawdown: {:.4} > {:.4}",
                metrics.max_drawdown, c.max_drawdown
            ));
        }
        if metrics.profit_factor < c.min_profit_factor {
            failures.push(format!(
                "min_profit_factor: {:.4} < {:.4}",
                metrics.profit_factor, c.min_profit_factor
            ));
        }
        failures
    }
}
