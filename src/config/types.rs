use serde::{Deserialize, Serialize};

use crate::config::validation::{ValidationError, ValidationUtils, Validator};
use crate::scoring::ScorerConfig;
use crate::search::TpeOptions;

/// 應用程序配置結構
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub log: LogConfig,
    pub search: SearchConfig,
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
}

impl Validator for ApplicationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證各個部分的配置
        self.log.validate()?;
        self.search.validate()?;
        self.executor.validate()?;
        self.scorer.validate()?;
        self.promotion.validate()?;

        Ok(())
    }
}

/// 日誌配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Validator for LogConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證日誌級別
        ValidationUtils::one_of(
            &self.level.to_lowercase(),
            &["trace", "debug", "info", "warn", "error"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>(),
            "log.level",
        )?;

        // 驗證日誌格式
        ValidationUtils::one_of(
            &self.format.to_lowercase(),
            &["pretty", "json"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>(),
            "log.format",
        )?;

        Ok(())
    }
}

/// 搜尋配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// 回合輸出根目錄
    pub output_dir: String,
    pub strategy: String,
    pub max_trials: u64,
    /// 併發試驗上限；0 表示取 CPU 核心數
    #[serde(default)]
    pub max_concurrent: u32,
    pub max_duplicate_streak: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    /// 整回合逾時（秒），0 表示不限
    #[serde(default)]
    pub run_timeout_secs: u64,
    #[serde(default)]
    pub tpe: TpeOptionsConfig,
}

impl SearchConfig {
    pub fn effective_max_concurrent(&self) -> usize {
        if self.max_concurrent == 0 {
            num_cpus::get()
        } else {
            self.max_concurrent as usize
        }
    }
}

impl Validator for SearchConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.output_dir, "search.output_dir")?;
        ValidationUtils::one_of(
            &self.strategy.to_lowercase(),
            &["grid", "random", "tpe"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>(),
            "search.strategy",
        )?;
        ValidationUtils::in_range(self.max_trials, 1, 1_000_000, "search.max_trials")?;
        ValidationUtils::in_range(self.max_concurrent, 0, 256, "search.max_concurrent")?;
        ValidationUtils::in_range(
            self.max_duplicate_streak,
            1,
            100_000,
            "search.max_duplicate_streak",
        )?;
        self.tpe.validate()?;

        Ok(())
    }
}

/// TPE 配置段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpeOptionsConfig {
    pub n_startup_trials: usize,
    pub gamma: f64,
    pub n_ei_candidates: usize,
}

impl Default for TpeOptionsConfig {
    fn default() -> Self {
        let d = TpeOptions::default();
        Self {
            n_startup_trials: d.n_startup_trials,
            gamma: d.gamma,
            n_ei_candidates: d.n_ei_candidates,
        }
    }
}

impl From<&TpeOptionsConfig> for TpeOptions {
    fn from(c: &TpeOptionsConfig) -> Self {
        Self {
            n_startup_trials: c.n_startup_trials,
            gamma: c.gamma,
            n_ei_candidates: c.n_ei_candidates,
        }
    }
}

impl Validator for TpeOptionsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(self.gamma, 0.01, 0.99, "search.tpe.gamma")?;
        ValidationUtils::in_range(self.n_ei_candidates, 1, 1000, "search.tpe.n_ei_candidates")?;

        Ok(())
    }
}

/// 執行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// 回測引擎可執行檔
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// 單一試驗逾時（秒）
    pub trial_timeout_secs: u64,
    /// 取消後等待在途試驗收尾的寬限（秒）
    pub grace_timeout_secs: u64,
    /// 探索階段時間窗（RFC3339）
    pub explore_start: String,
    pub explore_end: String,
    /// 驗證階段時間窗（RFC3339）
    pub validate_start: String,
    pub validate_end: String,
}

impl Validator for ExecutorConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.command, "executor.command")?;
        ValidationUtils::in_range(self.trial_timeout_secs, 1, 86_400, "executor.trial_timeout_secs")?;
        ValidationUtils::in_range(self.grace_timeout_secs, 1, 3_600, "executor.grace_timeout_secs")?;

        for (field, value) in [
            ("executor.explore_start", &self.explore_start),
            ("executor.explore_end", &self.explore_end),
            ("executor.validate_start", &self.validate_start),
            ("executor.validate_end", &self.validate_end),
        ] {
            if chrono::DateTime::parse_from_rfc3339(value).is_err() {
                return Err(ValidationError::InvalidValue(format!(
                    "{field} 不是有效的 RFC3339 時間: {value}"
                )));
            }
        }

        Ok(())
    }
}

/// 快取配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 是否重用前次回合的快取結果；預設關閉，避免邏輯變更後
    /// 靜默重用過時結果
    #[serde(default)]
    pub cross_run_reuse: bool,
}

/// 晉升流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// 進入驗證階段的候選數
    pub top_n: usize,
    /// 晉升所需的最小改善幅度
    pub min_improvement: f64,
    /// 現行基準策略的分數
    pub baseline_score: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            min_improvement: 0.0,
            baseline_score: 0.0,
        }
    }
}

impl Validator for PromotionConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(self.top_n, 1, 100, "promotion.top_n")?;
        if !self.min_improvement.is_finite() || self.min_improvement < 0.0 {
            return Err(ValidationError::InvalidValue(format!(
                "promotion.min_improvement 必須為非負有限值: {}",
                self.min_improvement
            )));
        }

        Ok(())
    }
}
