use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 回測引擎回報的原始指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    /// 總報酬率（小數，0.12 = 12%）
    pub total_return: f64,
    /// 最大回撤（小數，正值）
    pub max_drawdown: f64,
    pub profit_factor: f64,
    pub trade_count: u64,
    pub sharpe_ratio: f64,
    /// 引擎額外回報的指標，原樣保留
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, f64>,
}

impl BacktestMetrics {
    /// 所有數值指標皆為有限值
    pub fn all_finite(&self) -> bool {
        self.total_return.is_finite()
            && self.max_drawdown.is_finite()
            && self.profit_factor.is_finite()
            && self.sharpe_ratio.is_finite()
            && self.extra.values().all(|v| v.is_finite())
    }
}

/// 引擎單次執行的完整回報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    pub metrics: BacktestMetrics,
    /// 引擎寫出的結果工件路徑（由協調器指定，非掃描目錄取得）
    pub artifact_path: PathBuf,
}

/// 試驗結果分類
///
/// 退化類別（無效數值、零交易、執行失敗）驅動計分器的罰分表，
/// 絕不允許被當成中性結果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrialOutcome {
    /// 指標完整且有限
    Valid {
        metrics: BacktestMetrics,
        artifact_path: PathBuf,
    },
    /// 指標中出現 NaN 或 Inf
    InvalidNumeric { metrics: BacktestMetrics },
    /// 執行完成但未產生任何交易
    ZeroOutcome { metrics: BacktestMetrics },
    /// 崩潰或逾時
    ExecutionFailed { reason: String },
}

impl TrialOutcome {
    /// 將引擎回報分類
    ///
    /// 分類順序：數值有效性優先於交易數，NaN 的 trade_count
    /// 不可能掩蓋無效數值。
    pub fn classify(report: EngineReport) -> Self {
        if !report.metrics.all_finite() {
            return TrialOutcome::InvalidNumeric {
                metrics: report.metrics,
            };
        }
        if report.metrics.trade_count == 0 {
            return TrialOutcome::ZeroOutcome {
                metrics: report.metrics,
            };
        }
        TrialOutcome::Valid {
            metrics: report.metrics,
            artifact_path: report.artifact_path,
        }
    }

    /// 是否為非退化結果（至少一個可觀察的交易動作）
    pub fn is_productive(&self) -> bool {
        matches!(self, TrialOutcome::Valid { .. })
    }

    pub fn metrics(&self) -> Option<&BacktestMetrics> {
        match self {
            TrialOutcome::Valid { metrics, .. }
            | TrialOutcome::InvalidNumeric { metrics }
            | TrialOutcome::ZeroOutcome { metrics } => Some(metrics),
            TrialOutcome::ExecutionFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn metrics(total_return: f64, trade_count: u64) -> BacktestMetrics {
        BacktestMetrics {
            total_return,
            max_drawdown: 0.1,
            profit_factor: 1.5,
            trade_count,
            sharpe_ratio: 1.0,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_classify_valid() {
        let report = EngineReport {
            metrics: metrics(0.12, 30),
            artifact_path: PathBuf::from("artifacts/abc.json"),
        };
        assert_matches!(TrialOutcome::classify(report), TrialOutcome::Valid { .. });
    }

    #[test]
    fn test_classify_nan_as_invalid_numeric() {
        let report = EngineReport {
            metrics: metrics(f64::NAN, 30),
            artifact_path: PathBuf::from("artifacts/abc.json"),
        };
        assert_matches!(
            TrialOutcome::classify(report),
            TrialOutcome::InvalidNumeric { .. }
        );
    }

    #[test]
    fn test_classify_zero_trades() {
        let report = EngineReport {
            metrics: metrics(0.0, 0),
            artifact_path: PathBuf::from("artifacts/abc.json"),
        };
        let outcome = TrialOutcome::classify(report);
        assert_matches!(outcome, TrialOutcome::ZeroOutcome { .. });
        assert!(!outcome.is_productive());
    }

    #[test]
    fn test_nan_in_extra_is_invalid() {
        let mut m = metrics(0.1, 10);
        m.extra.insert("calmar".to_string(), f64::INFINITY);
        let report = EngineReport {
            metrics: m,
            artifact_path: PathBuf::from("artifacts/abc.json"),
        };
        assert_matches!(
            TrialOutcome::classify(report),
            TrialOutcome::InvalidNumeric { .. }
        );
    }
}
