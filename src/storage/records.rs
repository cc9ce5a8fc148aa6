use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::domain_types::ParamValue;
use crate::executor::BacktestMetrics;

/// 試驗最終狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// 實際執行且完成
    Completed,
    /// 重複簽章且無快取，僅記罰分
    SkippedDuplicate,
    /// 重複簽章且命中快取，重用既有結果
    SkippedCached,
    /// 執行失敗（崩潰/逾時/無效數值）
    Error,
    /// 回合中止時仍在執行中
    Aborted,
}

/// 單次試驗的不可變記錄
///
/// 首次嘗試時建立，定稿後不再修改，逐筆追加到回合狀態存放區。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_number: u64,
    pub signature: String,
    /// 展平後的完整參數（可由此重建配置）
    pub parameters: BTreeMap<String, ParamValue>,
    pub status: TrialStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BacktestMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hard_failures: Vec<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
}

/// 最佳試驗引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTrialRef {
    pub trial_number: u64,
    pub signature: String,
    pub score: f64,
}

/// 回合狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
    Failed,
}

/// 回合診斷資訊
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub zero_outcome_count: u64,
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

/// 回合狀態，續跑的唯一事實來源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub strategy: String,
    /// 參數規格內容雜湊，續跑時比對
    pub spec_hash: String,
    pub status: RunStatus,
    pub total_attempted: u64,
    pub duplicate_count: u64,
    pub cache_hit_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_trial_ref: Option<BestTrialRef>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub diagnostics: RunDiagnostics,
}

impl RunState {
    pub fn new(run_id: String, strategy: String, spec_hash: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            strategy,
            spec_hash,
            status: RunStatus::Running,
            total_attempted: 0,
            duplicate_count: 0,
            cache_hit_count: 0,
            best_trial_ref: None,
            started_at: now,
            updated_at: now,
            diagnostics: RunDiagnostics::default(),
        }
    }
}
