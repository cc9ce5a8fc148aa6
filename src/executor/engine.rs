use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::outcome::EngineReport;
use crate::domain_types::Configuration;

/// 回測時間窗
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

/// 試驗執行錯誤
///
/// 皆為試驗層級錯誤：記錄並罰分後搜尋繼續，不中止整個回合。
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("回測程序啟動失敗: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("回測逾時 ({timeout_secs} 秒)")]
    Timeout { timeout_secs: u64 },

    #[error("回測程序以非零狀態結束 (code={code:?}): {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("回測工件不存在: {path}")]
    ArtifactMissing { path: String },

    #[error("回測工件解析失敗: {0}")]
    ArtifactParse(#[source] serde_json::Error),

    #[error("IO 錯誤: {0}")]
    Io(#[from] std::io::Error),
}

/// 回測引擎介面
///
/// 協調器唯一的外部協作者。實作必須把結果寫到呼叫方指定的
/// 確定性工件路徑，絕不依賴目錄掃描回傳結果。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BacktestEngine: Send + Sync {
    async fn run_backtest(
        &self,
        config: &Configuration,
        range: &TimeRange,
    ) -> Result<EngineReport, ExecutionError>;
}
