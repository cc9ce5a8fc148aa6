//! 協調器模組
//!
//! 搜尋回合的核心迴圈：策略提議、簽章查核、併發派發、計分回饋
//! 與狀態持久化。共享可變狀態以單一寫入者紀律序列化。

pub mod context;
pub mod run;
pub mod scheduler;

pub use context::OrchestratorContext;
pub use run::{run_search, RunOptions, RunSummary};
pub use scheduler::TrialScheduler;

use thiserror::Error;

use crate::cache::{CacheError, DedupError};
use crate::domain_types::SpecError;
use crate::search::SearchError;
use crate::storage::StoreError;

/// 回合層級錯誤
///
/// 試驗層級的失敗（崩潰、逾時、退化結果）在迴圈內就地恢復，
/// 只有此處的錯誤會讓整個回合停止。
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("規格錯誤: {0}")]
    Spec(#[from] SpecError),

    #[error("搜尋策略錯誤: {0}")]
    Search(#[from] SearchError),

    #[error("結果快取錯誤: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Dedup(#[from] DedupError),

    #[error("回合狀態儲存錯誤: {0}")]
    Store(#[from] StoreError),

    #[error("回合已取消")]
    Cancelled,

    #[error("配置錯誤: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// 對應行程退出碼：1 配置/規格錯誤、2 中止（連續重複/取消）、
    /// 3 不可恢復的 I/O 錯誤
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Spec(_)
            | OrchestratorError::Search(_)
            | OrchestratorError::Config(_) => 1,
            OrchestratorError::Dedup(DedupError::StreakExceeded { .. })
            | OrchestratorError::Cancelled => 2,
            OrchestratorError::Dedup(_)
            | OrchestratorError::Cache(_)
            | OrchestratorError::Store(_) => 3,
        }
    }
}
