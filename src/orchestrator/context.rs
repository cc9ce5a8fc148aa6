use std::path::Path;

use crate::cache::{DuplicateGuard, ResultCache};
use crate::storage::RunStateStore;

use super::OrchestratorError;

/// 協調器上下文
///
/// 明確持有結果快取、重複守衛與回合狀態存放區，以引用傳遞給
/// 各組件；不存在任何行程級單例。所有欄位的變更都在單一寫入者
/// 紀律下進行（外層以互斥鎖序列化）。
pub struct OrchestratorContext {
    pub cache: ResultCache,
    pub guard: DuplicateGuard,
    pub store: RunStateStore,
}

impl OrchestratorContext {
    /// 建立新回合的上下文
    ///
    /// `cache_dir` 與回合目錄分離：跨回合重用開啟時指向共享目錄。
    pub fn create(
        run_dir: &Path,
        cache_dir: &Path,
        load_cache: bool,
        run_id: String,
        strategy: String,
        spec_hash: String,
        max_duplicate_streak: u32,
    ) -> Result<Self, OrchestratorError> {
        let store = RunStateStore::create(run_dir, run_id, strategy, spec_hash)?;
        let cache = ResultCache::open(cache_dir, load_cache)?;
        let guard = DuplicateGuard::open(run_dir, max_duplicate_streak)?;
        Ok(Self {
            cache,
            guard,
            store,
        })
    }

    /// 載入既有回合以續跑
    pub fn resume(
        run_dir: &Path,
        cache_dir: &Path,
        spec_hash: &str,
        allow_spec_change: bool,
        max_duplicate_streak: u32,
    ) -> Result<Self, OrchestratorError> {
        let store = RunStateStore::load(run_dir, spec_hash, allow_spec_change)?;
        let cache = ResultCache::open(cache_dir, true)?;
        let guard = DuplicateGuard::open(run_dir, max_duplicate_streak)?;
        Ok(Self {
            cache,
            guard,
            store,
        })
    }
}
