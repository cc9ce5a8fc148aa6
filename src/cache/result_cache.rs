use dashmap::DashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::signature::TrialSignature;
use crate::storage::records::TrialRecord;

/// 結果快取錯誤
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("快取 IO 錯誤: {0}")]
    Io(#[from] std::io::Error),

    #[error("快取序列化錯誤: {0}")]
    Serde(#[from] serde_json::Error),
}

/// 內容定址的試驗結果快取
///
/// 記憶體索引加上 `_cache/<signature>.json` 的持久層。
/// 回合內不過期；跨回合重用需明確開啟，避免邏輯變更後
/// 靜默重用過時結果。
pub struct ResultCache {
    dir: PathBuf,
    index: DashMap<String, TrialRecord>,
}

impl ResultCache {
    /// 在回合目錄下建立快取，必要時載入既有項目
    pub fn open(run_dir: &Path, load_existing: bool) -> Result<Self, CacheError> {
        let dir = run_dir.join("_cache");
        std::fs::create_dir_all(&dir)?;
        let cache = Self {
            dir,
            index: DashMap::new(),
        };
        if load_existing {
            cache.load_from_disk()?;
        }
        Ok(cache)
    }

    fn load_from_disk(&self) -> Result<(), CacheError> {
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<TrialRecord>(&raw) {
                Ok(record) => {
                    self.index.insert(record.signature.clone(), record);
                }
                Err(e) => {
                    // 單一壞檔不阻斷載入
                    warn!(path = %path.display(), error = %e, "略過無法解析的快取檔");
                }
            }
        }
        debug!(entries = self.index.len(), "結果快取載入完成");
        Ok(())
    }

    /// 以簽章查詢完整的已儲存記錄
    pub fn get(&self, signature: &TrialSignature) -> Option<TrialRecord> {
        self.index.get(signature.as_str()).map(|r| r.clone())
    }

    /// 寫入記錄：先落盤再更新索引
    pub fn put(&self, signature: &TrialSignature, record: &TrialRecord) -> Result<(), CacheError> {
        let path = self.dir.join(format!("{signature}.json"));
        let payload = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, payload)?;
        self.index
            .insert(signature.as_str().to_string(), record.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::records::TrialStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(signature: &str, score: f64) -> TrialRecord {
        TrialRecord {
            trial_number: 1,
            signature: signature.to_string(),
            parameters: BTreeMap::new(),
            status: TrialStatus::Completed,
            metrics: None,
            score: Some(score),
            hard_failures: Vec::new(),
            duration_ms: 10,
            timestamp: Utc::now(),
            artifact_path: None,
        }
    }

    #[test]
    fn test_put_then_get_returns_full_record() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path(), false).unwrap();
        let sig = TrialSignature::from_hex("abc123");

        cache.put(&sig, &record("abc123", 42.5)).unwrap();
        let got = cache.get(&sig).unwrap();
        assert_eq!(got.score, Some(42.5));
        assert_eq!(got.signature, "abc123");
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = ResultCache::open(dir.path(), false).unwrap();
            cache
                .put(&TrialSignature::from_hex("abc123"), &record("abc123", 7.0))
                .unwrap();
        }
        let reloaded = ResultCache::open(dir.path(), true).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded
                .get(&TrialSignature::from_hex("abc123"))
                .unwrap()
                .score,
            Some(7.0)
        );
    }

    #[test]
    fn test_miss_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path(), false).unwrap();
        assert!(cache.get(&TrialSignature::from_hex("missing")).is_none());
    }
}
