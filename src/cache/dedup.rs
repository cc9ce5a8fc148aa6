use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::signature::TrialSignature;

/// 重複偵測錯誤
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("重複帳簿 IO 錯誤: {0}")]
    Io(#[from] std::io::Error),

    #[error("重複帳簿序列化錯誤: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(
        "連續重複/退化試驗達到上限 {bound}：自適應搜尋已在無效區域收斂，中止回合。\
         可調整參數空間或提高 max_duplicate_streak 後重試"
    )]
    StreakExceeded { streak: u32, bound: u32 },
}

/// 帳簿項目，僅追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub signature: String,
    pub first_seen_trial: u64,
    pub count: u32,
}

/// 簽章查核結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateCheck {
    New,
    Duplicate { count: u32 },
}

/// 重複簽章守衛
///
/// 追加式帳簿記錄每個簽章的出現次數，並維護連續非生產性
/// 試驗計數：重複與退化結果都會累加，只有產生可觀察交易的
/// 完成試驗會歸零。計數達到上限即中止回合，防止自適應取樣器
/// 在死區無限打轉。
pub struct DuplicateGuard {
    entries: HashMap<String, LedgerEntry>,
    streak: u32,
    max_streak: u32,
    ledger: Mutex<File>,
}

impl DuplicateGuard {
    /// 開啟（或續用）回合目錄下的帳簿
    pub fn open(run_dir: &Path, max_streak: u32) -> Result<Self, DedupError> {
        let path = run_dir.join("dedup_ledger.jsonl");
        let mut entries: HashMap<String, LedgerEntry> = HashMap::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LedgerEntry>(&line) {
                    Ok(entry) => {
                        // 後出現的行覆蓋前面的計數（追加語意）
                        entries.insert(entry.signature.clone(), entry);
                    }
                    Err(e) => warn!(error = %e, "略過無法解析的帳簿行"),
                }
            }
        }

        let ledger = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            entries,
            streak: 0,
            max_streak,
            ledger: Mutex::new(ledger),
        })
    }

    /// 查核簽章是否已出現過，並追加帳簿
    pub fn check(
        &mut self,
        signature: &TrialSignature,
        trial_number: u64,
    ) -> Result<DuplicateCheck, DedupError> {
        let entry = self
            .entries
            .entry(signature.as_str().to_string())
            .and_modify(|e| e.count += 1)
            .or_insert_with(|| LedgerEntry {
                signature: signature.as_str().to_string(),
                first_seen_trial: trial_number,
                count: 1,
            });
        let result = if entry.count > 1 {
            DuplicateCheck::Duplicate { count: entry.count }
        } else {
            DuplicateCheck::New
        };

        let line = serde_json::to_string(&*entry)?;
        let mut file = self.ledger.lock();
        writeln!(file, "{line}")?;
        Ok(result)
    }

    /// 記錄一次非生產性試驗（重複或退化結果）
    ///
    /// 計數達到上限時回傳 `StreakExceeded`，呼叫方應中止回合。
    pub fn record_unproductive(&mut self) -> Result<(), DedupError> {
        self.streak += 1;
        if self.streak >= self.max_streak {
            return Err(DedupError::StreakExceeded {
                streak: self.streak,
                bound: self.max_streak,
            });
        }
        Ok(())
    }

    /// 非退化完成試驗歸零連續計數
    pub fn record_productive(&mut self) {
        self.streak = 0;
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn known_signatures(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sig(s: &str) -> TrialSignature {
        TrialSignature::from_hex(s)
    }

    #[test]
    fn test_first_seen_is_new() {
        let dir = tempfile::tempdir().unwrap();
        let mut guard = DuplicateGuard::open(dir.path(), 10).unwrap();
        assert_eq!(guard.check(&sig("aaa"), 1).unwrap(), DuplicateCheck::New);
        assert_eq!(
            guard.check(&sig("aaa"), 2).unwrap(),
            DuplicateCheck::Duplicate { count: 2 }
        );
    }

    #[test]
    fn test_streak_aborts_at_exact_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut guard = DuplicateGuard::open(dir.path(), 5).unwrap();

        for _ in 0..4 {
            guard.record_unproductive().unwrap();
        }
        // 第 5 次達到上限
        assert_matches!(
            guard.record_unproductive(),
            Err(DedupError::StreakExceeded { streak: 5, bound: 5 })
        );
    }

    #[test]
    fn test_productive_resets_streak() {
        let dir = tempfile::tempdir().unwrap();
        let mut guard = DuplicateGuard::open(dir.path(), 3).unwrap();

        guard.record_unproductive().unwrap();
        guard.record_unproductive().unwrap();
        guard.record_productive();
        assert_eq!(guard.streak(), 0);
        guard.record_unproductive().unwrap();
        guard.record_unproductive().unwrap();
        assert_matches!(
            guard.record_unproductive(),
            Err(DedupError::StreakExceeded { .. })
        );
    }

    #[test]
    fn test_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut guard = DuplicateGuard::open(dir.path(), 10).unwrap();
            guard.check(&sig("aaa"), 1).unwrap();
            guard.check(&sig("bbb"), 2).unwrap();
        }
        let mut guard = DuplicateGuard::open(dir.path(), 10).unwrap();
        assert_eq!(guard.known_signatures(), 2);
        assert_eq!(
            guard.check(&sig("aaa"), 3).unwrap(),
            DuplicateCheck::Duplicate { count: 2 }
        );
    }
}
