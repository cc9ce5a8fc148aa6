use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::records::{BestTrialRef, RunState, RunStatus, TrialRecord, TrialStatus};

/// 回合狀態儲存錯誤
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("回合儲存 IO 錯誤: {0}")]
    Io(#[from] std::io::Error),

    #[error("回合儲存序列化錯誤: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("找不到回合中繼資料: {path}")]
    MetaMissing { path: String },

    #[error(
        "規格與持久化狀態不符 (既有 {persisted}, 當前 {current})。\
         規格變更後續跑會重用不可比較的結果；確認無誤可用 --allow-spec-change 覆蓋"
    )]
    ResumeMismatch { persisted: String, current: String },
}

/// 回合狀態存放區
///
/// 持久化佈局（每回合一個目錄）：
/// - `run_meta.json`   回合中繼資料（原子寫入）
/// - `trial_<NNNNN>.json` 每筆試驗一個檔案
/// - `best_trial.json` 當前最佳有效試驗快照
#[derive(Debug)]
pub struct RunStateStore {
    run_dir: PathBuf,
    state: RunState,
}

impl RunStateStore {
    const META_FILE: &'static str = "run_meta.json";
    const BEST_FILE: &'static str = "best_trial.json";

    /// 建立新回合
    pub fn create(
        run_dir: impl Into<PathBuf>,
        run_id: String,
        strategy: String,
        spec_hash: String,
    ) -> Result<Self, StoreError> {
        let run_dir = run_dir.into();
        std::fs::create_dir_all(&run_dir)?;
        let store = Self {
            run_dir,
            state: RunState::new(run_id, strategy, spec_hash),
        };
        store.save_meta()?;
        Ok(store)
    }

    /// 載入既有回合以續跑
    ///
    /// `spec_hash` 不符時回傳 `ResumeMismatch`，除非明確覆蓋。
    pub fn load(
        run_dir: impl Into<PathBuf>,
        spec_hash: &str,
        allow_spec_change: bool,
    ) -> Result<Self, StoreError> {
        let run_dir = run_dir.into();
        let meta_path = run_dir.join(Self::META_FILE);
        if !meta_path.exists() {
            return Err(StoreError::MetaMissing {
                path: meta_path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(&meta_path)?;
        let mut state: RunState = serde_json::from_str(&raw)?;

        if state.spec_hash != spec_hash {
            if !allow_spec_change {
                return Err(StoreError::ResumeMismatch {
                    persisted: state.spec_hash.clone(),
                    current: spec_hash.to_string(),
                });
            }
            info!(
                old = %state.spec_hash,
                new = %spec_hash,
                "規格已變更，依明確覆蓋續跑"
            );
            state.spec_hash = spec_hash.to_string();
        }

        state.status = RunStatus::Running;
        let store = Self { run_dir, state };
        store.save_meta()?;
        Ok(store)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// 追加一筆試驗記錄並更新回合統計
    pub fn append_trial(&mut self, record: &TrialRecord) -> Result<(), StoreError> {
        let path = self
            .run_dir
            .join(format!("trial_{:05}.json", record.trial_number));
        std::fs::write(&path, serde_json::to_string_pretty(record)?)?;

        self.state.total_attempted += 1;
        match record.status {
            TrialStatus::SkippedDuplicate => self.state.duplicate_count += 1,
            TrialStatus::SkippedCached => {
                self.state.duplicate_count += 1;
                self.state.cache_hit_count += 1;
            }
            TrialStatus::Error => self.state.diagnostics.error_count += 1,
            _ => {}
        }
        if record
            .metrics
            .as_ref()
            .is_some_and(|m| m.trade_count == 0)
        {
            self.state.diagnostics.zero_outcome_count += 1;
        }

        // 僅完成、無硬約束違反且有實際交易的試驗可成為最佳；
        // 零交易與無效數值雖以罰分完成，不得佔據最佳位
        let productive = record
            .metrics
            .as_ref()
            .is_some_and(|m| m.trade_count > 0 && m.all_finite());
        if record.status == TrialStatus::Completed && record.hard_failures.is_empty() && productive
        {
            if let Some(score) = record.score {
                let improved = self
                    .state
                    .best_trial_ref
                    .as_ref()
                    .map_or(true, |best| score > best.score);
                if improved {
                    self.state.best_trial_ref = Some(BestTrialRef {
                        trial_number: record.trial_number,
                        signature: record.signature.clone(),
                        score,
                    });
                    std::fs::write(
                        self.run_dir.join(Self::BEST_FILE),
                        serde_json::to_string_pretty(record)?,
                    )?;
                    debug!(trial = record.trial_number, score, "更新最佳試驗");
                }
            }
        }

        self.save_meta()
    }

    /// 讀回所有試驗記錄，依試驗編號排序
    pub fn load_trials(&self) -> Result<Vec<TrialRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.run_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("trial_") || !name.ends_with(".json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            records.push(serde_json::from_str::<TrialRecord>(&raw)?);
        }
        records.sort_by_key(|r| r.trial_number);
        Ok(records)
    }

    /// 下一個可用的試驗編號（由派發時間決定，單調遞增）
    pub fn next_trial_number(&self) -> Result<u64, StoreError> {
        Ok(self
            .load_trials()?
            .last()
            .map_or(1, |r| r.trial_number + 1))
    }

    /// 定稿回合狀態
    pub fn finalize(
        &mut self,
        status: RunStatus,
        abort_reason: Option<String>,
    ) -> Result<(), StoreError> {
        self.state.status = status;
        self.state.diagnostics.abort_reason = abort_reason;
        self.save_meta()
    }

    /// 原子寫入中繼資料：先寫暫存檔再改名
    fn save_meta(&self) -> Result<(), StoreError> {
        let mut state = self.state.clone();
        state.updated_at = Utc::now();
        let tmp = self.run_dir.join(".run_meta.json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&state)?)?;
        std::fs::rename(&tmp, self.run_dir.join(Self::META_FILE))?;
        Ok(())
    }
}
