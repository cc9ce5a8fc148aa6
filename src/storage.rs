//! 持久化模組
//!
//! 試驗記錄與回合狀態的檔案系統儲存，為中斷後續跑提供
//! 唯一的事實來源。

pub mod records;
pub mod run_store;

pub use records::{
    BestTrialRef, RunDiagnostics, RunState, RunStatus, TrialRecord, TrialStatus,
};
pub use run_store::{RunStateStore, StoreError};
