//! 試驗執行模組
//!
//! 定義回測引擎介面、子程序實作與結果分類。引擎是協調器唯一的
//! 長時間阻塞操作，以逾時與確定性工件路徑約束。

pub mod engine;
pub mod outcome;
pub mod subprocess;

pub use engine::{BacktestEngine, ExecutionError, TimeRange};
pub use outcome::{BacktestMetrics, EngineReport, TrialOutcome};
pub use subprocess::SubprocessEngine;
