//! 搜尋模組
//!
//! 參數空間展開與三種搜尋策略（網格、隨機、TPE）的 ask/tell 介面。

pub mod expander;
pub mod grid;
pub mod random;
pub mod strategy;
pub mod tpe;

pub use expander::{expand, ExpansionError, GridExpansion};
pub use grid::GridStrategy;
pub use random::RandomStrategy;
pub use strategy::{build_strategy, SearchError, SearchStrategy, StrategyKind, TpeOptions};
pub use tpe::TpeStrategy;
