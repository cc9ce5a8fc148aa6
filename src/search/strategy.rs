use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::expander::ExpansionError;
use crate::domain_types::{Configuration, ParameterSpec};

/// 搜尋策略錯誤
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    #[error("未知的搜尋策略: {0}（可用: grid, random, tpe）")]
    UnknownStrategy(String),

    #[error("隨機類策略需要至少一個非 fixed 參數")]
    NothingToSample,
}

/// 策略種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Grid,
    Random,
    Tpe,
}

impl FromStr for StrategyKind {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, SearchError> {
        match s.to_lowercase().as_str() {
            "grid" => Ok(StrategyKind::Grid),
            "random" => Ok(StrategyKind::Random),
            "tpe" => Ok(StrategyKind::Tpe),
            other => Err(SearchError::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Grid => "grid",
            StrategyKind::Random => "random",
            StrategyKind::Tpe => "tpe",
        };
        f.write_str(name)
    }
}

/// TPE 策略參數
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpeOptions {
    /// 信任模型前的純隨機試驗數
    pub n_startup_trials: usize,
    /// 好壞分割分位數
    pub gamma: f64,
    /// 每次提議評估的候選數
    pub n_ei_candidates: usize,
}

impl Default for TpeOptions {
    fn default() -> Self {
        Self {
            n_startup_trials: 10,
            gamma: 0.25,
            n_ei_candidates: 24,
        }
    }
}

/// 搜尋策略介面（ask/tell）
///
/// 併發下多個工作者可能在任何 `tell` 之前連續 `ask`；
/// 協調器以 `tell_pending` 先行塞入悲觀佔位分數，真實分數
/// 回來後由 `tell` 取代，降低併發工作者收斂到同一點的機率。
pub trait SearchStrategy: Send {
    fn name(&self) -> &'static str;

    /// 提議下一個配置；`None` 表示策略已耗盡
    fn ask(&mut self) -> Result<Option<Configuration>, SearchError>;

    /// 登記在途試驗的悲觀佔位分數
    fn tell_pending(&mut self, _trial_number: u64, _config: &Configuration) {}

    /// 回饋真實分數（重複命中快取時必須是快取的真實分數，
    /// 絕不可用中性零值替代）
    fn tell(&mut self, _trial_number: u64, _config: &Configuration, _score: f64) {}
}

/// 建構指定種類的策略
///
/// `pending_score` 為在途試驗的悲觀佔位分數，取計分器配置的
/// 執行失敗罰分；僅 TPE 使用。
pub fn build_strategy(
    kind: StrategyKind,
    spec: &ParameterSpec,
    seed: Option<u64>,
    tpe: &TpeOptions,
    pending_score: f64,
) -> Result<Box<dyn SearchStrategy>, SearchError> {
    match kind {
        StrategyKind::Grid => Ok(Box::new(super::grid::GridStrategy::new(spec)?)),
        StrategyKind::Random => Ok(Box::new(super::random::RandomStrategy::new(spec, seed)?)),
        StrategyKind::Tpe => Ok(Box::new(super::tpe::TpeStrategy::new(
            spec,
            seed,
            tpe.clone(),
            pending_score,
        )?)),
    }
}
