use super::expander::{expand, GridExpansion};
use super::strategy::{SearchError, SearchStrategy};
use crate::domain_types::{Configuration, ParameterSpec};

/// 網格策略
///
/// 依序消費展開器，不使用任何回饋。
pub struct GridStrategy {
    expansion: GridExpansion,
}

impl GridStrategy {
    pub fn new(spec: &ParameterSpec) -> Result<Self, SearchError> {
        Ok(Self {
            expansion: expand(spec)?,
        })
    }

    pub fn cardinality(&self) -> u64 {
        self.expansion.cardinality()
    }
}

impl SearchStrategy for GridStrategy {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn ask(&mut self) -> Result<Option<Configuration>, SearchError> {
        Ok(self.expansion.next())
    }
}
