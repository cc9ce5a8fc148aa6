use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain_types::{Configuration, ParamValue, ParameterSpec};

/// 網格展開錯誤
#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("參數 {path} 為連續域，網格展開僅支援離散葉節點")]
    ContinuousLeaf { path: String },

    #[error("規格未宣告任何參數")]
    EmptySpec,
}

/// 惰性的笛卡兒積展開
///
/// 依宣告順序深度優先：第一個參數為最外層軸，最後一個參數
/// 變動最快。順序確定、可重新開始，純資料結構無副作用。
pub struct GridExpansion {
    baseline: ParamValue,
    axes: Vec<(String, Vec<ParamValue>)>,
    /// 里程計索引；None 表示已耗盡
    cursor: Option<Vec<usize>>,
}

/// 將宣告式規格展開為配置序列
pub fn expand(spec: &ParameterSpec) -> Result<GridExpansion, ExpansionError> {
    if spec.parameters.is_empty() {
        return Err(ExpansionError::EmptySpec);
    }
    let mut axes = Vec::with_capacity(spec.parameters.len());
    for def in &spec.parameters {
        let values = def
            .domain
            .discrete_values()
            .ok_or_else(|| ExpansionError::ContinuousLeaf {
                path: def.path.clone(),
            })?;
        axes.push((def.path.clone(), values));
    }
    Ok(GridExpansion {
        baseline: spec.baseline.clone(),
        axes,
        cursor: Some(vec![0; spec.parameters.len()]),
    })
}

impl GridExpansion {
    /// 展開總數 ∏nᵢ
    pub fn cardinality(&self) -> u64 {
        self.axes
            .iter()
            .map(|(_, values)| values.len() as u64)
            .product()
    }

    /// 回到序列起點
    pub fn restart(&mut self) {
        self.cursor = Some(vec![0; self.axes.len()]);
    }

    fn materialize(&self, indices: &[usize]) -> Configuration {
        let mut overrides = BTreeMap::new();
        for ((path, values), &i) in self.axes.iter().zip(indices) {
            overrides.insert(path.clone(), values[i].clone());
        }
        Configuration::compose(&self.baseline, &overrides)
    }

    /// 進位：最後一軸變動最快
    fn advance(&mut self) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        for axis in (0..cursor.len()).rev() {
            cursor[axis] += 1;
            if cursor[axis] < self.axes[axis].1.len() {
                return;
            }
            cursor[axis] = 0;
        }
        self.cursor = None;
    }
}

impl Iterator for GridExpansion {
    type Item = Configuration;

    fn next(&mut self) -> Option<Configuration> {
        let indices = self.cursor.clone()?;
        let config = self.materialize(&indices);
        self.advance();
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::canonicalize;
    use std::collections::HashSet;

    const SPEC: &str = r#"
baseline:
  strategy:
    lookback: 20
parameters:
  - path: a
    grid: [1, 2]
  - path: b
    grid: [10, 20, 30]
  - path: c
    grid: [true, false]
"#;

    #[test]
    fn test_cardinality_is_product() {
        let spec = ParameterSpec::parse(SPEC).unwrap();
        let expansion = expand(&spec).unwrap();
        assert_eq!(expansion.cardinality(), 12);
    }

    #[test]
    fn test_all_configurations_unique() {
        let spec = ParameterSpec::parse(SPEC).unwrap();
        let configs: Vec<Configuration> = expand(&spec).unwrap().collect();
        assert_eq!(configs.len(), 12);

        let signatures: HashSet<_> = configs.iter().map(canonicalize).collect();
        assert_eq!(signatures.len(), 12);
    }

    #[test]
    fn test_deterministic_declared_order() {
        let spec = ParameterSpec::parse(SPEC).unwrap();
        let first: Vec<Configuration> = expand(&spec).unwrap().collect();
        let second: Vec<Configuration> = expand(&spec).unwrap().collect();
        assert_eq!(first, second);

        // 最後一軸變動最快
        assert_eq!(first[0].get("c"), Some(&ParamValue::Bool(true)));
        assert_eq!(first[1].get("c"), Some(&ParamValue::Bool(false)));
        assert_eq!(first[0].get("a"), first[1].get("a"));
    }

    #[test]
    fn test_baseline_carried_through() {
        let spec = ParameterSpec::parse(SPEC).unwrap();
        let config = expand(&spec).unwrap().next().unwrap();
        assert_eq!(config.get("strategy.lookback"), Some(&ParamValue::Int(20)));
    }

    #[test]
    fn test_continuous_leaf_rejected() {
        let raw = r#"
parameters:
  - path: x
    loguniform: { low: 0.001, high: 0.1 }
"#;
        let spec = ParameterSpec::parse(raw).unwrap();
        assert!(matches!(
            expand(&spec),
            Err(ExpansionError::ContinuousLeaf { .. })
        ));
    }

    #[test]
    fn test_restart() {
        let spec = ParameterSpec::parse(SPEC).unwrap();
        let mut expansion = expand(&spec).unwrap();
        let first = expansion.next().unwrap();
        expansion.by_ref().for_each(drop);
        assert!(expansion.next().is_none());

        expansion.restart();
        assert_eq!(expansion.next().unwrap(), first);
    }
}
