use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::value::ParamValue;

/// 完全解析的試驗配置
///
/// 由基準樹與一組覆蓋值合併而成，建立後不可變。
/// 同時保存樹狀與展平兩種視圖，展平視圖供簽章與持久化使用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    tree: ParamValue,
    flat: BTreeMap<String, ParamValue>,
}

impl Configuration {
    /// 將覆蓋值套用到基準樹上組成配置
    pub fn compose(baseline: &ParamValue, overrides: &BTreeMap<String, ParamValue>) -> Self {
        let mut tree = baseline.clone();
        for (path, value) in overrides {
            tree.set_path(path, value.clone());
        }
        let flat = tree.flatten();
        Self { tree, flat }
    }

    /// 由展平映射還原配置（用於驗證階段重建歷史試驗）
    pub fn from_flat(flat: BTreeMap<String, ParamValue>) -> Self {
        let tree = ParamValue::from_flat(&flat);
        Self { tree, flat }
    }

    pub fn tree(&self) -> &ParamValue {
        &self.tree
    }

    /// 點分路徑到葉值的有序視圖
    pub fn flat(&self) -> &BTreeMap<String, ParamValue> {
        &self.flat
    }

    pub fn get(&self, path: &str) -> Option<&ParamValue> {
        self.tree.get_path(path)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.tree).unwrap_or(serde_json::Value::Null)
    }
}
