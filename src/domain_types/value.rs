use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 參數值節點
///
/// 配置樹的基本單位。標量、列表與映射組成一棵強型別的樹，
/// 取代動態字典的深度合併。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// 建立空的映射節點
    pub fn empty_map() -> Self {
        ParamValue::Map(BTreeMap::new())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, ParamValue::Map(_))
    }

    /// 遞迴合併：`other` 覆蓋 `self`
    ///
    /// 兩邊皆為映射時逐鍵合併，其餘情況以 `other` 取代。
    pub fn merge(&mut self, other: &ParamValue) {
        match (self, other) {
            (ParamValue::Map(base), ParamValue::Map(over)) => {
                for (key, value) in over {
                    match base.get_mut(key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            base.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            (slot, other) => *slot = other.clone(),
        }
    }

    /// 依點分路徑寫入葉值，沿途自動建立映射節點
    pub fn set_path(&mut self, path: &str, value: ParamValue) {
        let mut node = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if !matches!(node, ParamValue::Map(_)) {
                *node = ParamValue::empty_map();
            }
            let ParamValue::Map(map) = node else {
                unreachable!()
            };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value);
                return;
            }
            node = map
                .entry(segment.to_string())
                .or_insert_with(ParamValue::empty_map);
        }
    }

    /// 依點分路徑讀取節點
    pub fn get_path(&self, path: &str) -> Option<&ParamValue> {
        let mut node = self;
        for segment in path.split('.') {
            match node {
                ParamValue::Map(map) => node = map.get(segment)?,
                _ => return None,
            }
        }
        Some(node)
    }

    /// 展平為點分路徑到葉值的有序映射
    pub fn flatten(&self) -> BTreeMap<String, ParamValue> {
        let mut out = BTreeMap::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into(&self, prefix: &str, out: &mut BTreeMap<String, ParamValue>) {
        match self {
            ParamValue::Map(map) => {
                for (key, value) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    value.flatten_into(&path, out);
                }
            }
            leaf => {
                out.insert(prefix.to_string(), leaf.clone());
            }
        }
    }

    /// 由展平映射重建樹
    pub fn from_flat(flat: &BTreeMap<String, ParamValue>) -> Self {
        let mut root = ParamValue::empty_map();
        for (path, value) in flat {
            root.set_path(path, value.clone());
        }
        root
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ParamValue::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{key}:{value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
