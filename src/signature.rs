//! 試驗簽章模組
//!
//! 將配置正規化為穩定的內容雜湊，供結果快取與重複偵測使用。
//! 鍵排序加上固定精度的浮點捨入，保證語意相等的配置
//! （浮點值在捨入精度內相等）必定得到相同簽章。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::domain_types::{Configuration, ParamValue};

/// 浮點正規化精度（小數位數）
pub const FLOAT_PRECISION: i32 = 6;

/// 配置的正規化簽章
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialSignature(String);

impl TrialSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 由既有的十六進位字串還原（載入持久化狀態時使用）
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl fmt::Display for TrialSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 計算配置的正規化簽章
///
/// 展平視圖本身即按路徑排序，逐葉寫入正規化表示後取 SHA-256。
/// 純函數，無副作用，可跨執行緒併行呼叫。
pub fn canonicalize(config: &Configuration) -> TrialSignature {
    let mut hasher = Sha256::new();
    for (path, value) in config.flat() {
        hasher.update(path.as_bytes());
        hasher.update(b"=");
        hasher.update(canonical_repr(value).as_bytes());
        hasher.update(b";");
    }
    TrialSignature(hex::encode(hasher.finalize()))
}

/// 捨入浮點值到固定精度
pub fn normalize_float(v: f64) -> f64 {
    if !v.is_finite() {
        return v;
    }
    let scale = 10f64.powi(FLOAT_PRECISION);
    let rounded = (v * scale).round() / scale;
    // 避免 -0.0 與 0.0 產生不同表示
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

fn canonical_repr(value: &ParamValue) -> String {
    match value {
        ParamValue::Bool(v) => format!("b:{v}"),
        ParamValue::Int(v) => format!("i:{v}"),
        ParamValue::Float(v) => {
            if v.is_finite() {
                format!("f:{:.*}", FLOAT_PRECISION as usize, normalize_float(*v))
            } else {
                format!("f:{v}")
            }
        }
        ParamValue::Str(v) => format!("s:{v}"),
        ParamValue::List(items) => {
            let inner: Vec<String> = items.iter().map(canonical_repr).collect();
            format!("[{}]", inner.join(","))
        }
        ParamValue::Map(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}={}", canonical_repr(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}
