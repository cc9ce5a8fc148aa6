use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

use super::value::ParamValue;

/// 參數規格錯誤
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("無法讀取規格檔案 {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("規格檔案解析失敗: {0}")]
    Parse(String),

    #[error("參數 {path} 缺少型別標註 (fixed/grid/float/int/loguniform)")]
    UntypedLeaf { path: String },

    #[error("參數 {path} 的 grid 不可為空")]
    EmptyGrid { path: String },

    #[error("參數 {path} 範圍無效: low={low} high={high}")]
    InvalidRange { path: String, low: f64, high: f64 },

    #[error("參數 {path} 的步長必須為正值: {step}")]
    InvalidStep { path: String, step: f64 },

    #[error("參數 {path} 的 loguniform 下界必須為正值: {low}")]
    NonPositiveLogBound { path: String, low: f64 },

    #[error("參數路徑重複: {path}")]
    DuplicatePath { path: String },
}

/// 單一參數的取值域
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamDomain {
    /// 固定值，不參與搜尋
    Fixed(ParamValue),
    /// 離散候選集合
    Grid(Vec<ParamValue>),
    /// 浮點區間；有步長時離散化，無步長時僅供隨機類策略取樣
    Float {
        low: f64,
        high: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
    },
    /// 整數區間，步長預設為 1
    Int {
        low: i64,
        high: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<i64>,
    },
    /// 對數均勻分佈，僅供隨機類策略取樣
    Loguniform { low: f64, high: f64 },
}

impl ParamDomain {
    /// 是否為連續域（無法被網格枚舉）
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            ParamDomain::Float { step: None, .. } | ParamDomain::Loguniform { .. }
        )
    }

    fn validate(&self, path: &str) -> Result<(), SpecError> {
        match self {
            ParamDomain::Fixed(_) => Ok(()),
            ParamDomain::Grid(values) => {
                if values.is_empty() {
                    return Err(SpecError::EmptyGrid {
                        path: path.to_string(),
                    });
                }
                Ok(())
            }
            ParamDomain::Float { low, high, step } => {
                if low > high || !low.is_finite() || !high.is_finite() {
                    return Err(SpecError::InvalidRange {
                        path: path.to_string(),
                        low: *low,
                        high: *high,
                    });
                }
                if let Some(step) = step {
                    if *step <= 0.0 || !step.is_finite() {
                        return Err(SpecError::InvalidStep {
                            path: path.to_string(),
                            step: *step,
                        });
                    }
                }
                Ok(())
            }
            ParamDomain::Int { low, high, step } => {
                if low > high {
                    return Err(SpecError::InvalidRange {
                        path: path.to_string(),
                        low: *low as f64,
                        high: *high as f64,
                    });
                }
                if let Some(step) = step {
                    if *step <= 0 {
                        return Err(SpecError::InvalidStep {
                            path: path.to_string(),
                            step: *step as f64,
                        });
                    }
                }
                Ok(())
            }
            ParamDomain::Loguniform { low, high } => {
                if *low <= 0.0 {
                    return Err(SpecError::NonPositiveLogBound {
                        path: path.to_string(),
                        low: *low,
                    });
                }
                if low > high || !high.is_finite() {
                    return Err(SpecError::InvalidRange {
                        path: path.to_string(),
                        low: *low,
                        high: *high,
                    });
                }
                Ok(())
            }
        }
    }

    /// 枚舉離散取值；連續域回傳 `None`
    pub fn discrete_values(&self) -> Option<Vec<ParamValue>> {
        match self {
            ParamDomain::Fixed(value) => Some(vec![value.clone()]),
            ParamDomain::Grid(values) => Some(values.clone()),
            ParamDomain::Float {
                low,
                high,
                step: Some(step),
            } => {
                let mut values = Vec::new();
                let mut i = 0u32;
                loop {
                    let v = low + f64::from(i) * step;
                    // 容忍浮點累積誤差的包含式上界
                    if v > high + step * 1e-9 {
                        break;
                    }
                    values.push(ParamValue::Float(v));
                    i += 1;
                }
                Some(values)
            }
            ParamDomain::Int { low, high, step } => {
                let step = step.unwrap_or(1);
                Some(
                    (*low..=*high)
                        .step_by(step as usize)
                        .map(ParamValue::Int)
                        .collect(),
                )
            }
            _ => None,
        }
    }
}

/// 規格中宣告的單一參數
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    /// 點分路徑，例如 `strategy.entry_threshold`
    pub path: String,
    #[serde(flatten)]
    pub domain: ParamDomain,
}

/// 宣告式參數規格
///
/// `baseline` 為完整的基準配置樹，`parameters` 依宣告順序列出
/// 要搜尋的葉節點。順序即網格展開順序。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "ParamValue::empty_map")]
    pub baseline: ParamValue,
    pub parameters: Vec<ParamDef>,
}

impl ParameterSpec {
    /// 從 YAML 檔案載入並驗證
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// 解析 YAML 文字並驗證
    ///
    /// 未標註型別的葉節點在反序列化階段即失敗，此處轉為
    /// 帶路徑的驗證錯誤。
    pub fn parse(raw: &str) -> Result<Self, SpecError> {
        let spec: ParameterSpec =
            serde_yaml_bw::from_str(raw).map_err(|e| Self::classify_parse_error(raw, &e))?;
        spec.validate()?;
        Ok(spec)
    }

    /// 反序列化失敗時寬鬆重讀一次，找出缺少型別標註的葉節點
    fn classify_parse_error(raw: &str, error: &serde_yaml_bw::Error) -> SpecError {
        #[derive(Deserialize)]
        struct LooseSpec {
            #[serde(default)]
            parameters: Vec<LooseDef>,
        }
        #[derive(Deserialize)]
        struct LooseDef {
            #[serde(default)]
            path: String,
            #[serde(flatten)]
            rest: std::collections::BTreeMap<String, serde_yaml_bw::Value>,
        }
        const DOMAIN_TAGS: [&str; 5] = ["fixed", "grid", "float", "int", "loguniform"];

        if let Ok(loose) = serde_yaml_bw::from_str::<LooseSpec>(raw) {
            if let Some(def) = loose
                .parameters
                .iter()
                .find(|d| !d.rest.keys().any(|k| DOMAIN_TAGS.contains(&k.as_str())))
            {
                return SpecError::UntypedLeaf {
                    path: def.path.clone(),
                };
            }
        }
        SpecError::Parse(error.to_string())
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        let mut seen = std::collections::HashSet::new();
        for def in &self.parameters {
            if !seen.insert(def.path.as_str()) {
                return Err(SpecError::DuplicatePath {
                    path: def.path.clone(),
                });
            }
            def.domain.validate(&def.path)?;
        }
        Ok(())
    }

    /// 規格內容雜湊，用於續跑時比對規格是否變更
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(&digest[..16])
    }
}
