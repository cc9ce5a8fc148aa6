//! 領域模型模組
//!
//! 定義參數搜尋的核心資料結構：強型別參數值樹、宣告式參數規格
//! 以及完全解析後的試驗配置。

pub mod configuration;
pub mod param_spec;
pub mod value;

pub use configuration::Configuration;
pub use param_spec::{ParamDef, ParamDomain, ParameterSpec, SpecError};
pub use value::ParamValue;
