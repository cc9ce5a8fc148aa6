// 模組定義
pub mod cache;
pub mod config;
pub mod domain_types;
pub mod executor;
pub mod orchestrator;
pub mod promotion;
pub mod scoring;
pub mod search;
pub mod signature;
pub mod storage;
