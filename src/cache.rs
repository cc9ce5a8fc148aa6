//! 快取模組
//!
//! 內容定址的結果快取與重複簽章守衛。兩者皆由協調器上下文
//! 獨佔持有，在單一寫入者紀律下更新。

pub mod dedup;
pub mod result_cache;

pub use dedup::{DedupError, DuplicateCheck, DuplicateGuard, LedgerEntry};
pub use result_cache::{CacheError, ResultCache};
