// src/keywords/mod.rs
pub mod cache;
pub mod defaults;
pub mod resolver;
pub mod sheet;
pub mod types;

pub use cache::KeywordCache;
pub use resolver::{normalize_rows, KeywordResolver};
pub use types::{Keyword, KeywordSnapshot, KeywordSourceBackend, RawKeywordRow, SnapshotSource};
