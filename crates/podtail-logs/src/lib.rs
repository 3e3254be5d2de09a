//! Log buffering and search for podtail
//!
//! This crate provides the bounded per-tab log buffer and the pure search
//! engine that computes matches over its contents.

mod buffer;
mod search;

pub use buffer::{LogBuffer, MAX_LOG_LINES};
pub use search::{SearchError, search};

// Re-export types used in our public API
pub use podtail_types::{Match, SearchOptions, SearchResult};
