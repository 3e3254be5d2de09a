//! Resource cache and tab/session management for podtail
//!
//! This crate owns the live mirror of cluster state (fed by the watch feed
//! from `podtail-k8s`) and the per-tab log sessions: buffers, search state,
//! and the single active live stream.

mod cache;
mod session;
mod source;

pub use cache::ResourceCache;
pub use session::{
    DEFAULT_TAIL_LINES, Intent, LiveTail, SearchToggle, SessionError, SessionManager,
    StreamState, Tab, UiEvent,
};
pub use source::{LogFetch, LogSource};

// Re-export types used in our public API
pub use podtail_types::{NamespaceInfo, PodInfo, ResourceSnapshot, TabId, WatchEvent};
