//! Kubernetes client for podtail
//!
//! This crate provides cluster/context enumeration, log fetch with a live
//! follow channel, and the namespace/pod watch feed consumed by the
//! resource cache.

mod client;
mod watch;

pub use client::KubeClient;
pub use watch::spawn_watchers;

// Re-export types that are used in our public API
pub use podtail_types::{NamespaceInfo, PodInfo, TabId, WatchEvent};
