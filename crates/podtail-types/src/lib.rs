//! Shared types for podtail
//!
//! This crate contains data structures used across multiple podtail crates.

use serde::Serialize;
use std::fmt;

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// Namespace information
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NamespaceInfo {
    pub name: String,
}

impl NamespaceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Pod information
///
/// Pods are keyed by `namespace/name` and replaced wholesale on every
/// add/update event; there is no partial field merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    /// Container names in spec order
    pub containers: Vec<String>,
}

impl PodInfo {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            containers: Vec::new(),
        }
    }

    /// Cache key for this pod
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A materialized copy of the resource cache at one instant.
///
/// Both collections are captured under the same lock scope, so a snapshot
/// never shows a namespace set and a pod map from two different points in
/// cache-mutation time. Entries are sorted by key for stable consumption.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot {
    pub namespaces: Vec<NamespaceInfo>,
    pub pods: Vec<PodInfo>,
}

// ============================================================================
// Watch Events
// ============================================================================

/// Resource kind carried by a watch event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Namespace,
    Pod,
}

/// A typed change notification for one resource kind
#[derive(Clone, Debug)]
pub enum ResourceEvent<T> {
    Added(T),
    Updated(T),
    Deleted(T),
    /// Full replacement after a (re-)list. Entries absent from the list are
    /// removed, so objects deleted while a watch was down do not linger.
    Restarted(Vec<T>),
}

/// Event feed consumed by the resource cache.
///
/// `Synced` marks that a kind's initial list/watch sync finished; it fires
/// once per kind even when the sync failed (the cache then proceeds with
/// whatever state arrived).
#[derive(Clone, Debug)]
pub enum WatchEvent {
    Namespace(ResourceEvent<NamespaceInfo>),
    Pod(ResourceEvent<PodInfo>),
    Synced(ResourceKind),
}

// ============================================================================
// Tab Identity
// ============================================================================

/// Immutable identity of one open log tab
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TabId {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl TabId {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

// ============================================================================
// Search Types
// ============================================================================

/// Match semantics for a search run.
///
/// In literal mode `case_sensitive` and `whole_word` both apply. When
/// `regex_enabled` is set the term text governs matching: the case flag is
/// still honored (folded into the pattern), while `whole_word` is ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    pub whole_word: bool,
    pub regex_enabled: bool,
}

/// One match inside the searched line sequence.
///
/// Offsets are half-open byte offsets into the owning line. `selected` is a
/// transient highlighting flag; it carries no meaning for match identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    pub line_number: usize,
    pub start: usize,
    pub end: usize,
    pub selected: bool,
}

impl Match {
    pub fn new(line_number: usize, start: usize, end: usize) -> Self {
        Self {
            line_number,
            start,
            end,
            selected: false,
        }
    }
}

/// Result of one search run.
///
/// Only valid against the line sequence it was computed from; any append to
/// the underlying buffer requires a full recompute.
#[derive(Clone, Debug, Default)]
pub struct SearchResult {
    pub term: String,
    pub options: SearchOptions,
    pub matches: Vec<Match>,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Mark exactly one match as selected for highlighting.
    ///
    /// Out-of-range indices clear the selection entirely.
    pub fn select(&mut self, index: usize) {
        for (i, m) in self.matches.iter_mut().enumerate() {
            m.selected = i == index;
        }
    }
}
