use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use podtail_types::{
    NamespaceInfo, PodInfo, ResourceEvent, ResourceKind, ResourceSnapshot, WatchEvent,
};

/// Live mirror of cluster namespaces and pods, fed by a watch event stream.
///
/// Every mutation and the broadcast it triggers happen under one lock, so an
/// observer sees snapshots in mutation order and each snapshot reflects the
/// maps at exactly one point in time. Cloning shares the underlying state.
#[derive(Clone)]
pub struct ResourceCache {
    state: Arc<Mutex<CacheState>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

struct CacheState {
    namespaces: HashMap<String, NamespaceInfo>,
    pods: HashMap<String, PodInfo>,
    observers: Vec<mpsc::Sender<ResourceSnapshot>>,
    namespaces_synced: bool,
    pods_synced: bool,
}

impl CacheState {
    fn new() -> Self {
        Self {
            namespaces: HashMap::new(),
            pods: HashMap::new(),
            observers: Vec::new(),
            namespaces_synced: false,
            pods_synced: false,
        }
    }

    /// Materialize both maps together, sorted by key for stable output
    fn snapshot(&self) -> ResourceSnapshot {
        let mut namespaces: Vec<NamespaceInfo> = self.namespaces.values().cloned().collect();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));

        let mut pods: Vec<PodInfo> = self.pods.values().cloned().collect();
        pods.sort_by_key(|p| p.key());

        ResourceSnapshot { namespaces, pods }
    }

    /// Apply one resource event. Update is an idempotent replace.
    fn mutate(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Namespace(ResourceEvent::Added(ns))
            | WatchEvent::Namespace(ResourceEvent::Updated(ns)) => {
                self.namespaces.insert(ns.name.clone(), ns);
            }
            WatchEvent::Namespace(ResourceEvent::Deleted(ns)) => {
                self.namespaces.remove(&ns.name);
            }
            WatchEvent::Namespace(ResourceEvent::Restarted(list)) => {
                self.namespaces = list.into_iter().map(|ns| (ns.name.clone(), ns)).collect();
            }
            WatchEvent::Pod(ResourceEvent::Added(pod))
            | WatchEvent::Pod(ResourceEvent::Updated(pod)) => {
                self.pods.insert(pod.key(), pod);
            }
            WatchEvent::Pod(ResourceEvent::Deleted(pod)) => {
                self.pods.remove(&pod.key());
            }
            WatchEvent::Pod(ResourceEvent::Restarted(list)) => {
                self.pods = list.into_iter().map(|pod| (pod.key(), pod)).collect();
            }
            WatchEvent::Synced(_) => unreachable!("handled in apply"),
        }
    }

    /// Send the current snapshot to every observer, dropping dead channels.
    ///
    /// Sends block per observer; channels are expected to carry a small
    /// buffer (capacity >= 1) so a mid-read observer cannot deadlock us.
    async fn broadcast(&mut self) {
        let snapshot = self.snapshot();
        let mut alive = Vec::with_capacity(self.observers.len());
        for tx in self.observers.drain(..) {
            if tx.send(snapshot.clone()).await.is_ok() {
                alive.push(tx);
            }
        }
        self.observers = alive;
    }
}

impl ResourceCache {
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(CacheState::new())),
            ready_tx,
            ready_rx,
        }
    }

    /// Drain the watch feed until it closes or `cancel` fires
    pub async fn run(&self, mut events: mpsc::Receiver<WatchEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                event = events.recv() => match event {
                    Some(event) => self.apply(event).await,
                    None => break,
                }
            }
        }
        debug!("resource cache stopped");
    }

    /// Apply one watch event: mutate the maps, then broadcast under the same
    /// lock so no observer can see the two out of order.
    pub async fn apply(&self, event: WatchEvent) {
        if let WatchEvent::Synced(kind) = event {
            self.mark_synced(kind).await;
            return;
        }

        let mut state = self.state.lock().await;
        state.mutate(event);
        state.broadcast().await;
    }

    /// Register an observer channel.
    ///
    /// Suspends until the initial sync has completed, then delivers one
    /// catch-up snapshot and adds the channel to the broadcast list inside a
    /// single lock scope. An observer therefore never misses an event that
    /// arrives between its catch-up and its registration.
    pub async fn register_observer(&self, tx: mpsc::Sender<ResourceSnapshot>) {
        let mut ready = self.ready_rx.clone();
        // The sender half lives in self, so this can only fail if the cache
        // itself is gone.
        let _ = ready.wait_for(|synced| *synced).await;

        let mut state = self.state.lock().await;
        let snapshot = state.snapshot();
        if tx.send(snapshot).await.is_ok() {
            state.observers.push(tx);
        }
    }

    /// Current snapshot without registering
    pub async fn snapshot(&self) -> ResourceSnapshot {
        self.state.lock().await.snapshot()
    }

    async fn mark_synced(&self, kind: ResourceKind) {
        let mut state = self.state.lock().await;
        match kind {
            ResourceKind::Namespace => state.namespaces_synced = true,
            ResourceKind::Pod => state.pods_synced = true,
        }
        if state.namespaces_synced && state.pods_synced {
            debug!("initial sync complete");
            // Closes the gate exactly once; later sends are no-ops for
            // waiters already released.
            let _ = self.ready_tx.send(true);
        }
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}
