use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::Api;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use podtail_types::{NamespaceInfo, PodInfo, ResourceEvent, ResourceKind, WatchEvent};

/// Start the namespace and pod watch tasks feeding the resource cache.
///
/// Each task translates the kube watcher protocol into [`WatchEvent`]s and
/// emits one `Synced` marker when its initial list completes. Watch errors
/// are logged and left to the watcher's own backoff; an error during initial
/// sync still releases the sync gate so consumers proceed with partial
/// state.
pub fn spawn_watchers(
    client: kube::Client,
    tx: mpsc::Sender<WatchEvent>,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client);

    vec![
        tokio::spawn(watch_namespaces(namespaces, tx.clone(), cancel.clone())),
        tokio::spawn(watch_pods(pods, tx, cancel)),
    ]
}

async fn watch_namespaces(
    api: Api<Namespace>,
    tx: mpsc::Sender<WatchEvent>,
    cancel: CancellationToken,
) {
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    let mut synced = false;
    let mut init: Option<Vec<NamespaceInfo>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            event = stream.next() => match event {
                Some(Ok(event)) => {
                    let done = matches!(event, Event::InitDone);
                    if let Some(out) =
                        translate(event, &mut init, namespace_info, WatchEvent::Namespace)
                        && tx.send(out).await.is_err()
                    {
                        break;
                    }
                    if done
                        && mark_synced(&mut synced, ResourceKind::Namespace, &tx).await.is_err()
                    {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "namespace watch error");
                    // Proceed with whatever state was synchronized; the
                    // watcher's backoff handles the retry.
                    if mark_synced(&mut synced, ResourceKind::Namespace, &tx).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

async fn watch_pods(api: Api<Pod>, tx: mpsc::Sender<WatchEvent>, cancel: CancellationToken) {
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    let mut synced = false;
    let mut init: Option<Vec<PodInfo>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            event = stream.next() => match event {
                Some(Ok(event)) => {
                    let done = matches!(event, Event::InitDone);
                    if let Some(out) = translate(event, &mut init, pod_info, WatchEvent::Pod)
                        && tx.send(out).await.is_err()
                    {
                        break;
                    }
                    if done && mark_synced(&mut synced, ResourceKind::Pod, &tx).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "pod watch error");
                    if mark_synced(&mut synced, ResourceKind::Pod, &tx).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

/// Translate one kube watcher event into the cache's event vocabulary.
///
/// A (re-)list is buffered between `Init` and `InitDone` and emitted as a
/// single `Restarted` replacement, so entries deleted while the watch was
/// down are reconciled away instead of lingering until process restart.
fn translate<K, T>(
    event: Event<K>,
    init: &mut Option<Vec<T>>,
    convert: impl Fn(&K) -> T,
    wrap: impl Fn(ResourceEvent<T>) -> WatchEvent,
) -> Option<WatchEvent> {
    match event {
        Event::Init => {
            *init = Some(Vec::new());
            None
        }
        Event::InitApply(obj) => {
            let info = convert(&obj);
            match init.as_mut() {
                Some(buf) => {
                    buf.push(info);
                    None
                }
                // An init apply outside a list window; treat as an upsert
                None => Some(wrap(ResourceEvent::Updated(info))),
            }
        }
        Event::InitDone => init
            .take()
            .map(|list| wrap(ResourceEvent::Restarted(list))),
        Event::Apply(obj) => Some(wrap(ResourceEvent::Updated(convert(&obj)))),
        Event::Delete(obj) => Some(wrap(ResourceEvent::Deleted(convert(&obj)))),
    }
}

/// Emit the one-shot sync marker for a kind
async fn mark_synced(
    synced: &mut bool,
    kind: ResourceKind,
    tx: &mpsc::Sender<WatchEvent>,
) -> Result<(), mpsc::error::SendError<WatchEvent>> {
    if *synced {
        return Ok(());
    }
    *synced = true;
    tx.send(WatchEvent::Synced(kind)).await
}

/// A watch payload without object identity is a client bug, not a runtime
/// error; these conversions are fatal on that invariant.
fn namespace_info(ns: &Namespace) -> NamespaceInfo {
    let name = ns
        .metadata
        .name
        .clone()
        .expect("namespace watch event without a name");
    NamespaceInfo::new(name)
}

fn pod_info(pod: &Pod) -> PodInfo {
    let name = pod
        .metadata
        .name
        .clone()
        .expect("pod watch event without a name");
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .expect("pod watch event without a namespace");

    let mut info = PodInfo::new(name, namespace);
    if let Some(spec) = &pod.spec {
        info.containers = spec.containers.iter().map(|c| c.name.clone()).collect();
    }
    info
}
