use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use podtail_types::TabId;

/// Buffering for the follow channel; the listener drains continuously, the
/// buffer only absorbs bursts.
const FOLLOW_CHANNEL_CAPACITY: usize = 100;

/// Kubernetes client wrapper.
///
/// Holds the kubeconfig for context enumeration and one active
/// `kube::Client` for the currently selected context.
pub struct KubeClient {
    kubeconfig: Kubeconfig,
    current: RwLock<Option<String>>,
    active: RwLock<Option<kube::Client>>,
}

impl KubeClient {
    /// Load the kubeconfig; no connection is made until [`connect`]
    pub fn new() -> Result<Self> {
        let kubeconfig =
            Kubeconfig::read().context("Failed to read kubeconfig. Is kubectl configured?")?;
        let current = kubeconfig.current_context.clone();

        Ok(Self {
            kubeconfig,
            current: RwLock::new(current),
            active: RwLock::new(None),
        })
    }

    /// All context names known to the kubeconfig
    pub fn cluster_names(&self) -> Vec<String> {
        self.kubeconfig
            .contexts
            .iter()
            .map(|ctx| ctx.name.clone())
            .collect()
    }

    /// The currently selected context name
    pub fn current_context(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// Build and store a client for the given context.
    ///
    /// On failure the previously active client (if any) stays in place.
    pub async fn connect(&self, context_name: &str) -> Result<()> {
        let config = kube::Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(context_name.to_string()),
                ..Default::default()
            },
        )
        .await
        .context(format!(
            "Failed to create config for context: {context_name}"
        ))?;

        let client = kube::Client::try_from(config).context(format!(
            "Failed to create client for context: {context_name}"
        ))?;

        *self.active.write() = Some(client);
        *self.current.write() = Some(context_name.to_string());
        debug!(context = context_name, "connected");
        Ok(())
    }

    /// The active client for API calls; [`connect`] must have succeeded once
    pub fn active_client(&self) -> Result<kube::Client> {
        self.active
            .read()
            .clone()
            .context("Not connected to any cluster")
    }

    /// Fetch historical log text plus a live follow channel for a container.
    ///
    /// History is one bounded `logs()` call; the follow stream starts at the
    /// current timestamp so lines that antedate the tail are not replayed
    /// into the channel. The forwarding task ends when the server closes the
    /// stream or the receiver is dropped.
    pub async fn fetch_logs(
        &self,
        id: &TabId,
        tail_lines: Option<i64>,
    ) -> Result<(String, mpsc::Receiver<String>)> {
        let client = self.active_client()?;
        let pods: Api<Pod> = Api::namespaced(client, &id.namespace);

        let history_params = LogParams {
            container: Some(id.container.clone()),
            tail_lines,
            ..Default::default()
        };
        let history = pods
            .logs(&id.pod, &history_params)
            .await
            .context(format!("Failed to fetch logs for {id}"))?;

        let params = follow_params(id, Utc::now());
        let stream = pods
            .log_stream(&id.pod, &params)
            .await
            .context(format!("Failed to open log stream for {id}"))?;

        let (tx, rx) = mpsc::channel(FOLLOW_CHANNEL_CAPACITY);
        let id = id.clone();
        tokio::spawn(async move {
            let mut lines = stream.lines();
            loop {
                match lines.try_next().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            // Receiver dropped, stream was replaced or closed
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(tab = %id, error = %e, "log stream error");
                        break;
                    }
                }
            }
        });

        Ok((history, rx))
    }
}

/// Parameters for the follow stream: it starts at the given instant so
/// lines already covered by the history fetch are not replayed.
fn follow_params(id: &TabId, since: DateTime<Utc>) -> LogParams {
    LogParams {
        container: Some(id.container.clone()),
        follow: true,
        since_time: Some(since),
        ..Default::default()
    }
}
