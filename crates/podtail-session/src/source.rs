use anyhow::Result;
use tokio::sync::mpsc;

use podtail_k8s::KubeClient;
use podtail_types::TabId;

/// Historical text plus the live append channel for one container
pub struct LogFetch {
    pub history: String,
    pub follow: mpsc::Receiver<String>,
}

/// The cluster-client seam consumed by the session manager.
///
/// Covers the three capabilities the engine needs: cluster/context
/// enumeration, context switching, and log fetch with a live follow
/// channel. Tests substitute a mock.
#[allow(async_fn_in_trait)]
pub trait LogSource: Send + Sync + 'static {
    fn cluster_names(&self) -> Vec<String>;

    fn current_context(&self) -> Option<String>;

    async fn switch_cluster(&self, name: &str) -> Result<()>;

    async fn fetch_logs(&self, id: &TabId, tail_lines: Option<i64>) -> Result<LogFetch>;
}

impl LogSource for KubeClient {
    fn cluster_names(&self) -> Vec<String> {
        KubeClient::cluster_names(self)
    }

    fn current_context(&self) -> Option<String> {
        KubeClient::current_context(self)
    }

    async fn switch_cluster(&self, name: &str) -> Result<()> {
        self.connect(name).await
    }

    async fn fetch_logs(&self, id: &TabId, tail_lines: Option<i64>) -> Result<LogFetch> {
        let (history, follow) = KubeClient::fetch_logs(self, id, tail_lines).await?;
        Ok(LogFetch { history, follow })
    }
}
