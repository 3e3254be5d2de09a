use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use podtail_k8s::{KubeClient, spawn_watchers};
use podtail_session::{Intent, LogSource, ResourceCache, SessionManager, TabId, UiEvent};

/// Podtail - live-tail and search Kubernetes container logs
///
/// Headless driver: mirrors the cluster hierarchy and optionally tails one
/// container to stdout. Interactive front-ends plug into the same engine
/// through the session manager's intent/event channels.
#[derive(Parser, Debug)]
#[command(name = "podtail")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Kubernetes context name (defaults to the kubeconfig's current context)
    #[arg(value_name = "CONTEXT")]
    context: Option<String>,

    /// Container to tail, as namespace/pod/container
    #[arg(long, value_name = "NS/POD/CONTAINER")]
    tail: Option<String>,

    /// Number of historical log lines to fetch
    #[arg(long, default_value = "150")]
    tail_lines: i64,

    /// Print one hierarchy snapshot as JSON and exit
    #[arg(long)]
    dump_hierarchy: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing for debugging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run_app(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run_app(args: Args) -> Result<()> {
    let client = Arc::new(KubeClient::new()?);

    let contexts = client.cluster_names();
    if contexts.is_empty() {
        bail!("No clusters available in kubeconfig");
    }

    let context = args
        .context
        .clone()
        .or_else(|| client.current_context())
        .context("No context selected and kubeconfig has no current context")?;
    if !contexts.iter().any(|c| c == &context) {
        bail!("Context '{}' not found in kubeconfig", context);
    }
    client.connect(&context).await?;

    // Watch feed -> resource cache
    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(256);
    let watchers = spawn_watchers(client.active_client()?, event_tx, cancel.clone());

    let cache = ResourceCache::new();
    let cache_task = {
        let cache = cache.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { cache.run(event_rx, cancel).await })
    };

    // First snapshot is the post-sync catch-up
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(16);
    cache.register_observer(snapshot_tx).await;

    if args.dump_hierarchy {
        let snapshot = snapshot_rx
            .recv()
            .await
            .context("Watch feed closed before initial sync")?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        cancel.cancel();
        for task in watchers {
            task.abort();
        }
        cache_task.abort();
        return Ok(());
    }

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let mut session =
        SessionManager::new(client.clone(), ui_tx).with_tail_lines(args.tail_lines);

    let tail_target = args.tail.as_deref().map(parse_tab_id).transpose()?;
    let mut printed = 0usize;

    if let Some(id) = &tail_target {
        session.handle_intent(Intent::OpenContainer(id.clone())).await;
        printed = print_new_lines(&session, id, 0);
    }

    loop {
        tokio::select! {
            snapshot = snapshot_rx.recv() => match snapshot {
                Some(snapshot) => {
                    debug!(
                        namespaces = snapshot.namespaces.len(),
                        pods = snapshot.pods.len(),
                        "hierarchy updated"
                    );
                }
                None => break,
            },

            event = ui_rx.recv() => match event {
                Some(UiEvent::LogsAppended(id)) => {
                    session.refresh_search(&id);
                    if tail_target.as_ref() == Some(&id) {
                        printed = print_new_lines(&session, &id, printed);
                    }
                }
                Some(UiEvent::StreamEnded(id)) => {
                    session.on_stream_ended(&id);
                    if tail_target.as_ref() == Some(&id) {
                        break;
                    }
                }
                Some(UiEvent::Status(message)) => info!("{message}"),
                Some(event) => debug!(?event, "ui event"),
                None => break,
            },

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Cleanup; stop and cancel are both safe to hit more than once
    session.stop();
    cancel.cancel();
    for task in watchers {
        task.abort();
    }
    cache_task.abort();

    Ok(())
}

/// Parse "namespace/pod/container" into a tab identity
fn parse_tab_id(raw: &str) -> Result<TabId> {
    let parts: Vec<&str> = raw.split('/').collect();
    match parts.as_slice() {
        [namespace, pod, container]
            if !namespace.is_empty() && !pod.is_empty() && !container.is_empty() =>
        {
            Ok(TabId::new(*namespace, *pod, *container))
        }
        _ => bail!("Expected NS/POD/CONTAINER, got '{}'", raw),
    }
}

/// Print buffer lines not yet printed, returning the new lifetime count.
///
/// `printed` counts lines over the buffer's lifetime rather than its bounded
/// length, so FIFO eviction at capacity does not stall the printer.
fn print_new_lines<C: LogSource>(
    session: &SessionManager<C>,
    id: &TabId,
    printed: usize,
) -> usize {
    let Some(tab) = session.tab(id) else {
        return printed;
    };
    let (lines, appended) = tab.buffer.snapshot_with_appended();
    for line in lines.iter().skip(unprinted_start(printed, appended, lines.len())) {
        println!("{line}");
    }
    appended
}

/// Index into the snapshot where unprinted lines begin. Lines evicted before
/// they were printed are gone and skipped.
fn unprinted_start(printed: usize, appended: usize, len: usize) -> usize {
    let evicted = appended - len;
    printed.saturating_sub(evicted)
}
