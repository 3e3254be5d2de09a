use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use podtail_logs::{LogBuffer, SearchError, search};
use podtail_types::{SearchOptions, SearchResult, TabId};

use crate::source::{LogFetch, LogSource};

/// Historical lines fetched when a tab loads its logs
pub const DEFAULT_TAIL_LINES: i64 = 150;

/// Lifecycle of a tab's log stream.
///
/// At most one tab is `Streaming` system-wide; starting a stream elsewhere
/// forces the previous holder to `Replaced`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming,
    /// Channel closed normally (pod terminated, stream finished)
    Closed,
    /// Explicitly stopped (tab closed, shutdown)
    Cancelled,
    /// Another tab took over the live stream
    Replaced,
}

/// The single active append stream, held as an owned resource so
/// cancel-then-replace is atomic and double-stop cannot panic.
pub struct LiveTail {
    pub tab: TabId,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl LiveTail {
    fn new(tab: TabId) -> Self {
        Self {
            tab,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// One open container session: identity, buffer, search state, stream state
pub struct Tab {
    pub id: TabId,
    pub buffer: LogBuffer,
    pub term: String,
    pub options: SearchOptions,
    pub search: Option<SearchResult>,
    pub current_match: usize,
    pub stream_state: StreamState,
}

impl Tab {
    fn new(id: TabId) -> Self {
        Self {
            id,
            buffer: LogBuffer::new(),
            term: String::new(),
            options: SearchOptions::default(),
            search: None,
            current_match: 0,
            stream_state: StreamState::Idle,
        }
    }
}

/// Which search option a toggle intent flips
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchToggle {
    CaseSensitive,
    WholeWord,
    Regex,
}

/// User intents accepted from the presentation boundary
#[derive(Clone, Debug)]
pub enum Intent {
    /// Open (or re-activate) a container tab and load its logs
    OpenContainer(TabId),
    CloseTab(TabId),
    SetSearchTerm(String),
    ToggleOption(SearchToggle),
    NavigateMatch(i32),
    SwitchCluster(String),
}

/// Events handed to the presentation boundary.
///
/// All renderable-state changes flow through this one channel so rendering
/// never races with background mutation.
#[derive(Clone, Debug)]
pub enum UiEvent {
    Status(String),
    TabOpened(TabId),
    TabClosed(TabId),
    TabsCleared,
    LogsAppended(TabId),
    StreamEnded(TabId),
    SearchUpdated(TabId),
    SearchCleared,
    ClusterSwitched(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active tab")]
    NoActiveTab,

    #[error("failed to fetch logs for {id}: {source}")]
    Fetch {
        id: TabId,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to switch cluster to '{name}': {source}")]
    ClusterSwitch {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("search error: {0}")]
    Search(#[from] SearchError),
}

/// Owns the set of open tabs and arbitrates the single live log stream.
pub struct SessionManager<C: LogSource> {
    client: Arc<C>,
    tabs: Vec<Tab>,
    active: Option<usize>,
    live: Option<LiveTail>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    tail_lines: i64,
}

impl<C: LogSource> SessionManager<C> {
    pub fn new(client: Arc<C>, ui_tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self {
            client,
            tabs: Vec::new(),
            active: None,
            live: None,
            ui_tx,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    pub fn with_tail_lines(mut self, tail_lines: i64) -> Self {
        self.tail_lines = tail_lines;
        self
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn tab(&self, id: &TabId) -> Option<&Tab> {
        self.tabs.iter().find(|t| &t.id == id)
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.active.and_then(|i| self.tabs.get(i))
    }

    /// Identity of the current live stream holder, if any
    pub fn live_tab(&self) -> Option<&TabId> {
        self.live.as_ref().map(|l| &l.tab)
    }

    pub fn live_started_at(&self) -> Option<DateTime<Utc>> {
        self.live.as_ref().map(|l| l.started_at)
    }

    /// Dispatch one presentation intent. Every recoverable error terminates
    /// here as a status message; prior state is retained.
    pub async fn handle_intent(&mut self, intent: Intent) {
        let outcome = match intent {
            Intent::OpenContainer(id) => {
                // Re-activating an existing tab keeps its buffer and search
                // view; only a newly created tab loads logs.
                if self.tab(&id).is_some() {
                    self.open_container(id);
                    Ok(())
                } else {
                    self.open_container(id.clone());
                    self.load_logs(&id).await
                }
            }
            Intent::CloseTab(id) => {
                self.close_tab(&id);
                Ok(())
            }
            Intent::SetSearchTerm(term) => self.set_search_term(&term),
            Intent::ToggleOption(which) => self.toggle_option(which),
            Intent::NavigateMatch(delta) => {
                self.navigate_match(delta as isize);
                Ok(())
            }
            Intent::SwitchCluster(name) => self.switch_cluster(&name).await,
        };

        if let Err(e) = outcome {
            warn!(error = %e, "intent failed");
            self.status(e.to_string());
        }
    }

    /// Create a tab for the container, or re-activate an existing one
    /// without re-fetching. Returns the tab index.
    pub fn open_container(&mut self, id: TabId) -> usize {
        if let Some(idx) = self.tab_index(&id) {
            self.active = Some(idx);
            return idx;
        }

        self.tabs.push(Tab::new(id.clone()));
        let idx = self.tabs.len() - 1;
        self.active = Some(idx);
        self.send(UiEvent::TabOpened(id));
        idx
    }

    /// Load logs for a tab: take over the live stream, fetch history plus a
    /// follow channel, repopulate the buffer, and start the listener.
    ///
    /// On fetch failure the tab is left untouched (still open, buffer and
    /// search state unchanged).
    pub async fn load_logs(&mut self, id: &TabId) -> Result<(), SessionError> {
        let idx = match self.tab_index(id) {
            Some(idx) => idx,
            None => self.open_container(id.clone()),
        };
        self.active = Some(idx);

        // Only one append stream may be active across all tabs.
        self.replace_live();

        let LogFetch { history, follow } = self
            .client
            .fetch_logs(id, Some(self.tail_lines))
            .await
            .map_err(|source| SessionError::Fetch {
                id: id.clone(),
                source,
            })?;

        let tab = &mut self.tabs[idx];
        tab.buffer.clear();
        tab.search = None;
        tab.current_match = 0;
        for line in history.lines().filter(|l| !l.is_empty()) {
            tab.buffer.append(line);
        }
        tab.stream_state = StreamState::Streaming;
        let buffer = tab.buffer.clone();

        let live = LiveTail::new(id.clone());
        debug!(tab = %id, started_at = %live.started_at, "live stream started");
        self.spawn_listener(id.clone(), buffer, follow, live.token());
        self.live = Some(live);

        self.send(UiEvent::LogsAppended(id.clone()));
        // History replaced the buffer contents, so any active search term is
        // recomputed from scratch.
        self.refresh_search(id);
        Ok(())
    }

    /// Close a tab, cancelling its stream only if it is the active one.
    pub fn close_tab(&mut self, id: &TabId) {
        let Some(idx) = self.tab_index(id) else {
            return;
        };

        if self.live.as_ref().is_some_and(|l| &l.tab == id) {
            // take() makes the cancel single-shot; closing another tab later
            // must not reach into this already-stopped stream.
            if let Some(live) = self.live.take() {
                live.cancel();
            }
            self.tabs[idx].stream_state = StreamState::Cancelled;
        }

        self.tabs.remove(idx);
        self.send(UiEvent::TabClosed(id.clone()));

        if self.tabs.is_empty() {
            self.active = None;
            self.send(UiEvent::SearchCleared);
        } else if let Some(active) = self.active {
            // Activate the adjacent tab, index clamped
            let shifted = if active > idx { active - 1 } else { active };
            self.active = Some(shifted.min(self.tabs.len() - 1));
        }
    }

    /// Run (or clear) the search for the active tab.
    ///
    /// An empty term clears search state. On a pattern error the previous
    /// result is left untouched so the user can correct the term.
    pub fn set_search_term(&mut self, term: &str) -> Result<(), SessionError> {
        let idx = self.active.ok_or(SessionError::NoActiveTab)?;
        let tab = &mut self.tabs[idx];
        tab.term = term.to_string();

        if term.is_empty() {
            tab.search = None;
            tab.current_match = 0;
            self.send(UiEvent::SearchCleared);
            return Ok(());
        }

        let lines = tab.buffer.snapshot();
        let mut result = search(&lines, term, tab.options)?;
        result.select(0);
        tab.search = Some(result);
        tab.current_match = 0;

        let id = tab.id.clone();
        self.send(UiEvent::SearchUpdated(id));
        Ok(())
    }

    /// Flip one match-semantics flag and re-run any active search
    pub fn toggle_option(&mut self, which: SearchToggle) -> Result<(), SessionError> {
        let idx = self.active.ok_or(SessionError::NoActiveTab)?;
        let options = &mut self.tabs[idx].options;
        match which {
            SearchToggle::CaseSensitive => options.case_sensitive = !options.case_sensitive,
            SearchToggle::WholeWord => options.whole_word = !options.whole_word,
            SearchToggle::Regex => options.regex_enabled = !options.regex_enabled,
        }

        let term = self.tabs[idx].term.clone();
        if term.is_empty() {
            return Ok(());
        }
        self.set_search_term(&term)
    }

    /// Move the selected match forward or backward, wrapping at either end.
    /// A no-op with zero matches or no search.
    pub fn navigate_match(&mut self, delta: isize) {
        let Some(idx) = self.active else { return };
        let tab = &mut self.tabs[idx];
        let Some(result) = tab.search.as_mut() else {
            return;
        };
        let count = result.len();
        if count == 0 {
            return;
        }

        let current = tab.current_match as isize;
        tab.current_match = (current + delta).rem_euclid(count as isize) as usize;
        result.select(tab.current_match);

        let id = tab.id.clone();
        self.send(UiEvent::SearchUpdated(id));
    }

    /// Full recompute after the buffer gained lines; no delta matching.
    ///
    /// The selection resets to the first match. A recompute failure (only
    /// possible in regex mode) keeps the prior result.
    pub fn refresh_search(&mut self, id: &TabId) {
        let Some(idx) = self.tab_index(id) else {
            return;
        };
        let tab = &mut self.tabs[idx];
        if tab.term.is_empty() {
            return;
        }

        let lines = tab.buffer.snapshot();
        match search(&lines, &tab.term, tab.options) {
            Ok(mut result) => {
                result.select(0);
                tab.search = Some(result);
                tab.current_match = 0;
                self.send(UiEvent::SearchUpdated(id.clone()));
            }
            Err(e) => warn!(tab = %id, error = %e, "search recompute failed"),
        }
    }

    /// Switch cluster context. Pod and container identities are
    /// cluster-scoped, so all tabs close; the wiring layer reloads the
    /// hierarchy when it sees the event.
    pub async fn switch_cluster(&mut self, name: &str) -> Result<(), SessionError> {
        self.client
            .switch_cluster(name)
            .await
            .map_err(|source| SessionError::ClusterSwitch {
                name: name.to_string(),
                source,
            })?;

        if let Some(live) = self.live.take() {
            live.cancel();
        }
        self.tabs.clear();
        self.active = None;
        self.send(UiEvent::TabsCleared);
        self.send(UiEvent::SearchCleared);
        self.send(UiEvent::ClusterSwitched(name.to_string()));
        Ok(())
    }

    /// Called from the UI loop when a listener reports its channel closed
    pub fn on_stream_ended(&mut self, id: &TabId) {
        if self.live.as_ref().is_some_and(|l| &l.tab == id) {
            self.live = None;
        }
        if let Some(idx) = self.tab_index(id)
            && self.tabs[idx].stream_state == StreamState::Streaming
        {
            self.tabs[idx].stream_state = StreamState::Closed;
        }
        self.status(format!("log stream for {id} ended"));
    }

    /// Stop the live stream. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(live) = self.live.take() {
            live.cancel();
            if let Some(idx) = self.tab_index(&live.tab) {
                self.tabs[idx].stream_state = StreamState::Cancelled;
            }
        }
    }

    fn tab_index(&self, id: &TabId) -> Option<usize> {
        self.tabs.iter().position(|t| &t.id == id)
    }

    /// Cancel the current live stream (if any) and mark its tab replaced
    fn replace_live(&mut self) {
        if let Some(live) = self.live.take() {
            live.cancel();
            if let Some(idx) = self.tab_index(&live.tab) {
                self.tabs[idx].stream_state = StreamState::Replaced;
            }
            debug!(tab = %live.tab, "live stream replaced");
        }
    }

    /// Drain the follow channel into the tab's buffer until it closes or
    /// the stream is cancelled. No buffer writes happen after cancellation.
    fn spawn_listener(
        &self,
        id: TabId,
        buffer: LogBuffer,
        mut follow: mpsc::Receiver<String>,
        cancel: CancellationToken,
    ) {
        let ui_tx = self.ui_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Cancellation wins over a ready line: no buffer writes
                    // after the stream was stopped.
                    biased;

                    _ = cancel.cancelled() => return,

                    line = follow.recv() => match line {
                        Some(line) => {
                            buffer.append(line);
                            let _ = ui_tx.send(UiEvent::LogsAppended(id.clone()));
                        }
                        None => {
                            let _ = ui_tx.send(UiEvent::StreamEnded(id.clone()));
                            return;
                        }
                    }
                }
            }
        });
    }

    fn status(&self, message: impl Into<String>) {
        self.send(UiEvent::Status(message.into()));
    }

    fn send(&self, event: UiEvent) {
        // The receiver is the UI loop; losing it means shutdown is underway.
        let _ = self.ui_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use parking_lot::Mutex;

    /// Mock cluster client: canned history, live channels kept open so
    /// tests can feed append lines.
    struct FakeSource {
        history: String,
        feeds: Mutex<Vec<(TabId, mpsc::Sender<String>)>>,
        fail_fetch: bool,
        fail_switch: bool,
    }

    impl FakeSource {
        fn new(history: &str) -> Self {
            Self {
                history: history.to_string(),
                feeds: Mutex::new(Vec::new()),
                fail_fetch: false,
                fail_switch: false,
            }
        }

        fn feed_for(&self, id: &TabId) -> mpsc::Sender<String> {
            self.feeds
                .lock()
                .iter()
                .rev()
                .find(|(tab, _)| tab == id)
                .map(|(_, tx)| tx.clone())
                .expect("no feed for tab")
        }
    }

    impl LogSource for FakeSource {
        fn cluster_names(&self) -> Vec<String> {
            vec!["test".into()]
        }

        fn current_context(&self) -> Option<String> {
            Some("test".into())
        }

        async fn switch_cluster(&self, _name: &str) -> Result<()> {
            if self.fail_switch {
                anyhow::bail!("no such context");
            }
            Ok(())
        }

        async fn fetch_logs(&self, id: &TabId, _tail_lines: Option<i64>) -> Result<LogFetch> {
            if self.fail_fetch {
                anyhow::bail!("connection refused");
            }
            let (tx, rx) = mpsc::channel(8);
            self.feeds.lock().push((id.clone(), tx));
            Ok(LogFetch {
                history: self.history.clone(),
                follow: rx,
            })
        }
    }

    fn tab_a() -> TabId {
        TabId::new("prod", "web-1", "nginx")
    }

    fn tab_b() -> TabId {
        TabId::new("prod", "web-2", "nginx")
    }

    fn manager(
        source: FakeSource,
    ) -> (
        SessionManager<FakeSource>,
        Arc<FakeSource>,
        mpsc::UnboundedReceiver<UiEvent>,
    ) {
        let source = Arc::new(source);
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        (
            SessionManager::new(source.clone(), ui_tx),
            source,
            ui_rx,
        )
    }

    #[tokio::test]
    async fn open_creates_then_reactivates_without_refetch() {
        let (mut mgr, source, _ui) = manager(FakeSource::new(""));

        let first = mgr.open_container(tab_a());
        let second = mgr.open_container(tab_b());
        assert_eq!(mgr.tabs().len(), 2);

        // Re-opening an existing tab re-activates it and does not fetch
        let again = mgr.open_container(tab_a());
        assert_eq!(again, first);
        assert_ne!(again, second);
        assert_eq!(mgr.tabs().len(), 2);
        assert!(source.feeds.lock().is_empty());
        assert_eq!(mgr.active_tab().unwrap().id, tab_a());
    }

    #[tokio::test]
    async fn open_intent_reactivates_without_refetch() {
        let (mut mgr, source, _ui) = manager(FakeSource::new("one\ntwo"));

        mgr.handle_intent(Intent::OpenContainer(tab_a())).await;
        mgr.handle_intent(Intent::OpenContainer(tab_b())).await;
        mgr.handle_intent(Intent::OpenContainer(tab_a())).await;

        // One fetch per tab; re-activation reuses the loaded buffer
        assert_eq!(source.feeds.lock().len(), 2);
        assert_eq!(mgr.tabs().len(), 2);
        assert_eq!(mgr.active_tab().unwrap().id, tab_a());
        assert_eq!(mgr.tab(&tab_a()).unwrap().buffer.len(), 2);
    }

    #[tokio::test]
    async fn load_logs_populates_history_skipping_empty_lines() {
        let (mut mgr, _source, _ui) =
            manager(FakeSource::new("one\ntwo\n\nthree\n\n"));

        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();

        let tab = mgr.tab(&tab_a()).unwrap();
        assert_eq!(tab.buffer.snapshot(), vec!["one", "two", "three"]);
        assert_eq!(tab.stream_state, StreamState::Streaming);
        assert_eq!(mgr.live_tab(), Some(&tab_a()));
        assert!(mgr.live_started_at().is_some());
    }

    #[tokio::test]
    async fn fetch_failure_leaves_tab_untouched() {
        let mut source = FakeSource::new("");
        source.fail_fetch = true;
        let (mut mgr, _source, _ui) = manager(source);

        mgr.open_container(tab_a());
        let err = mgr.load_logs(&tab_a()).await.unwrap_err();
        assert!(matches!(err, SessionError::Fetch { .. }));

        let tab = mgr.tab(&tab_a()).unwrap();
        assert!(tab.buffer.is_empty());
        assert_ne!(tab.stream_state, StreamState::Streaming);
        assert!(mgr.live_tab().is_none());
    }

    #[tokio::test]
    async fn starting_second_stream_replaces_first() {
        let (mut mgr, _source, _ui) = manager(FakeSource::new("x"));

        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();
        mgr.open_container(tab_b());
        mgr.load_logs(&tab_b()).await.unwrap();

        assert_eq!(mgr.tab(&tab_a()).unwrap().stream_state, StreamState::Replaced);
        assert_eq!(mgr.tab(&tab_b()).unwrap().stream_state, StreamState::Streaming);
        assert_eq!(mgr.live_tab(), Some(&tab_b()));
    }

    #[tokio::test]
    async fn closing_active_streamer_does_not_touch_replaced_tab() {
        let (mut mgr, _source, _ui) = manager(FakeSource::new("x"));

        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();
        mgr.open_container(tab_b());
        mgr.load_logs(&tab_b()).await.unwrap();

        // B holds the stream; closing it must not reach into A's
        // already-stopped stream.
        mgr.close_tab(&tab_b());
        assert!(mgr.live_tab().is_none());
        assert_eq!(mgr.tabs().len(), 1);
        assert_eq!(mgr.tab(&tab_a()).unwrap().stream_state, StreamState::Replaced);

        // Double-stop must not panic
        mgr.stop();
        mgr.stop();
    }

    #[tokio::test]
    async fn closing_last_tab_clears_search_ui() {
        let (mut mgr, _source, mut ui) = manager(FakeSource::new(""));
        mgr.open_container(tab_a());
        mgr.close_tab(&tab_a());
        assert!(mgr.tabs().is_empty());
        assert!(mgr.active_tab().is_none());

        let mut saw_clear = false;
        while let Ok(event) = ui.try_recv() {
            if matches!(event, UiEvent::SearchCleared) {
                saw_clear = true;
            }
        }
        assert!(saw_clear);
    }

    #[tokio::test]
    async fn closing_tab_activates_adjacent_clamped() {
        let (mut mgr, _source, _ui) = manager(FakeSource::new(""));
        mgr.open_container(tab_a());
        mgr.open_container(tab_b());
        // B is active at index 1; closing it clamps the active index to A
        mgr.close_tab(&tab_b());
        assert_eq!(mgr.active_tab().unwrap().id, tab_a());
    }

    #[tokio::test]
    async fn search_finds_matches_and_navigation_wraps() {
        let (mut mgr, _source, _ui) = manager(FakeSource::new(
            "error: disk full\ninfo: ok\nerror: disk ok\nerror again",
        ));
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();

        mgr.set_search_term("error").unwrap();
        let tab = mgr.active_tab().unwrap();
        let result = tab.search.as_ref().unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.matches[0].selected);

        // +1 twice lands on the last match, one more wraps to 0
        mgr.navigate_match(1);
        mgr.navigate_match(1);
        assert_eq!(mgr.active_tab().unwrap().current_match, 2);
        mgr.navigate_match(1);
        assert_eq!(mgr.active_tab().unwrap().current_match, 0);

        // Backward from 0 wraps to the last match
        mgr.navigate_match(-1);
        let tab = mgr.active_tab().unwrap();
        assert_eq!(tab.current_match, 2);
        assert!(tab.search.as_ref().unwrap().matches[2].selected);
    }

    #[tokio::test]
    async fn navigation_without_matches_is_a_noop() {
        let (mut mgr, _source, _ui) = manager(FakeSource::new("all quiet"));
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();
        mgr.set_search_term("error").unwrap();

        mgr.navigate_match(1);
        mgr.navigate_match(-1);
        assert_eq!(mgr.active_tab().unwrap().current_match, 0);
    }

    #[tokio::test]
    async fn invalid_regex_keeps_previous_result() {
        let (mut mgr, _source, _ui) = manager(FakeSource::new("error one\nerror two"));
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();

        mgr.set_search_term("error").unwrap();
        assert_eq!(mgr.active_tab().unwrap().search.as_ref().unwrap().len(), 2);

        mgr.toggle_option(SearchToggle::Regex).unwrap();
        let err = mgr.set_search_term("[").unwrap_err();
        assert!(matches!(err, SessionError::Search(SearchError::InvalidPattern { .. })));

        // Prior matches survive so the user can correct the pattern
        let tab = mgr.active_tab().unwrap();
        assert_eq!(tab.search.as_ref().unwrap().term, "error");
        assert_eq!(tab.search.as_ref().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_term_clears_search() {
        let (mut mgr, _source, _ui) = manager(FakeSource::new("error one"));
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();

        mgr.set_search_term("error").unwrap();
        assert!(mgr.active_tab().unwrap().search.is_some());

        mgr.set_search_term("").unwrap();
        let tab = mgr.active_tab().unwrap();
        assert!(tab.search.is_none());
        assert_eq!(tab.current_match, 0);
    }

    #[tokio::test]
    async fn toggling_case_sensitivity_reruns_search() {
        let (mut mgr, _source, _ui) =
            manager(FakeSource::new("Error one\nerror two"));
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();

        // Defaults are case-insensitive
        mgr.set_search_term("error").unwrap();
        assert_eq!(mgr.active_tab().unwrap().search.as_ref().unwrap().len(), 2);

        mgr.toggle_option(SearchToggle::CaseSensitive).unwrap();
        assert_eq!(mgr.active_tab().unwrap().search.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn streamed_lines_are_appended_and_search_recomputed() {
        let (mut mgr, source, mut ui) = manager(FakeSource::new("error one"));
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();
        mgr.set_search_term("error").unwrap();

        // Drain the events load_logs and the search emitted; the next
        // append notification can only come from the listener.
        while ui.try_recv().is_ok() {}

        source.feed_for(&tab_a()).send("error two".into()).await.unwrap();

        // Wait for the listener to report the append, as the UI loop would
        loop {
            match ui.recv().await.unwrap() {
                UiEvent::LogsAppended(id) if id == tab_a() => break,
                _ => {}
            }
        }
        mgr.refresh_search(&tab_a());

        let tab = mgr.tab(&tab_a()).unwrap();
        assert_eq!(tab.buffer.len(), 2);
        assert_eq!(tab.search.as_ref().unwrap().len(), 2);
        assert_eq!(tab.current_match, 0);
    }

    #[tokio::test]
    async fn cancelled_stream_stops_buffer_writes() {
        let (mut mgr, source, _ui) = manager(FakeSource::new(""));
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();
        let feed = source.feed_for(&tab_a());

        mgr.stop();
        assert_eq!(mgr.tab(&tab_a()).unwrap().stream_state, StreamState::Cancelled);

        // The listener is gone (or going); nothing may land in the buffer.
        let _ = feed.send("late line".into()).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(mgr.tab(&tab_a()).unwrap().buffer.is_empty());
    }

    #[tokio::test]
    async fn stream_end_marks_tab_closed() {
        let (mut mgr, source, mut ui) = manager(FakeSource::new(""));
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();

        // Dropping the sender closes the follow channel
        source.feeds.lock().clear();

        loop {
            match ui.recv().await.unwrap() {
                UiEvent::StreamEnded(id) if id == tab_a() => break,
                _ => {}
            }
        }
        mgr.on_stream_ended(&tab_a());

        assert_eq!(mgr.tab(&tab_a()).unwrap().stream_state, StreamState::Closed);
        assert!(mgr.live_tab().is_none());
    }

    #[tokio::test]
    async fn switch_cluster_closes_all_tabs() {
        let (mut mgr, _source, mut ui) = manager(FakeSource::new("x"));
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();
        mgr.open_container(tab_b());

        mgr.switch_cluster("staging").await.unwrap();
        assert!(mgr.tabs().is_empty());
        assert!(mgr.live_tab().is_none());

        let mut saw_switch = false;
        while let Ok(event) = ui.try_recv() {
            if matches!(&event, UiEvent::ClusterSwitched(name) if name == "staging") {
                saw_switch = true;
            }
        }
        assert!(saw_switch);
    }

    #[tokio::test]
    async fn failed_switch_retains_prior_state() {
        let mut source = FakeSource::new("x");
        source.fail_switch = true;
        let (mut mgr, _source, _ui) = manager(source);
        mgr.open_container(tab_a());
        mgr.load_logs(&tab_a()).await.unwrap();

        let err = mgr.switch_cluster("nowhere").await.unwrap_err();
        assert!(matches!(err, SessionError::ClusterSwitch { .. }));
        assert_eq!(mgr.tabs().len(), 1);
        assert_eq!(mgr.live_tab(), Some(&tab_a()));
    }

    #[tokio::test]
    async fn intents_surface_errors_as_status() {
        let (mut mgr, _source, mut ui) = manager(FakeSource::new(""));
        // Search with no tab open
        mgr.handle_intent(Intent::SetSearchTerm("x".into())).await;

        let mut saw_status = false;
        while let Ok(event) = ui.try_recv() {
            if matches!(event, UiEvent::Status(_)) {
                saw_status = true;
            }
        }
        assert!(saw_status);
    }
}
