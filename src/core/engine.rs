use crate::core::assembler::Assembler;
use crate::core::collection_fetcher::PagedCollectionFetcher;
use crate::core::command::run_command;
use crate::core::error::{FetchError, FetchResult};
use crate::core::events::{EventSink, FetchEvent};
use crate::core::model::*;
use crate::core::naming::ResourceName;
use crate::core::segment_fetcher::SegmentFetcher;
use crate::core::store::SqliteJournal;
use crate::plugins::registry::Transport;
use anyhow::Context;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};
use uuid::Uuid;

pub const TRACING_TARGET: &str = "segfetch::engine";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub hop_limit: u32,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { hop_limit: DEFAULT_HOP_LIMIT, event_capacity: 256 }
    }
}

/// Runs independent fetches over one shared transport. Every fetch owns its
/// own state; the engine only tracks their status and fans out events.
#[derive(Clone)]
pub struct Engine {
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    event_tx: broadcast::Sender<FetchEvent>,
    fetches: Arc<Mutex<HashMap<FetchId, FetchStatus>>>,
    fetch_notifies: Arc<Mutex<HashMap<FetchId, Arc<Notify>>>>,
    journal: Option<SqliteJournal>,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            transport,
            config,
            event_tx,
            fetches: Arc::new(Mutex::new(HashMap::new())),
            fetch_notifies: Arc::new(Mutex::new(HashMap::new())),
            journal: None,
        }
    }

    /// Opens (or creates) the journal under `state_dir` and records every
    /// fetch in it.
    pub async fn with_journal(mut self, state_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(state_dir).await
            .with_context(|| format!("create state_dir {}", state_dir.display()))?;
        let journal = SqliteJournal::open(&state_dir.join("fetches.sqlite")).await?;
        tokio::spawn(record_progress(journal.clone(), self.event_tx.subscribe()));
        self.journal = Some(journal);
        Ok(self)
    }

    pub fn journal(&self) -> Option<&SqliteJournal> {
        self.journal.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.event_tx.subscribe()
    }

    pub async fn status(&self, fetch_id: FetchId) -> Option<FetchStatus> {
        self.fetches.lock().await.get(&fetch_id).copied()
    }

    /// Drops the status of a finished fetch and returns it. Running fetches
    /// are kept, so they can still be waited on.
    pub async fn forget(&self, fetch_id: FetchId) -> Option<FetchStatus> {
        let mut fetches = self.fetches.lock().await;
        match fetches.get(&fetch_id).copied() {
            Some(status @ (FetchStatus::Completed | FetchStatus::Failed)) => {
                fetches.remove(&fetch_id);
                Some(status)
            }
            _ => None,
        }
    }

    pub async fn is_finished(&self, fetch_id: FetchId) -> bool {
        matches!(self.status(fetch_id).await, Some(FetchStatus::Completed | FetchStatus::Failed))
    }

    /// Resolves once `fetch_id` has reached a terminal status. Unknown ids
    /// resolve immediately.
    pub async fn wait(&self, fetch_id: FetchId) {
        let notify = {
            let m = self.fetch_notifies.lock().await;
            m.get(&fetch_id).cloned()
        };

        if let Some(n) = notify {
            let notified = n.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_finished(fetch_id).await {
                return;
            }
            notified.await;
        }
    }

    pub async fn fetch_object(&self, base: &ResourceName, total_segments: u64) -> FetchResult<Bytes> {
        let sink = self.begin(FetchKind::Object, base, Some(total_segments)).await;
        let result = SegmentFetcher::new(self.transport.clone(), base.clone(), total_segments)
            .with_events(sink.clone())
            .run()
            .await;
        let received = result.as_ref().map(|_| total_segments).unwrap_or(0);
        let failure = result.as_ref().err().cloned();
        self.finish(&sink, failure.as_ref(), received).await;
        result
    }

    pub async fn fetch_collection<T>(
        &self,
        base: &ResourceName,
        start_offset: u64,
        descriptor: PageDescriptor<T>,
    ) -> FetchResult<Collection<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let sink = self.begin(FetchKind::Collection, base, None).await;
        let result = PagedCollectionFetcher::new(self.transport.clone(), base.clone(), start_offset, descriptor)
            .with_hop_limit(self.config.hop_limit)
            .with_events(sink.clone())
            .run()
            .await;
        if let Ok(c) = &result {
            if let PageEnd::HopLimitReached { next } = c.end {
                let _ = self.event_tx.send(FetchEvent::Info {
                    scope: format!("collection {}", base),
                    message: format!("stopped after {} hops, more from segment {}", self.config.hop_limit, next),
                });
            }
        }
        let received = result.as_ref().map(|c| c.items.len() as u64).unwrap_or(0);
        let failure = result.as_ref().err().cloned();
        self.finish(&sink, failure.as_ref(), received).await;
        result
    }

    pub async fn restore(&self, name: &ResourceName) -> FetchResult<()> {
        let sink = self.begin(FetchKind::Command, name, None).await;
        let result = run_command(self.transport.as_ref(), name).await;
        self.finish(&sink, result.as_ref().err(), result.is_ok() as u64).await;
        result
    }

    /// Fetches an object and writes it to `target` through a partial file.
    pub async fn save_object(
        &self,
        base: &ResourceName,
        total_segments: u64,
        target: &Path,
    ) -> anyhow::Result<PathBuf> {
        let data = self.fetch_object(base, total_segments).await?;
        let assembler = Assembler::create(target).await?;
        assembler.append(&data).await?;
        let path = assembler.finish().await?;
        tracing::info!(target: TRACING_TARGET, name = %base, path = %path.display(), bytes = data.len(), "object saved");
        Ok(path)
    }

    /// Callback form of [`Engine::fetch_object`]. Returns immediately with the
    /// fetch id; exactly one callback runs later, after the engine has
    /// recorded the outcome.
    pub async fn spawn_object<C, F>(
        &self,
        base: ResourceName,
        total_segments: u64,
        on_complete: C,
        on_failure: F,
    ) -> FetchId
    where
        C: FnOnce(Bytes) + Send + 'static,
        F: FnOnce(FetchError) + Send + 'static,
    {
        let sink = self.begin(FetchKind::Object, &base, Some(total_segments)).await;
        let fetch_id = sink.fetch_id();
        let fetcher = SegmentFetcher::new(self.transport.clone(), base, total_segments).with_events(sink.clone());
        let engine = self.clone();
        tokio::spawn(async move {
            let result = fetcher.run().await;
            let received = result.as_ref().map(|_| total_segments).unwrap_or(0);
            let failure = result.as_ref().err().cloned();
            engine.finish(&sink, failure.as_ref(), received).await;
            match result {
                Ok(data) => on_complete(data),
                Err(e) => on_failure(e),
            }
        });
        fetch_id
    }

    /// Callback form of [`Engine::fetch_collection`].
    pub async fn spawn_collection<T, P, F>(
        &self,
        base: ResourceName,
        start_offset: u64,
        descriptor: PageDescriptor<T>,
        on_page: P,
        on_failure: F,
    ) -> FetchId
    where
        T: DeserializeOwned + Send + 'static,
        P: FnOnce(Collection<T>) + Send + 'static,
        F: FnOnce(FetchError) + Send + 'static,
    {
        let sink = self.begin(FetchKind::Collection, &base, None).await;
        let fetch_id = sink.fetch_id();
        let fetcher = PagedCollectionFetcher::new(self.transport.clone(), base, start_offset, descriptor)
            .with_hop_limit(self.config.hop_limit)
            .with_events(sink.clone());
        let engine = self.clone();
        tokio::spawn(async move {
            let result = fetcher.run().await;
            let received = result.as_ref().map(|c| c.items.len() as u64).unwrap_or(0);
            let failure = result.as_ref().err().cloned();
            engine.finish(&sink, failure.as_ref(), received).await;
            match result {
                Ok(collection) => on_page(collection),
                Err(e) => on_failure(e),
            }
        });
        fetch_id
    }

    async fn begin(&self, kind: FetchKind, name: &ResourceName, total: Option<u64>) -> EventSink {
        let fetch_id = Uuid::new_v4();
        {
            let mut fetches = self.fetches.lock().await;
            fetches.insert(fetch_id, FetchStatus::Running);
        }
        {
            let mut m = self.fetch_notifies.lock().await;
            m.insert(fetch_id, Arc::new(Notify::new()));
        }

        let _ = self.event_tx.send(FetchEvent::FetchStarted { fetch_id, kind, name: name.to_uri() });
        let _ = self.event_tx.send(FetchEvent::StatusChanged { fetch_id, status: FetchStatus::Running });
        tracing::debug!(target: TRACING_TARGET, %fetch_id, kind = kind.as_str(), name = %name, "fetch started");

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.begin(fetch_id, &name.to_uri(), kind, total).await {
                tracing::warn!(target: TRACING_TARGET, %fetch_id, error = %format!("{:#}", e), "journal write failed");
            }
        }

        EventSink::new(fetch_id, self.event_tx.clone())
    }

    async fn finish(&self, sink: &EventSink, error: Option<&FetchError>, received: u64) {
        let fetch_id = sink.fetch_id();
        let status = if error.is_none() { FetchStatus::Completed } else { FetchStatus::Failed };

        if let Some(e) = error {
            tracing::warn!(target: TRACING_TARGET, %fetch_id, error = %e, "fetch failed");
            let _ = self.event_tx.send(FetchEvent::Error {
                scope: format!("fetch({})", fetch_id),
                message: e.to_string(),
            });
        } else {
            tracing::debug!(target: TRACING_TARGET, %fetch_id, received, "fetch completed");
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.finish(fetch_id, status, received).await {
                tracing::warn!(target: TRACING_TARGET, %fetch_id, error = %format!("{:#}", e), "journal write failed");
            }
        }

        {
            let mut fetches = self.fetches.lock().await;
            fetches.insert(fetch_id, status);
        }
        let _ = self.event_tx.send(FetchEvent::StatusChanged { fetch_id, status });

        let notify = {
            let mut m = self.fetch_notifies.lock().await;
            m.remove(&fetch_id)
        };
        if let Some(n) = notify {
            n.notify_waiters();
        }
    }
}

/// Mirrors progress events into the journal until the engine goes away.
/// Updates that land after a fetch finished are ignored by the journal.
async fn record_progress(journal: SqliteJournal, mut rx: broadcast::Receiver<FetchEvent>) {
    loop {
        let (fetch_id, count) = match rx.recv().await {
            Ok(FetchEvent::SegmentReceived { fetch_id, .. }) => (fetch_id, 1),
            Ok(FetchEvent::PageReceived { fetch_id, items, .. }) => (fetch_id, items as u64),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(target: TRACING_TARGET, skipped = n, "journal fell behind on progress");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if let Err(e) = journal.add_received(fetch_id, count).await {
            tracing::warn!(target: TRACING_TARGET, %fetch_id, error = %format!("{:#}", e), "journal write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{SharedFolder, FILES};
    use crate::core::error::TransportError;
    use crate::plugins::memory::driver::MemoryTransport;
    use serde_json::json;

    fn content() -> ResourceName {
        "/ndn/ucla/bob/chronoshare/file/%BA%0C".parse().unwrap()
    }

    fn engine_with(transport: Arc<MemoryTransport>) -> Engine {
        Engine::new(transport, EngineConfig::default())
    }

    #[tokio::test]
    async fn object_fetch_reports_progress_and_status() {
        let transport = Arc::new(MemoryTransport::new());
        transport.publish(content().add_segment(0), "ab");
        transport.publish(content().add_segment(1), "cd");
        let engine = engine_with(transport);
        let mut rx = engine.subscribe();

        let data = engine.fetch_object(&content(), 2).await.unwrap();
        assert_eq!(&data[..], b"abcd");

        let mut segments = vec![];
        let mut last_status = None;
        while let Ok(evt) = rx.try_recv() {
            match evt {
                FetchEvent::SegmentReceived { index, total, .. } => segments.push((index, total)),
                FetchEvent::StatusChanged { status, .. } => last_status = Some(status),
                _ => {}
            }
        }
        assert_eq!(segments, vec![(0, 2), (1, 2)]);
        assert_eq!(last_status, Some(FetchStatus::Completed));
    }

    #[tokio::test]
    async fn independent_fetches_do_not_share_state() {
        let transport = Arc::new(MemoryTransport::new());
        let folder = SharedFolder::new("/ndn/ucla/alice".parse().unwrap(), "docs");
        let listing = folder.files(None);
        let file = json!({
            "filename": "a.txt", "version": 0,
            "owner": {"userName": "/ndn/ucla/alice", "seqNo": 1},
            "hash": "ba0c", "timestamp": "t", "chmod": "0644", "segNum": 2
        });
        transport.publish(listing.add_segment(0), serde_json::to_vec(&json!({"files": [file]})).unwrap());
        transport.publish(content().add_segment(0), "12");
        transport.publish(content().add_segment(1), "34");
        let engine = engine_with(transport);
        let object_name = content();

        let (files, object) = tokio::join!(
            engine.fetch_collection(&listing, 0, FILES),
            engine.fetch_object(&object_name, 2)
        );
        let files = files.unwrap();
        assert_eq!(files.items.len(), 1);
        assert_eq!(files.items[0].seg_num, 2);
        assert!(!files.is_truncated());
        assert_eq!(&object.unwrap()[..], b"1234");
    }

    #[tokio::test]
    async fn spawned_fetch_calls_back_once_and_can_be_awaited() {
        let transport = Arc::new(MemoryTransport::new());
        transport.publish(content().add_segment(0), "x");
        transport.fail(content().add_segment(1), TransportError::Timeout);
        let engine = engine_with(transport);

        let (tx, rx) = tokio::sync::oneshot::channel::<Result<Bytes, FetchError>>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
        let (ok_tx, err_tx) = (tx.clone(), tx);
        let id = engine
            .spawn_object(
                content(),
                2,
                move |data| {
                    if let Some(t) = ok_tx.lock().unwrap().take() {
                        let _ = t.send(Ok(data));
                    }
                },
                move |err| {
                    if let Some(t) = err_tx.lock().unwrap().take() {
                        let _ = t.send(Err(err));
                    }
                },
            )
            .await;

        let outcome = rx.await.unwrap();
        assert!(outcome.unwrap_err().is_timeout());
        engine.wait(id).await;
        assert_eq!(engine.status(id).await, Some(FetchStatus::Failed));

        assert_eq!(engine.forget(id).await, Some(FetchStatus::Failed));
        assert_eq!(engine.status(id).await, None);
        assert_eq!(engine.forget(id).await, None);
    }

    #[tokio::test]
    async fn running_fetches_are_not_forgotten() {
        let transport = Arc::new(MemoryTransport::new());
        let engine = engine_with(transport);
        let sink = engine.begin(FetchKind::Object, &content(), Some(1)).await;

        assert_eq!(engine.forget(sink.fetch_id()).await, None);
        assert_eq!(engine.status(sink.fetch_id()).await, Some(FetchStatus::Running));

        engine.finish(&sink, None, 1).await;
        assert_eq!(engine.forget(sink.fetch_id()).await, Some(FetchStatus::Completed));
        assert!(engine.fetches.lock().await.is_empty());
    }

    #[tokio::test]
    async fn restore_goes_through_the_engine() {
        let transport = Arc::new(MemoryTransport::new());
        let folder = SharedFolder::new("/ndn/ucla/alice".parse().unwrap(), "docs");
        let cmd = folder.restore("a.txt", 1, None);
        transport.publish(cmd.clone(), "OK");
        let engine = engine_with(transport);
        engine.restore(&cmd).await.unwrap();
    }

    #[tokio::test]
    async fn journal_records_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        transport.publish(content().add_segment(0), "z");
        let engine = engine_with(transport).with_journal(dir.path()).await.unwrap();

        let mut rx = engine.subscribe();
        let target = dir.path().join("a.txt");
        engine.save_object(&content(), 1, &target).await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"z");

        let id = loop {
            if let FetchEvent::FetchStarted { fetch_id, .. } = rx.recv().await.unwrap() {
                break fetch_id;
            }
        };
        let rec = engine.journal().unwrap().get(id).await.unwrap().unwrap();
        assert_eq!(rec.status, FetchStatus::Completed);
        assert_eq!(rec.received, 1);
        assert!(engine.journal().unwrap().list_unfinished().await.unwrap().is_empty());
    }
}
