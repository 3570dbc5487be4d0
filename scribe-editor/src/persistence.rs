//! Persistence gateway: debounced background writer for the editor state.
//!
//! ```text
//! Controller ──schedule(record)──► mpsc ──► writer task
//!                                            │ pending slot (latest record)
//!                                            │ quiet for `debounce`
//!                                            ▼
//!                                  DurableStore "state" + path-bound file
//! ```
//!
//! Each schedule replaces the pending record and restarts the quiet
//! period. A write in progress runs to completion; records scheduled
//! meanwhile wait for the next cycle. Dropping the gateway writes whatever
//! is still pending. Failures are logged, never surfaced.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use scribe_collab::DurableStore;
use scribe_core::ServiceError;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::files::FileSource;
use crate::persisted::STATE_KEY;

/// Everything one save writes, captured when it was scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRecord {
    pub state: Vec<u8>,
    /// Markdown for the file the document is bound to.
    pub file: Option<(String, String)>,
}

enum Command {
    Schedule(SaveRecord),
    Flush(oneshot::Sender<()>),
}

pub struct PersistenceGateway {
    tx: mpsc::UnboundedSender<Command>,
}

impl PersistenceGateway {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(
        store: Arc<dyn DurableStore>,
        files: Arc<dyn FileSource>,
        debounce: Duration,
    ) -> Result<Self, ServiceError> {
        let runtime = Handle::try_current().map_err(ServiceError::exception)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = Writer { store, files, debounce };
        runtime.spawn(writer.run(rx));
        Ok(Self { tx })
    }

    pub fn schedule(&self, record: SaveRecord) {
        if self.tx.send(Command::Schedule(record)).is_err() {
            log::warn!("Persistence writer stopped; dropping save");
        }
    }

    /// Write the pending record now; the returned future resolves once
    /// it is written.
    pub fn flush(&self) -> impl Future<Output = ()> + Send + 'static {
        let (ack, done) = oneshot::channel();
        let sent = self.tx.send(Command::Flush(ack)).is_ok();
        async move {
            if sent {
                let _ = done.await;
            }
        }
    }
}

struct Writer {
    store: Arc<dyn DurableStore>,
    files: Arc<dyn FileSource>,
    debounce: Duration,
}

impl Writer {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut pending: Option<SaveRecord> = None;
        loop {
            let command = if pending.is_some() {
                tokio::select! {
                    command = rx.recv() => command,
                    _ = tokio::time::sleep(self.debounce) => {
                        if let Some(record) = pending.take() {
                            self.write(record).await;
                        }
                        continue;
                    }
                }
            } else {
                rx.recv().await
            };

            match command {
                Some(Command::Schedule(record)) => pending = Some(record),
                Some(Command::Flush(ack)) => {
                    if let Some(record) = pending.take() {
                        self.write(record).await;
                    }
                    let _ = ack.send(());
                }
                None => {
                    if let Some(record) = pending.take() {
                        self.write(record).await;
                    }
                    log::debug!("Persistence writer shut down");
                    return;
                }
            }
        }
    }

    async fn write(&self, record: SaveRecord) {
        let store = self.store.clone();
        let state = record.state;
        match tokio::task::spawn_blocking(move || store.put(STATE_KEY, &state)).await {
            Ok(Ok(())) => log::debug!("Saved editor state"),
            Ok(Err(e)) => log::warn!("Failed to save editor state: {}", e),
            Err(e) => log::warn!("Save task failed: {}", e),
        }

        if let Some((path, markdown)) = record.file {
            if let Err(e) = self.files.write(&path, &markdown).await {
                log::warn!("Failed to write {}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::MemoryFiles;
    use scribe_collab::{MemoryStore, StoreError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts writes on top of a memory store.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        puts: AtomicUsize,
    }

    impl DurableStore for CountingStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, value)
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key)
        }
    }

    struct FailingStore;

    impl DurableStore for FailingStore {
        fn get(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        fn put(&self, _: &str, _: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Database("disk full".into()))
        }

        fn delete(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn record(state: &str) -> SaveRecord {
        SaveRecord {
            state: state.as_bytes().to_vec(),
            file: None,
        }
    }

    #[tokio::test]
    async fn test_burst_writes_only_last_record() {
        let store = Arc::new(CountingStore::default());
        let gateway = PersistenceGateway::spawn(
            store.clone(),
            Arc::new(MemoryFiles::new()),
            Duration::from_millis(50),
        )
        .unwrap();

        for i in 0..10 {
            gateway.schedule(record(&format!("{{\"n\":{i}}}")));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(STATE_KEY).unwrap().as_deref(), Some(&b"{\"n\":9}"[..]));
    }

    #[tokio::test]
    async fn test_nothing_written_before_quiet_period() {
        let store = Arc::new(CountingStore::default());
        let gateway = PersistenceGateway::spawn(
            store.clone(),
            Arc::new(MemoryFiles::new()),
            Duration::from_secs(60),
        )
        .unwrap();

        gateway.schedule(record("{}"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);

        gateway.flush().await;
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_path_bound_record_writes_file() {
        let files = MemoryFiles::new();
        let gateway = PersistenceGateway::spawn(
            Arc::new(MemoryStore::new()),
            Arc::new(files.clone()),
            Duration::from_millis(10),
        )
        .unwrap();

        gateway.schedule(SaveRecord {
            state: b"{}".to_vec(),
            file: Some(("/notes/a.md".into(), "hello\n".into())),
        });
        gateway.flush().await;
        assert_eq!(files.contents("/notes/a.md").as_deref(), Some("hello\n"));
    }

    #[tokio::test]
    async fn test_store_failure_is_not_fatal() {
        let gateway = PersistenceGateway::spawn(
            Arc::new(FailingStore),
            Arc::new(MemoryFiles::new()),
            Duration::from_millis(10),
        )
        .unwrap();

        gateway.schedule(record("{}"));
        gateway.flush().await;
        gateway.schedule(record("{}"));
        gateway.flush().await;
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let result = PersistenceGateway::spawn(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryFiles::new()),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(ServiceError::Exception(_))));
    }
}
