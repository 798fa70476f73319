use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::database::Database;
use super::error::StoreError;
use crate::event::EventSink;

type Job = Box<dyn FnOnce(&mut Database) + Send>;

enum Request {
    Run { id: u64, job: Job },
    Shutdown,
}

/// Handle for submitting work to the storage worker.
///
/// Every read and write of routing and torrent state runs as a closure on
/// the worker's thread, one at a time, in submission order.
#[derive(Clone)]
pub struct Storage {
    tx: mpsc::UnboundedSender<Request>,
    next_request: Arc<AtomicU64>,
}

impl Storage {
    /// Runs `f` on the worker and waits for its result. There is no
    /// timeout; the call only fails if the worker is gone.
    pub async fn call<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Database) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Box::new(move |db| {
            let _ = reply_tx.send(f(db));
        }))?;
        reply_rx.await.map_err(|_| StoreError::WorkerClosed)
    }

    /// Queues `f` without waiting for it.
    pub fn execute<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Database) + Send + 'static,
    {
        self.submit(Box::new(f))
    }

    fn submit(&self, job: Job) -> Result<(), StoreError> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(Request::Run { id, job })
            .map_err(|_| StoreError::WorkerClosed)
    }
}

/// The single thread that owns the [`Database`].
pub struct StorageWorker {
    storage: Storage,
    thread: Option<thread::JoinHandle<()>>,
}

impl StorageWorker {
    pub fn spawn(events: EventSink) -> Result<Self, StoreError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Request>();

        let thread = thread::Builder::new()
            .name("rdht-storage".into())
            .spawn(move || {
                let mut db = Database::new(events);
                while let Some(request) = rx.blocking_recv() {
                    match request {
                        Request::Run { id, job } => {
                            trace!(request = id, "storage request");
                            job(&mut db);
                        }
                        Request::Shutdown => break,
                    }
                }
                debug!("storage worker stopped");
            })?;

        Ok(Self {
            storage: Storage {
                tx,
                next_request: Arc::new(AtomicU64::new(0)),
            },
            thread: Some(thread),
        })
    }

    pub fn storage(&self) -> Storage {
        self.storage.clone()
    }

    /// Lets queued work finish, then stops the thread.
    pub async fn shutdown(mut self) {
        let _ = self.storage.tx.send(Request::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }
}

impl Drop for StorageWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.storage.tx.send(Request::Shutdown);
        }
    }
}
