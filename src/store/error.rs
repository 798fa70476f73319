use thiserror::Error;

use super::records::ServerId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage worker has shut down")]
    WorkerClosed,

    #[error("no routing table for {0}")]
    UnknownServer(ServerId),

    #[error("failed to start storage worker: {0}")]
    Spawn(#[from] std::io::Error),
}
