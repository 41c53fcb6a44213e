pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod payload;
pub mod pool;
pub mod queue;
pub mod recorder;
pub mod rehearsal;
pub mod store;
pub mod types;
pub mod worker;

pub use config::{load_config, HarvestConfig};
pub use db::HarvestDb;
pub use error::{HarvestError, Result};
pub use orchestrator::RetryOrchestrator;
pub use queue::HarvestQueue;
pub use recorder::{RecordOutcome, ResultRecorder};
pub use store::{
    CredentialStore, MemoryStore, QueueSnapshot, ResultStore, SnapshotStore, TaskStore,
};
pub use types::*;
pub use worker::{WorkerPool, WorkerSettings};
