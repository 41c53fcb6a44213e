#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Concurrent workers leasing work items from the queue and running them
//! through the orchestrator and recorder.

use crate::config::HarvestConfig;
use crate::error::Result;
use crate::gateway::{ClientFactory, SessionGateway};
use crate::orchestrator::RetryOrchestrator;
use crate::recorder::{RecordOutcome, ResultRecorder};
use crate::store::{CredentialStore, ResultStore, TaskStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

const MIN_POLL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub concurrency: u32,
    pub lease: Duration,
    pub cooldown: Duration,
}

impl WorkerSettings {
    #[must_use]
    pub const fn from_config(config: &HarvestConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency,
            lease: config.lease,
            cooldown: config.cooldown,
        }
    }
}

struct Shared<S, F> {
    store: S,
    orchestrator: RetryOrchestrator<S, F>,
    recorder: ResultRecorder<S>,
    lease: Duration,
}

pub struct WorkerPool<S, F> {
    shared: Arc<Shared<S, F>>,
    concurrency: u32,
}

impl<S, F> WorkerPool<S, F>
where
    S: CredentialStore + TaskStore + ResultStore + Clone + 'static,
    F: ClientFactory + 'static,
    F::Client: 'static,
{
    #[must_use]
    pub fn new(store: S, gateway: SessionGateway<F>, settings: WorkerSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                orchestrator: RetryOrchestrator::new(store.clone(), gateway, settings.cooldown),
                recorder: ResultRecorder::new(store.clone()),
                store,
                lease: settings.lease,
            }),
            concurrency: settings.concurrency.max(1),
        }
    }

    /// Runs until `shutdown` flips to `true`. Workers finish the item they
    /// hold before exiting.
    ///
    /// # Errors
    /// Returns an error if the startup sweep fails.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.shared.sweep().await?;

        let mut workers = JoinSet::new();
        for n in 0..self.concurrency {
            let shared = Arc::clone(&self.shared);
            let shutdown = shutdown.clone();
            workers.spawn(async move { shared.worker_loop(format!("worker-{n}"), shutdown).await });
        }
        let shared = Arc::clone(&self.shared);
        workers.spawn(async move { shared.lease_reaper(shutdown).await });

        info!("Started {} worker(s)", self.concurrency);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("All workers stopped");
        Ok(())
    }

    /// Processes queued items on the calling task until none is left.
    ///
    /// # Errors
    /// Returns the first store failure.
    pub async fn drain(&self, worker: &str) -> Result<u32> {
        let mut processed = 0_u32;
        while self.shared.process_next(worker).await? {
            processed = processed.saturating_add(1);
        }
        Ok(processed)
    }
}

impl<S, F> Shared<S, F>
where
    S: CredentialStore + TaskStore + ResultStore + Clone,
    F: ClientFactory,
{
    async fn process_next(&self, worker: &str) -> Result<bool> {
        let Some(item) = self.store.lease_next_work_item(worker, self.lease).await? else {
            return Ok(false);
        };
        info!(
            "Worker {} leased work item {} of task {}",
            worker, item.id, item.task_id
        );

        let started = Instant::now();
        match self.orchestrator.run(&item).await {
            Ok(outcome) => {
                let recorded = self.recorder.record(item.task_id, item.id, &outcome).await?;
                if matches!(recorded, RecordOutcome::Recorded { .. }) {
                    info!(
                        "Worker {} recorded {} for work item {} in {}ms",
                        worker,
                        outcome.kind_str(),
                        item.id,
                        elapsed_ms(started)
                    );
                }
            }
            Err(e) => {
                error!("Work item {} aborted: {}", item.id, e);
                self.recorder.abort(item.task_id, item.id, &e).await?;
            }
        }
        Ok(true)
    }

    async fn worker_loop(&self, name: String, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = MIN_POLL_BACKOFF;
        while !*shutdown.borrow() {
            match self.process_next(&name).await {
                Ok(true) => {
                    backoff = MIN_POLL_BACKOFF;
                    continue;
                }
                Ok(false) => {}
                Err(e) => error!("Worker {} failed to process work: {}", name, e),
            }

            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            backoff = next_poll_backoff(backoff);
        }
        info!("Worker {} stopped", name);
    }

    /// Puts expired leases back in the queue and finishes tasks whose last
    /// result was stored by a worker that died before flipping the status.
    async fn sweep(&self) -> Result<()> {
        let released = self.store.release_expired_leases().await?;
        if released > 0 {
            info!("Released {} expired lease(s)", released);
        }
        let finished = self.store.complete_settled_tasks().await?;
        if finished > 0 {
            info!("Completed {} settled task(s)", finished);
        }
        Ok(())
    }

    async fn lease_reaper(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            tokio::select! {
                () = tokio::time::sleep(self.lease) => {
                    if let Err(e) = self.sweep().await {
                        error!("Lease sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn next_poll_backoff(current: Duration) -> Duration {
    let doubled_ms = current.as_millis().saturating_mul(2);
    let bounded_ms = doubled_ms.min(MAX_POLL_BACKOFF.as_millis());
    Duration::from_millis(u64::try_from(bounded_ms).unwrap_or(u64::MAX))
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
