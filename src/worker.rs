// 🧵 Aggregation Worker - background price aggregation
//
// The hierarchy import hands the postcodes it touched to a queue and
// returns immediately. A dedicated thread with its own store connection
// drains the queue and runs the aggregation engine for each job.
//
// Job failures never reach the importer; they are logged with the job id.
// `shutdown()` closes the queue and waits until every queued job ran.

use crate::aggregation::{AggregationEngine, AggregationSettings};
use crate::entities::Postcode;
use crate::error::{ImportError, Result};
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};
use uuid::Uuid;

const WORKER_NAME: &str = "aggregation-worker";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationJob {
    pub id: Uuid,
    pub postcodes: Vec<Postcode>,
    pub queued_at: DateTime<Utc>,
}

/// Outcome counters of a worker's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub completed: usize,
    pub failed: usize,
}

pub struct AggregationDispatcher {
    sender: Option<UnboundedSender<AggregationJob>>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl AggregationDispatcher {
    /// Open a second connection to `db_path` and start the worker on it
    pub fn spawn(db_path: impl AsRef<Path>, settings: AggregationSettings) -> Result<Self> {
        let store = Store::open(db_path)?;
        let engine = AggregationEngine::new(settings);
        let (sender, receiver) = unbounded_channel();

        let handle = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || work(store, engine, receiver))
            .map_err(ImportError::Stream)?;

        info!(
            window_size = settings.window_size,
            window_unit = ?settings.window_unit,
            latest_only = settings.latest_only,
            "Aggregation worker started"
        );

        Ok(AggregationDispatcher {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queue an aggregation run and return its job id without waiting for it
    pub fn dispatch(&self, postcodes: Vec<Postcode>) -> Uuid {
        let job = AggregationJob {
            id: Uuid::new_v4(),
            postcodes,
            queued_at: Utc::now(),
        };
        let id = job.id;

        match &self.sender {
            Some(sender) => {
                if sender.send(job).is_err() {
                    error!(job = %id, "Aggregation worker is gone, job dropped");
                }
            }
            None => warn!(job = %id, "Dispatcher shut down, job dropped"),
        }

        id
    }

    /// Close the queue, let queued jobs finish and join the worker
    pub fn shutdown(mut self) -> WorkerStats {
        self.stop()
    }

    fn stop(&mut self) -> WorkerStats {
        drop(self.sender.take());

        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => {
                info!(
                    completed = stats.completed,
                    failed = stats.failed,
                    "Aggregation worker stopped"
                );
                stats
            }
            Some(Err(_)) => {
                error!("Aggregation worker panicked");
                WorkerStats::default()
            }
            None => WorkerStats::default(),
        }
    }
}

impl Drop for AggregationDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn work(
    mut store: Store,
    engine: AggregationEngine,
    mut receiver: UnboundedReceiver<AggregationJob>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    while let Some(job) = receiver.blocking_recv() {
        match engine.run(&mut store, &job.postcodes) {
            Ok(report) => {
                stats.completed += 1;
                info!(job = %job.id, "{}", report.summary());
            }
            Err(e) => {
                stats.failed += 1;
                error!(job = %job.id, postcodes = job.postcodes.len(), error = %e, "Aggregation failed");
            }
        }
    }

    stats
}
