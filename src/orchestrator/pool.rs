//! Bounded worker pool for provider calls.
//!
//! `core` permanent workers drain a queue holding up to `queue_depth` jobs.
//! When the queue is full, up to `max - core` overflow tasks run jobs
//! directly; past that the submitting task runs the job itself. A job is
//! never dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Semaphore, mpsc};

use crate::config::WorkersSection;

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Where a submitted job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Queued,
    Overflow,
    CallerRuns,
}

pub struct WorkerPool {
    queue: mpsc::Sender<Job>,
    overflow: Arc<Semaphore>,
}

impl WorkerPool {
    /// Spawn the core workers.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(sizing: WorkersSection) -> Self {
        let core = sizing.core.max(1);
        let (queue, rx) = mpsc::channel::<Job>(sizing.queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..core {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                tracing::trace!(worker, "analysis worker stopped");
            });
        }

        Self {
            queue,
            overflow: Arc::new(Semaphore::new(sizing.max.saturating_sub(core))),
        }
    }

    /// Place `job`, running it inline when the pool is saturated.
    pub async fn submit(&self, job: Job) -> Placement {
        let job = match self.queue.try_send(job) {
            Ok(()) => return Placement::Queued,
            Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => job,
        };

        if let Ok(permit) = Arc::clone(&self.overflow).try_acquire_owned() {
            tokio::spawn(async move {
                let _permit = permit;
                job.await;
            });
            return Placement::Overflow;
        }

        tracing::warn!("analysis pool saturated, running job on caller");
        job.await;
        Placement::CallerRuns
    }
}
