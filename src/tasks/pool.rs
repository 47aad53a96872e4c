//! Bounded in-process task pool for evaluation and propagation jobs.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Job {
    Evaluate { attempt_id: String },
    Propagate { attempt_id: String },
}

impl Job {
    pub(crate) fn attempt_id(&self) -> &str {
        match self {
            Self::Evaluate { attempt_id } | Self::Propagate { attempt_id } => attempt_id,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Evaluate { .. } => "evaluate",
            Self::Propagate { .. } => "propagate",
        }
    }
}

/// Sending half of the pool. Cloned into the application state.
#[derive(Debug, Clone)]
pub(crate) struct JobQueue {
    sender: mpsc::Sender<Job>,
}

pub(crate) struct JobReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobQueue {
    pub(crate) fn bounded(capacity: usize) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, JobReceiver { inner: Arc::new(Mutex::new(receiver)) })
    }

    /// Health summary, e.g. `"3/256 queued"` or `"closed"`.
    pub(crate) fn describe(&self) -> String {
        if self.sender.is_closed() {
            return "closed".to_string();
        }
        let capacity = self.sender.max_capacity();
        format!("{}/{capacity} queued", capacity - self.sender.capacity())
    }

    /// Never blocks the caller. A rejected job stays recoverable: evaluation is
    /// redispatched from the pending scan and propagation is picked up by reconciliation.
    pub(crate) fn submit(&self, job: Job) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => {
                metrics::gauge!("task_queue_depth")
                    .set((self.sender.max_capacity() - self.sender.capacity()) as f64);
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                metrics::counter!("task_queue_rejected_total", "kind" => job.kind()).increment(1);
                tracing::warn!(
                    attempt_id = job.attempt_id(),
                    kind = job.kind(),
                    "Task queue full; job left for background recovery"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(
                    attempt_id = job.attempt_id(),
                    kind = job.kind(),
                    "Task queue closed; job left for background recovery"
                );
                false
            }
        }
    }
}

#[cfg(test)]
impl JobReceiver {
    pub(crate) async fn try_next(&self) -> Option<Job> {
        self.inner.lock().await.try_recv().ok()
    }
}

#[async_trait]
pub(crate) trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;

    /// Called after `handle` panicked so the attempt does not stay stuck.
    async fn on_panic(&self, job: &Job);
}

pub(crate) fn spawn_workers<H: JobHandler>(
    handler: Arc<H>,
    receiver: JobReceiver,
    workers: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|index| {
            tokio::spawn(worker(
                index,
                handler.clone(),
                receiver.inner.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn worker<H: JobHandler>(
    index: usize,
    handler: Arc<H>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = shutdown.changed() => break,
                job = receiver.recv() => job,
            }
        };

        let Some(job) = job else {
            break;
        };

        let task_handler = handler.clone();
        let task_job = job.clone();
        let outcome = tokio::spawn(async move { task_handler.handle(task_job).await }).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(
                    worker = index,
                    attempt_id = job.attempt_id(),
                    kind = job.kind(),
                    error = %err,
                    "Background job failed"
                );
            }
            Err(join_err) if join_err.is_panic() => {
                metrics::counter!("task_pool_panics_total", "kind" => job.kind()).increment(1);
                tracing::error!(
                    worker = index,
                    attempt_id = job.attempt_id(),
                    kind = job.kind(),
                    "Background job panicked"
                );
                handler.on_panic(&job).await;
            }
            Err(join_err) => {
                tracing::warn!(
                    worker = index,
                    attempt_id = job.attempt_id(),
                    error = %join_err,
                    "Background job cancelled"
                );
            }
        }
    }

    tracing::debug!(worker = index, "Task pool worker stopped");
}
