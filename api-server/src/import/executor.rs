//! Bounded worker pool for the persistence stage.
//!
//! Jobs go into a bounded queue drained by `core_workers` long-lived worker
//! tasks. When the queue is full, extra workers are started (up to
//! `max_workers`) and handed the job directly; they retire after `keep_alive`
//! without work. Past that point the [`SaturationPolicy`] decides: run the job
//! on the submitting task, or refuse it.
//!
//! Each job runs in its own tokio task so a panicking job only loses its own
//! result (reported as [`PoolError::WorkerLost`]), never the worker.

use crate::config::{SaturationPolicy, WorkerPoolConfig};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("queue is full and all {max_workers} workers are busy")]
    Saturated { max_workers: usize },
    #[error("pool is shut down")]
    Closed,
    #[error("job was dropped before it produced a result")]
    WorkerLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerKind {
    Core,
    Extra,
}

struct Shared {
    name: String,
    config: WorkerPoolConfig,
    receiver: Mutex<mpsc::Receiver<Job>>,
    live_workers: AtomicUsize,
    next_worker_id: AtomicUsize,
}

/// Cloneable handle to a bounded pool of worker tasks.
#[derive(Clone)]
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Start the pool's core workers. Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, config: WorkerPoolConfig) -> Self {
        let config = config.normalized();
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(Shared {
            name: name.into(),
            config,
            receiver: Mutex::new(receiver),
            live_workers: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(0),
        });

        for _ in 0..shared.config.core_workers {
            shared.live_workers.fetch_add(1, Ordering::SeqCst);
            spawn_worker(Arc::clone(&shared), None, WorkerKind::Core);
        }

        log::info!(
            "{}: started {} core workers (max {}, queue {}, {:?} when saturated)",
            shared.name,
            shared.config.core_workers,
            shared.config.max_workers,
            shared.config.queue_capacity,
            shared.config.saturation
        );

        Self { sender, shared }
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Hand a job to the pool without waiting for it.
    ///
    /// Under [`SaturationPolicy::CallerRuns`] the returned task may carry the
    /// job itself; it then executes when [`PoolTask::wait`] is awaited.
    pub fn submit<F, T>(&self, task: F) -> Result<PoolTask<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(task.await);
        });

        match self.sender.try_send(job) {
            Ok(()) => Ok(PoolTask::queued(rx)),
            Err(TrySendError::Closed(_)) => Err(PoolError::Closed),
            Err(TrySendError::Full(job)) => {
                if self.try_reserve_worker() {
                    log::debug!("{}: queue full, starting extra worker", self.shared.name);
                    spawn_worker(Arc::clone(&self.shared), Some(job), WorkerKind::Extra);
                    return Ok(PoolTask::queued(rx));
                }

                match self.shared.config.saturation {
                    SaturationPolicy::CallerRuns => {
                        log::warn!(
                            "{}: saturated, running job on the caller",
                            self.shared.name
                        );
                        Ok(PoolTask {
                            inline: Some(job),
                            result: rx,
                        })
                    }
                    SaturationPolicy::Reject => {
                        log::warn!("{}: saturated, rejecting job", self.shared.name);
                        Err(PoolError::Saturated {
                            max_workers: self.shared.config.max_workers,
                        })
                    }
                }
            }
        }
    }

    /// Submit a job and wait for its result.
    pub async fn run<F, T>(&self, task: F) -> Result<T, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(task)?.wait().await
    }

    fn try_reserve_worker(&self) -> bool {
        let max = self.shared.config.max_workers;
        self.shared
            .live_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < max).then_some(live + 1)
            })
            .is_ok()
    }
}

/// Pending result of a submitted job.
pub struct PoolTask<T> {
    inline: Option<Job>,
    result: oneshot::Receiver<T>,
}

impl<T> PoolTask<T> {
    fn queued(result: oneshot::Receiver<T>) -> Self {
        Self {
            inline: None,
            result,
        }
    }

    /// True when the pool was saturated and the job will run on the awaiting task.
    pub fn runs_on_caller(&self) -> bool {
        self.inline.is_some()
    }

    pub async fn wait(self) -> Result<T, PoolError> {
        let PoolTask { inline, result } = self;
        if let Some(job) = inline {
            job.await;
        }
        result.await.map_err(|_| PoolError::WorkerLost)
    }
}

fn spawn_worker(shared: Arc<Shared>, first: Option<Job>, kind: WorkerKind) {
    let id = shared.next_worker_id.fetch_add(1, Ordering::Relaxed) + 1;

    tokio::spawn(async move {
        let name = format!("{}-{}", shared.name, id);
        log::trace!("{}: started ({:?})", name, kind);

        if let Some(job) = first {
            run_job(&name, job).await;
        }

        while let Some(job) = next_job(&shared, kind).await {
            run_job(&name, job).await;
        }

        shared.live_workers.fetch_sub(1, Ordering::SeqCst);
        log::debug!("{}: retired", name);
    });
}

async fn next_job(shared: &Shared, kind: WorkerKind) -> Option<Job> {
    let receive = async { shared.receiver.lock().await.recv().await };

    match kind {
        WorkerKind::Core => receive.await,
        WorkerKind::Extra => tokio::time::timeout(shared.config.keep_alive, receive)
            .await
            .unwrap_or(None),
    }
}

async fn run_job(worker: &str, job: Job) {
    if let Err(err) = tokio::spawn(job).await {
        log::error!("{}: job failed: {}", worker, err);
    }
}
