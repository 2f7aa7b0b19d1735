//! Bounded pool of background workers with capped retry.
//!
//! Jobs that fail are re-enqueued after a linearly growing delay
//! (`retry_count * retry_delay`) and dropped with a warning once the retry
//! budget is spent. Workers observe cancellation both between jobs and
//! before every retry sleep; `stop` cancels the workers, waits for them to
//! exit, then drains and closes the queue.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A queued unit of work.
#[derive(Debug, Clone)]
pub struct Job<T> {
    pub retry_count: u32,
    pub args: T,
}

/// The boxed future a job handler returns.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// The handler every worker of a pool runs.
pub type JobFn<T> = Arc<dyn Fn(T) -> JobFuture + Send + Sync>;

/// A fixed-size pool of workers consuming a single bounded queue.
pub struct Pool<T> {
    name: &'static str,
    tx: async_channel::Sender<Job<T>>,
    rx: async_channel::Receiver<Job<T>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl<T: Clone + Debug + Send + 'static> Pool<T> {
    /// Create a pool and start its workers.
    pub fn new(
        name: &'static str,
        worker_count: usize,
        queue_size: usize,
        max_retries: u32,
        retry_delay: Duration,
        handler: JobFn<T>,
    ) -> Self {
        assert!(worker_count > 0, "worker count must be positive");

        let (tx, rx) = async_channel::bounded(queue_size);
        let cancel = CancellationToken::new();

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            handles.push(tokio::spawn(run_worker(
                name,
                rx.clone(),
                tx.clone(),
                cancel.clone(),
                max_retries,
                retry_delay,
                handler.clone(),
            )));
        }

        Self {
            name,
            tx,
            rx,
            cancel,
            handles: Mutex::new(handles),
            max_retries,
            retry_delay,
        }
    }

    /// Enqueue a job without waiting. A full or closed queue drops the job
    /// with a warning.
    pub fn add_job(&self, args: T) {
        let job = Job {
            retry_count: 0,
            args,
        };
        if let Err(e) = self.tx.try_send(job) {
            warn!(pool = self.name, error = %e, "failed to enqueue job");
        }
    }

    /// Stop the pool: cancel the workers, wait for them to exit, then drain
    /// any remaining jobs and close the queue. Enqueuing afterwards fails.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(pool = self.name, error = %e, "worker task panicked");
            }
        }

        let mut drained = 0usize;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!(pool = self.name, drained, "dropped queued jobs on stop");
        }

        self.tx.close();
    }

    /// Number of jobs currently queued.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Maximum retries per job.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Base delay between retries.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

impl<T> Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("queued", &self.tx.len())
            .finish()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker<T: Clone + Debug + Send + 'static>(
    name: &'static str,
    rx: async_channel::Receiver<Job<T>>,
    tx: async_channel::Sender<Job<T>>,
    cancel: CancellationToken,
    max_retries: u32,
    retry_delay: Duration,
    handler: JobFn<T>,
) {
    loop {
        let mut job = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(pool = name, "worker cancelled");
                return;
            }
            job = rx.recv() => match job {
                Ok(job) => job,
                Err(_) => return, // queue closed
            },
        };

        // Jobs past the retry budget are dropped at dequeue time.
        if job.retry_count > max_retries {
            warn!(
                pool = name,
                args = ?job.args,
                max_retries,
                "job dropped after exhausting retries"
            );
            continue;
        }

        let Err(e) = handler(job.args.clone()).await else {
            continue;
        };

        job.retry_count += 1;
        let backoff = retry_delay * job.retry_count;
        warn!(
            pool = name,
            args = ?job.args,
            error = %e,
            retry = job.retry_count,
            backoff_ms = backoff.as_millis() as u64,
            "job failed, will retry"
        );

        // The retry sleep must remain preemptible by cancellation.
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(pool = name, "worker cancelled during retry backoff");
                return;
            }
            _ = tokio::time::sleep(backoff) => {}
        }

        // Re-enqueue off-worker so a full queue cannot deadlock the pool.
        let tx = tx.clone();
        let retry_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = retry_cancel.cancelled() => {}
                _ = tx.send(job) => {}
            }
        });
    }
}
