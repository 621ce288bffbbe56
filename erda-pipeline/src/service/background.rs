//! Background worker pool
//!
//! Fire-and-forget work (event delivery, post-create hooks) runs on a fixed
//! set of workers fed by a bounded queue. A full queue drops the job with a
//! warning; a failed job is logged as an alert.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type BoxedJob = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct Job {
    name: String,
    fut: BoxedJob,
}

#[derive(Clone)]
pub struct BackgroundPool {
    tx: mpsc::Sender<Job>,
}

impl BackgroundPool {
    /// Spawn `workers` workers sharing a queue of `queue_size` jobs
    ///
    /// Workers stop when `shutdown` is cancelled or every pool handle is dropped.
    pub fn start(
        workers: usize,
        queue_size: usize,
        shutdown: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel::<Job>(queue_size);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                _ = shutdown.cancelled() => None,
                                job = rx.recv() => job,
                            }
                        };
                        let Some(job) = job else {
                            debug!("background worker {} stopped", worker);
                            break;
                        };
                        if let Err(e) = job.fut.await {
                            error!("[alert] background job {} failed: {:#}", job.name, e);
                        }
                    }
                })
            })
            .collect();

        (Self { tx }, handles)
    }

    /// Queue a job. Returns false when the job was dropped.
    pub fn submit<F>(&self, name: impl Into<String>, fut: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job = Job {
            name: name.into(),
            fut: Box::pin(fut),
        };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("background queue full, dropping job {}", job.name);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!("background pool stopped, dropping job {}", job.name);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_jobs_run() {
        let shutdown = CancellationToken::new();
        let (pool, _handles) = BackgroundPool::start(2, 8, shutdown.clone());

        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = oneshot::channel();
        let c = Arc::clone(&counter);
        assert!(pool.submit("count", async move {
            c.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
            Ok(())
        }));

        done_rx.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_worker() {
        let shutdown = CancellationToken::new();
        let (pool, _handles) = BackgroundPool::start(1, 8, shutdown.clone());

        assert!(pool.submit("fails", async { anyhow::bail!("boom") }));
        let (done_tx, done_rx) = oneshot::channel();
        assert!(pool.submit("after", async move {
            let _ = done_tx.send(());
            Ok(())
        }));

        done_rx.await.unwrap();
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_full_queue_drops_job() {
        let shutdown = CancellationToken::new();
        // no workers: nothing drains the queue
        let (pool, _handles) = BackgroundPool::start(0, 1, shutdown);

        assert!(pool.submit("first", async { Ok(()) }));
        assert!(!pool.submit("second", async { Ok(()) }));
    }

    #[tokio::test]
    async fn test_workers_stop_on_shutdown() {
        let shutdown = CancellationToken::new();
        let (_pool, handles) = BackgroundPool::start(3, 8, shutdown.clone());
        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
