use crate::transport::shutdown::{ShutdownCoordinator, ShutdownListener, run_with_timeout};
use futures::FutureExt;
use serde::Deserialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// What `submit` does when every worker is busy and the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Refuse the job with [`PoolError::Saturated`]
    Reject,
    /// Wait until the queue has room
    Block,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool saturated: all workers busy and queue full")]
    Saturated,

    #[error("worker pool is shut down")]
    Closed,

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Resident workers, kept alive until shutdown
    pub min_workers: usize,
    /// Ceiling on resident + overflow workers
    pub max_workers: usize,
    /// Jobs waiting for a worker
    pub queue_capacity: usize,
    /// How long an idle overflow worker lingers before exiting
    pub keep_alive: Duration,
    pub policy: Backpressure,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 5,
            max_workers: 50,
            queue_capacity: 1000,
            keep_alive: Duration::from_secs(60),
            policy: Backpressure::Reject,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_workers == 0 {
            return Err(PoolError::InvalidConfig("min_workers must be at least 1".into()));
        }
        if self.min_workers > self.max_workers {
            return Err(PoolError::InvalidConfig(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Outcome of [`WorkerPool::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Every worker finished within the grace period
    pub drained: bool,
    /// Workers still running when the grace period ran out and were signalled
    pub cancelled: usize,
    /// Workers that ignored cancellation and were aborted
    pub aborted: usize,
}

#[derive(Clone, Copy)]
enum WorkerKind {
    Resident,
    Overflow,
}

struct Shared {
    config: PoolConfig,
    rx: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    live: AtomicUsize,
    busy: AtomicUsize,
    queued: AtomicUsize,
}

/// Bounded worker pool
///
/// Jobs go to an idle worker when one exists, otherwise the pool grows up to
/// `max_workers`, otherwise they wait in the bounded queue. When the queue is
/// full the configured [`Backpressure`] policy applies.
pub struct WorkerPool {
    shared: Arc<Shared>,
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<JoinSet<()>>,
    cancel: ShutdownCoordinator,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let resident = config.min_workers;

        let pool = Self {
            shared: Arc::new(Shared {
                config,
                rx: tokio::sync::Mutex::new(rx),
                live: AtomicUsize::new(0),
                busy: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
            }),
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(JoinSet::new()),
            cancel: ShutdownCoordinator::new(),
        };

        for _ in 0..resident {
            pool.shared.live.fetch_add(1, Ordering::SeqCst);
            pool.spawn_worker(None, WorkerKind::Resident);
        }
        debug!(workers = resident, "Worker pool started");
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Signal observed by running jobs once the grace period has expired
    pub fn cancellation(&self) -> ShutdownListener {
        self.cancel.subscribe()
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.shared.busy.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Hand a job to the pool
    pub async fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.admit(Box::pin(job), None).await
    }

    /// Like [`WorkerPool::submit`], but a blocked admission gives up with
    /// [`PoolError::Closed`] once `stop` fires, dropping the job
    pub async fn submit_until<F>(
        &self,
        job: F,
        stop: &mut ShutdownListener,
    ) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.admit(Box::pin(job), Some(stop)).await
    }

    async fn admit(&self, job: Job, stop: Option<&mut ShutdownListener>) -> Result<(), PoolError> {
        let tx = self.sender()?;
        let shared = &self.shared;

        let claimed = shared.busy.load(Ordering::SeqCst) + shared.queued.load(Ordering::SeqCst);
        if claimed >= shared.live.load(Ordering::SeqCst) && self.try_grow() {
            shared.busy.fetch_add(1, Ordering::SeqCst);
            self.spawn_worker(Some(job), WorkerKind::Overflow);
            return Ok(());
        }

        shared.queued.fetch_add(1, Ordering::SeqCst);
        let result = match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => match shared.config.policy {
                Backpressure::Reject => Err(PoolError::Saturated),
                Backpressure::Block => match stop {
                    Some(stop) => tokio::select! {
                        sent = tx.send(job) => sent.map_err(|_| PoolError::Closed),
                        _ = stop.recv() => Err(PoolError::Closed),
                    },
                    None => tx.send(job).await.map_err(|_| PoolError::Closed),
                },
            },
            Err(TrySendError::Closed(_)) => Err(PoolError::Closed),
        };
        if result.is_err() {
            shared.queued.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    /// Stop taking jobs and wait for running ones
    ///
    /// Workers get `grace` to finish on their own. After that running jobs are
    /// sent the cancellation signal and get `force_window` to wind down before
    /// being aborted.
    pub async fn shutdown(&self, grace: Duration, force_window: Duration) -> DrainReport {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        let mut workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));

        info!(running = self.active(), "Draining worker pool");
        let drained = run_with_timeout(
            async {
                while workers.join_next().await.is_some() {}
            },
            grace,
        )
        .await;
        if drained {
            return DrainReport {
                drained: true,
                cancelled: 0,
                aborted: 0,
            };
        }

        let cancelled = self.active();
        warn!(running = cancelled, "Grace period expired, cancelling running jobs");
        self.cancel.shutdown();
        let finished = run_with_timeout(
            async {
                while workers.join_next().await.is_some() {}
            },
            force_window,
        )
        .await;

        let mut aborted = 0;
        if !finished {
            aborted = workers.len();
            warn!(workers = aborted, "Aborting workers that ignored cancellation");
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        DrainReport {
            drained: false,
            cancelled,
            aborted,
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Job>, PoolError> {
        self.tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(PoolError::Closed)
    }

    fn try_grow(&self) -> bool {
        let max = self.shared.config.max_workers;
        self.shared
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < max).then_some(live + 1)
            })
            .is_ok()
    }

    fn spawn_worker(&self, first: Option<Job>, kind: WorkerKind) {
        let shared = self.shared.clone();
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .spawn(worker_loop(shared, first, kind));
    }
}

async fn worker_loop(shared: Arc<Shared>, first: Option<Job>, kind: WorkerKind) {
    if let Some(job) = first {
        run_job(&shared, job).await;
    }

    loop {
        // An idle resident worker parks inside `recv` holding the receiver,
        // so the overflow keep-alive has to cover the lock wait too.
        let next = match kind {
            WorkerKind::Resident => shared.rx.lock().await.recv().await,
            WorkerKind::Overflow => {
                tokio::time::timeout(shared.config.keep_alive, async {
                    shared.rx.lock().await.recv().await
                })
                .await
                .unwrap_or(None)
            }
        };

        match next {
            Some(job) => {
                shared.busy.fetch_add(1, Ordering::SeqCst);
                shared.queued.fetch_sub(1, Ordering::SeqCst);
                run_job(&shared, job).await;
            }
            None => break,
        }
    }

    shared.live.fetch_sub(1, Ordering::SeqCst);
}

/// Runs one job whose `busy` slot has already been claimed
async fn run_job(shared: &Shared, job: Job) {
    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Worker job panicked: {}", message);
    }
    shared.busy.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::oneshot;

    fn config(min: usize, max: usize, queue: usize, policy: Backpressure) -> PoolConfig {
        PoolConfig {
            min_workers: min,
            max_workers: max,
            queue_capacity: queue,
            keep_alive: Duration::from_millis(50),
            policy,
        }
    }

    /// A job that reports when it starts and runs until released
    fn gated_job() -> (oneshot::Receiver<()>, oneshot::Sender<()>, impl Future<Output = ()>) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let job = async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        };
        (started_rx, release_tx, job)
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        assert!(config(0, 1, 1, Backpressure::Reject).validate().is_err());
        assert!(config(3, 2, 1, Backpressure::Reject).validate().is_err());
        assert!(config(1, 1, 0, Backpressure::Reject).validate().is_err());
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_resident_workers_spawned() {
        let pool = WorkerPool::new(config(3, 5, 4, Backpressure::Reject)).unwrap();
        assert_eq!(pool.live_workers(), 3);
    }

    #[tokio::test]
    async fn test_reject_when_saturated() {
        let pool = WorkerPool::new(config(1, 1, 1, Backpressure::Reject)).unwrap();

        let (started, release, job) = gated_job();
        pool.submit(job).await.unwrap();
        started.await.unwrap();

        // Fills the single queue slot.
        pool.submit(async {}).await.unwrap();
        assert_eq!(pool.queued(), 1);

        let err = pool.submit(async {}).await.unwrap_err();
        assert!(matches!(err, PoolError::Saturated));

        let _ = release.send(());
    }

    #[tokio::test]
    async fn test_block_waits_for_queue_space() {
        let pool = Arc::new(WorkerPool::new(config(1, 1, 1, Backpressure::Block)).unwrap());

        let (started, release, job) = gated_job();
        pool.submit(job).await.unwrap();
        started.await.unwrap();
        pool.submit(async {}).await.unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let pool_clone = pool.clone();
        let blocked = tokio::spawn(async move {
            pool_clone
                .submit(async move { ran_clone.store(true, Ordering::SeqCst) })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        let _ = release.send(());
        blocked.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_blocked_submit_gives_up_on_stop() {
        let pool = Arc::new(WorkerPool::new(config(1, 1, 1, Backpressure::Block)).unwrap());

        let (started, release, job) = gated_job();
        pool.submit(job).await.unwrap();
        started.await.unwrap();
        pool.submit(async {}).await.unwrap();

        let stop = ShutdownCoordinator::new();
        let mut listener = stop.subscribe();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let pool_clone = pool.clone();
        let blocked = tokio::spawn(async move {
            let job = async move { ran_clone.store(true, Ordering::SeqCst) };
            pool_clone.submit_until(job, &mut listener).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        stop.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("blocked submit ignored the stop signal")
            .unwrap();
        assert!(matches!(result, Err(PoolError::Closed)));
        assert_eq!(pool.queued(), 1);

        let _ = release.send(());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_grows_to_max_before_queueing() {
        let pool = WorkerPool::new(config(1, 3, 1, Backpressure::Reject)).unwrap();
        let mut releases = Vec::new();

        for _ in 0..3 {
            let (started, release, job) = gated_job();
            pool.submit(job).await.unwrap();
            started.await.unwrap();
            releases.push(release);
        }
        assert_eq!(pool.live_workers(), 3);
        assert_eq!(pool.active(), 3);
        assert_eq!(pool.queued(), 0);

        for release in releases {
            let _ = release.send(());
        }
    }

    #[tokio::test]
    async fn test_overflow_workers_expire() {
        let pool = WorkerPool::new(config(1, 2, 1, Backpressure::Reject)).unwrap();
        let (started, release, job) = gated_job();
        pool.submit(job).await.unwrap();
        started.await.unwrap();

        pool.submit(async {}).await.unwrap();
        assert_eq!(pool.live_workers(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.live_workers(), 1);
        let _ = release.send(());
    }

    #[tokio::test]
    async fn test_overflow_expires_while_resident_idles() {
        let pool = WorkerPool::new(config(1, 2, 1, Backpressure::Reject)).unwrap();

        let (started_resident, release_resident, job) = gated_job();
        pool.submit(job).await.unwrap();
        started_resident.await.unwrap();

        let (started_overflow, release_overflow, job) = gated_job();
        pool.submit(job).await.unwrap();
        started_overflow.await.unwrap();
        assert_eq!(pool.live_workers(), 2);

        // The resident worker goes back to waiting on the queue first.
        let _ = release_resident.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = release_overflow.send(());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.live_workers(), 1);
        assert_eq!(pool.active(), 0);

        // The resident worker still picks up new work.
        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(());
        })
        .await
        .unwrap();
        tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_panicking_job_keeps_worker() {
        let pool = WorkerPool::new(config(1, 1, 4, Backpressure::Reject)).unwrap();
        pool.submit(async {
            let fail = true;
            if fail {
                panic!("boom");
            }
        })
        .await
        .unwrap();

        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(());
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert_eq!(pool.live_workers(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_within_grace() {
        let pool = WorkerPool::new(config(2, 2, 4, Backpressure::Reject)).unwrap();
        pool.submit(tokio::time::sleep(Duration::from_millis(20))).await.unwrap();

        let report = pool
            .shutdown(Duration::from_secs(1), Duration::from_millis(10))
            .await;
        assert!(report.drained);
        assert!(matches!(pool.submit(async {}).await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_then_aborts() {
        let pool = WorkerPool::new(config(2, 2, 4, Backpressure::Reject)).unwrap();

        // Honours cancellation.
        let mut cancel = pool.cancellation();
        pool.submit(async move { cancel.recv().await }).await.unwrap();

        // Ignores it.
        let (started, _release, job) = gated_job();
        pool.submit(job).await.unwrap();
        started.await.unwrap();

        let report = pool
            .shutdown(Duration::from_millis(20), Duration::from_millis(20))
            .await;
        assert!(!report.drained);
        assert_eq!(report.cancelled, 2);
        assert_eq!(report.aborted, 1);
    }
}
