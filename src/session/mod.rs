//! Fixed pool of worker tasks, each owning at most one mailbox session.
//!
//! Jobs are closures queued on a shared channel. Whichever idle worker takes
//! a job runs it with `&mut` access to its own [`WorkerSession`], so a
//! session is only ever driven by the task that created it.
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::imap::{MailboxSession, SessionFactory};

type Task = Box<dyn for<'a> FnOnce(&'a mut WorkerSession) -> BoxFuture<'a, ()> + Send>;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers: usize,
    /// Connection attempts per acquire, including the first.
    pub connect_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub backoff: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            connect_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// The session slot owned by one worker task.
pub struct WorkerSession {
    worker_id: usize,
    factory: Arc<dyn SessionFactory>,
    settings: PoolSettings,
    session: Option<Box<dyn MailboxSession>>,
}

impl WorkerSession {
    fn new(worker_id: usize, factory: Arc<dyn SessionFactory>, settings: PoolSettings) -> Self {
        Self {
            worker_id,
            factory,
            settings,
            session: None,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Returns this worker's session, connecting first if there is none.
    pub async fn acquire(&mut self) -> AppResult<&mut Box<dyn MailboxSession>> {
        if self.session.is_none() {
            let session = self.connect_with_retry().await?;
            self.session = Some(session);
        }

        self.session
            .as_mut()
            .ok_or_else(|| AppError::Unexpected("session slot empty after connect".into()))
    }

    /// Drops the session after a fatal error; the next acquire reconnects.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            debug!(worker = self.worker_id, "Dropped IMAP session");
        }
    }

    async fn connect_with_retry(&mut self) -> AppResult<Box<dyn MailboxSession>> {
        let attempts = self.settings.connect_attempts.max(1);
        let mut delay = self.settings.backoff;

        for attempt in 1..=attempts {
            let started = Instant::now();
            match self.factory.connect().await {
                Ok(session) => {
                    debug!(
                        worker = self.worker_id,
                        attempt,
                        elapsed_ms = ?started.elapsed().as_millis(),
                        "IMAP session created"
                    );
                    return Ok(session);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        worker = self.worker_id,
                        attempt,
                        retry_in_ms = ?delay.as_millis(),
                        error = %e,
                        "IMAP connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    warn!(worker = self.worker_id, attempt, error = %e, "IMAP connect failed");
                    return Err(e);
                }
            }
        }

        Err(AppError::Connection("no connection attempts made".into()))
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout().await {
                debug!(worker = self.worker_id, error = %e, "LOGOUT failed");
            }
        }
    }
}

pub struct SessionPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionPool {
    /// Spawns the worker tasks; must be called inside a tokio runtime.
    /// Sessions are not opened until a job needs one.
    pub fn new(factory: Arc<dyn SessionFactory>, settings: PoolSettings) -> Self {
        let size = settings.workers.max(1);
        let (tx, rx) = mpsc::channel::<Task>(size * 4);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|worker_id| {
                let worker = WorkerSession::new(worker_id, Arc::clone(&factory), settings.clone());
                tokio::spawn(worker_loop(worker, Arc::clone(&rx)))
            })
            .collect();

        info!(workers = size, "Worker pool started");

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Runs `job` on the next free worker and waits for its result.
    pub async fn run<R, F>(&self, job: F) -> AppResult<R>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(&'a mut WorkerSession) -> BoxFuture<'a, R> + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or_else(|| AppError::Unexpected("worker pool is shut down".into()))?;

        let (tx, rx) = oneshot::channel();
        let task = into_task(move |worker| {
            async move {
                let out = job(worker).await;
                let _ = tx.send(out);
            }
            .boxed()
        });

        sender
            .send(task)
            .await
            .map_err(|_| AppError::Unexpected("worker pool is shut down".into()))?;

        rx.await
            .map_err(|_| AppError::Unexpected("worker dropped the job".into()))
    }

    /// Stops accepting jobs, lets queued jobs finish, then logs every
    /// session out.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().await.take());

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task panicked during shutdown");
            }
        }
        info!("Worker pool stopped");
    }
}

fn into_task<F>(f: F) -> Task
where
    F: for<'a> FnOnce(&'a mut WorkerSession) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

async fn worker_loop(mut worker: WorkerSession, queue: Arc<Mutex<mpsc::Receiver<Task>>>) {
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(task) = next else {
            break;
        };

        if AssertUnwindSafe(task(&mut worker)).catch_unwind().await.is_err() {
            warn!(worker = worker.worker_id, "Job panicked; resetting session");
            worker.invalidate();
        }
    }

    worker.close().await;
    debug!(worker = worker.worker_id, "Worker exited");
}
