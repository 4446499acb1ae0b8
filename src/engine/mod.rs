//! Cached, concurrent mailbox fetch engine.
//!
//! [`MailEngine`] ties together the worker pool, the caches and the
//! classifier. All three are injected so tests can swap in fake sessions and
//! a manual clock.
mod batch;
mod detail;
mod planner;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tracing::debug;

use crate::cache::{CacheLayer, UidValidityCheck};
use crate::classify::Classifier;
use crate::errors::{AppError, AppResult};
use crate::imap::MailboxSession;
use crate::session::{SessionPool, WorkerSession};

pub use detail::parse_uid;
pub use planner::select_recent;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Ids per batch handed to one worker.
    pub batch_size: usize,
    /// Deadline for every single IMAP command.
    pub command_timeout: Duration,
    /// Deadline for a whole list request; batches still running when it
    /// passes are reported as failed.
    pub request_timeout: Option<Duration>,
    pub lookback_days: u32,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            command_timeout: Duration::from_secs(30),
            request_timeout: Some(Duration::from_secs(60)),
            lookback_days: 40,
            default_limit: 50,
            max_limit: 500,
        }
    }
}

impl EngineSettings {
    /// Missing or zero means the default limit; anything above the maximum
    /// is clamped.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|limit| *limit > 0)
            .unwrap_or(self.default_limit)
            .min(self.max_limit)
            .max(1)
    }

    pub fn default_since(&self) -> NaiveDate {
        let today = Local::now().date_naive();
        today - chrono::Duration::days(i64::from(self.lookback_days))
    }
}

#[derive(Clone)]
pub struct MailEngine {
    pool: Arc<SessionPool>,
    cache: Arc<CacheLayer>,
    classifier: Arc<Classifier>,
    settings: EngineSettings,
}

impl MailEngine {
    pub fn new(
        pool: Arc<SessionPool>,
        cache: Arc<CacheLayer>,
        classifier: Arc<Classifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            cache,
            classifier,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

/// Borrows the worker's session, connecting if needed, after checking its
/// UIDVALIDITY against the caches.
///
/// A session selected before the folder's UIDVALIDITY moved on is dropped
/// and replaced once. A freshly selected session still reporting an older
/// value is refused so it cannot write UIDs from the old numbering.
async fn checkout<'w>(
    worker: &'w mut WorkerSession,
    cache: &CacheLayer,
) -> AppResult<&'w mut Box<dyn MailboxSession>> {
    let mut fresh = !worker.is_connected();
    loop {
        let reported = worker.acquire().await?.uid_validity();
        let check = reported.map(|value| cache.reconcile_uid_validity(value, fresh));
        if check != Some(UidValidityCheck::Stale) {
            return worker.acquire().await;
        }

        worker.invalidate();
        if fresh {
            return Err(AppError::Connection(format!(
                "server reported outdated UIDVALIDITY {reported:?}"
            )));
        }
        debug!(worker = worker.worker_id(), "Reselecting folder after UIDVALIDITY mismatch");
        fresh = true;
    }
}

async fn with_deadline<T, F>(limit: Duration, command: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(AppError::Timeout(format!("{command} after {limit:?}"))))
}
