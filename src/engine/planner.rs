use chrono::NaiveDate;
use futures::FutureExt;
use tracing::{info, warn};

use super::{checkout, with_deadline, MailEngine};
use crate::errors::{AppError, AppResult};
use crate::imap::imap_date;
use crate::session::WorkerSession;
use crate::types::Uid;

impl MailEngine {
    /// Ids of the (at most) `limit` most recent messages dated on or after
    /// `since`, in ascending UID order.
    ///
    /// No matches and a search the server refuses both give an empty list;
    /// only a broken connection or failed login is an error.
    pub async fn resolve(&self, since: NaiveDate, limit: usize) -> AppResult<Vec<Uid>> {
        let engine = self.clone();
        let searched = self
            .pool
            .run(move |worker| async move { engine.search_since(worker, since).await }.boxed())
            .await?;

        match searched {
            Ok(uids) => {
                let total = uids.len();
                let selected = select_recent(uids, limit);
                info!(
                    since = %imap_date(since),
                    matches = total,
                    selected = selected.len(),
                    "Mailbox search resolved"
                );
                Ok(selected)
            }
            Err(AppError::Protocol(msg)) => {
                warn!(since = %imap_date(since), error = %msg, "Search rejected by server; treating as empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn search_since(&self, worker: &mut WorkerSession, since: NaiveDate) -> AppResult<Vec<Uid>> {
        let session = checkout(worker, &self.cache).await?;
        let result = with_deadline(
            self.settings.command_timeout,
            "UID SEARCH",
            session.search_since(since),
        )
        .await;

        if let Err(e) = &result {
            if e.is_session_fatal() {
                worker.invalidate();
            }
        }
        result
    }
}

/// Keeps the last `limit` ids in ascending order. The server assigns UIDs in
/// arrival order, so these approximate the most recent messages.
pub fn select_recent(mut uids: Vec<Uid>, limit: usize) -> Vec<Uid> {
    uids.sort_unstable();
    uids.dedup();
    let skip = uids.len().saturating_sub(limit);
    uids.split_off(skip)
}
