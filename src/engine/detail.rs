use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, info};

use super::{checkout, with_deadline, MailEngine};
use crate::errors::{AppError, AppResult};
use crate::mime::parse_detail;
use crate::session::WorkerSession;
use crate::types::{MessageDetail, Uid};

impl MailEngine {
    /// Full message by id, from the detail cache when fresh.
    pub async fn fetch_detail(&self, id: &str) -> AppResult<MessageDetail> {
        let uid = parse_uid(id)?;
        if let Some(cached) = self.cache.details().get(uid) {
            debug!(uid, "Detail cache hit");
            return Ok(cached);
        }

        let started = Instant::now();
        let engine = self.clone();
        let raw = self
            .pool
            .run(move |worker| async move { engine.fetch_raw(worker, uid).await }.boxed())
            .await??
            .ok_or_else(|| AppError::NotFound(format!("message {uid}")))?;
        let size = raw.len();

        // MIME decoding is CPU-bound; keep it off the async workers.
        let detail = tokio::task::spawn_blocking(move || parse_detail(uid, &raw))
            .await
            .map_err(|e| AppError::Unexpected(format!("parse task panicked: {e}")))??;

        self.cache.details().insert(uid, detail.clone());
        info!(
            uid,
            size_bytes = size,
            elapsed_ms = ?started.elapsed().as_millis(),
            "Fetched message detail"
        );
        Ok(detail)
    }

    async fn fetch_raw(&self, worker: &mut WorkerSession, uid: Uid) -> AppResult<Option<Vec<u8>>> {
        let session = checkout(worker, &self.cache).await?;
        let result = with_deadline(
            self.settings.command_timeout,
            "UID FETCH RFC822",
            session.fetch_message(uid),
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

/// Message ids are decimal, non-zero UIDs; anything else names no message.
pub fn parse_uid(id: &str) -> AppResult<Uid> {
    id.trim()
        .parse::<Uid>()
        .ok()
        .filter(|uid| *uid > 0)
        .ok_or_else(|| AppError::NotFound(format!("message {id}")))
}
