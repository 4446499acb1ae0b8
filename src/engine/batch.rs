use std::collections::VecDeque;
use std::time::Instant;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tracing::{debug, info, warn};

use super::{checkout, with_deadline, MailEngine};
use crate::errors::{AppError, AppResult};
use crate::mime::parse_summary;
use crate::session::WorkerSession;
use crate::types::{ListQuery, MessageSummary, SummaryPage, Uid};

/// What one worker produced for one batch. `error` is set when a
/// session-level failure cut the batch short; `summaries` then holds what was
/// fetched before it.
struct BatchOutcome {
    summaries: Vec<MessageSummary>,
    error: Option<AppError>,
}

impl MailEngine {
    /// Search, then fetch summaries for the most recent matches.
    pub async fn list_summaries(&self, query: &ListQuery) -> AppResult<SummaryPage> {
        let started = Instant::now();
        let limit = self.settings.effective_limit(query.limit);

        let uids = self.resolve(query.since, limit).await?;
        if uids.is_empty() {
            return Ok(SummaryPage::default());
        }

        let page = self.fetch_summaries(&uids, query.keyword.as_deref()).await?;
        info!(
            requested = uids.len(),
            returned = page.messages.len(),
            partial = page.partial,
            failed_batches = page.failed_batches,
            elapsed_ms = ?started.elapsed().as_millis(),
            "Listed message summaries"
        );
        Ok(page)
    }

    /// Fetches (or serves from cache) a summary for every id and returns the
    /// ones whose subject contains `keyword`, case-insensitively.
    ///
    /// Batches run concurrently on the worker pool. Within a batch the last
    /// id processed comes first in the output; batches are merged in
    /// completion order, so the result is only approximately newest first.
    pub async fn fetch_summaries(
        &self,
        ids: &[Uid],
        keyword: Option<&str>,
    ) -> AppResult<SummaryPage> {
        if ids.is_empty() {
            return Ok(SummaryPage::default());
        }

        let needle = keyword.map(str::to_lowercase);
        let batches: Vec<Vec<Uid>> = ids
            .chunks(self.settings.batch_size.max(1))
            .map(<[Uid]>::to_vec)
            .collect();
        let total = batches.len();

        let mut pending: FuturesUnordered<_> = batches
            .into_iter()
            .enumerate()
            .map(|(index, batch)| {
                let engine = self.clone();
                let pool = self.pool.clone();
                async move {
                    pool.run(move |worker| {
                        async move { engine.process_batch(worker, index, batch).await }.boxed()
                    })
                    .await
                }
            })
            .collect();

        let deadline = self
            .settings
            .request_timeout
            .map(|limit| tokio::time::Instant::now() + limit);

        let mut merged = VecDeque::new();
        let mut completed = 0;
        let mut failed = 0;
        let mut first_error = None;

        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            unfinished = total - completed,
                            "Request deadline passed; returning completed batches"
                        );
                        break;
                    }
                },
                None => pending.next().await,
            };
            let Some(result) = next else {
                break;
            };
            completed += 1;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => BatchOutcome {
                    summaries: Vec::new(),
                    error: Some(e),
                },
            };

            // Filtering happens only here so every fetched summary is cached
            // regardless of the keyword.
            for summary in outcome.summaries {
                if matches_keyword(&summary, needle.as_deref()) {
                    merged.push_front(summary);
                }
            }
            if let Some(e) = outcome.error {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        failed += total - completed;
        if failed == total {
            return Err(first_error.unwrap_or_else(|| {
                AppError::Timeout("no batch finished before the request deadline".into())
            }));
        }

        Ok(SummaryPage {
            messages: merged.into(),
            partial: failed > 0,
            failed_batches: failed,
        })
    }

    async fn process_batch(
        &self,
        worker: &mut WorkerSession,
        index: usize,
        batch: Vec<Uid>,
    ) -> BatchOutcome {
        let started = Instant::now();
        let mut summaries = Vec::with_capacity(batch.len());
        let mut cache_hits = 0;
        let mut skipped = 0;

        for uid in batch.iter().copied() {
            if let Some(cached) = self.cache.summaries().get(uid) {
                cache_hits += 1;
                summaries.push(cached);
                continue;
            }

            let session = match checkout(worker, &self.cache).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(worker = worker.worker_id(), batch = index, error = %e, "No session for batch");
                    return BatchOutcome {
                        summaries,
                        error: Some(e),
                    };
                }
            };
            let fetched = with_deadline(
                self.settings.command_timeout,
                "UID FETCH RFC822.HEADER",
                session.fetch_header(uid),
            )
            .await;

            match fetched {
                Ok(Some(header)) => match parse_summary(uid, &header, &self.classifier) {
                    Ok(summary) => {
                        self.cache.summaries().insert(uid, summary.clone());
                        summaries.push(summary);
                    }
                    Err(e) => {
                        skipped += 1;
                        warn!(uid, error = %e, "Skipping unparsable message header");
                    }
                },
                Ok(None) => {
                    skipped += 1;
                    debug!(uid, "Server returned no header; message likely expunged");
                }
                Err(e) if e.is_session_fatal() => {
                    worker.invalidate();
                    warn!(
                        worker = worker.worker_id(),
                        batch = index,
                        uid,
                        fetched = summaries.len(),
                        error = %e,
                        "Session failed mid-batch; abandoning rest of batch"
                    );
                    return BatchOutcome {
                        summaries,
                        error: Some(e),
                    };
                }
                Err(e) => {
                    skipped += 1;
                    warn!(uid, error = %e, "Skipping message the server refused to fetch");
                }
            }
        }

        debug!(
            worker = worker.worker_id(),
            batch = index,
            count = batch.len(),
            cache_hits,
            skipped,
            elapsed_ms = ?started.elapsed().as_millis(),
            "Batch processed"
        );

        BatchOutcome {
            summaries,
            error: None,
        }
    }
}

fn matches_keyword(summary: &MessageSummary, needle: Option<&str>) -> bool {
    match needle {
        Some(needle) => summary.subject.to_lowercase().contains(needle),
        None => true,
    }
}
