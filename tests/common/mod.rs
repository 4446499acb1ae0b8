#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;

use maildesk::cache::{CacheLayer, Clock, SystemClock};
use maildesk::classify::Classifier;
use maildesk::engine::{EngineSettings, MailEngine};
use maildesk::errors::{AppError, AppResult};
use maildesk::imap::{MailboxSession, SessionFactory};
use maildesk::session::{PoolSettings, SessionPool};
use maildesk::types::Uid;

/// In-memory stand-in for an IMAP server. Every session it hands out reads
/// the same shared state, so tests can change the mailbox between calls.
#[derive(Default)]
pub struct FakeServer {
    messages: Mutex<BTreeMap<Uid, Vec<u8>>>,
    listed_only: Mutex<HashSet<Uid>>,
    failing_uids: Mutex<HashSet<Uid>>,
    slow_uids: Mutex<HashMap<Uid, Duration>>,
    connect_error: Mutex<Option<AppError>>,
    search_error: Mutex<Option<AppError>>,
    uid_validity: AtomicU32,
    queued_uid_validity: Mutex<VecDeque<u32>>,
    searched_since: Mutex<Vec<NaiveDate>>,
    pub connect_attempts: AtomicUsize,
    pub searches: AtomicUsize,
    pub header_fetches: AtomicUsize,
    pub message_fetches: AtomicUsize,
    pub logouts: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        let server = Self::default();
        server.uid_validity.store(1, Ordering::SeqCst);
        Arc::new(server)
    }

    pub fn add(&self, uid: Uid, raw: Vec<u8>) {
        self.messages.lock().unwrap().insert(uid, raw);
    }

    pub fn add_subject(&self, uid: Uid, subject: &str) {
        self.add(uid, message(subject, "Body text."));
    }

    /// Appears in search results but returns nothing when fetched, like a
    /// message expunged between SEARCH and FETCH.
    pub fn add_vanished(&self, uid: Uid) {
        self.listed_only.lock().unwrap().insert(uid);
    }

    pub fn fail_uid(&self, uid: Uid) {
        self.failing_uids.lock().unwrap().insert(uid);
    }

    pub fn slow_uid(&self, uid: Uid, delay: Duration) {
        self.slow_uids.lock().unwrap().insert(uid, delay);
    }

    pub fn refuse_connections(&self, error: AppError) {
        *self.connect_error.lock().unwrap() = Some(error);
    }

    pub fn fail_search(&self, error: AppError) {
        *self.search_error.lock().unwrap() = Some(error);
    }

    /// Sessions opened from now on report `value` when they select the
    /// folder. Sessions already open keep the value they selected with.
    pub fn set_uid_validity(&self, value: u32) {
        self.uid_validity.store(value, Ordering::SeqCst);
    }

    /// The next connection reports `value` instead of the current one.
    pub fn queue_uid_validity(&self, value: u32) {
        self.queued_uid_validity.lock().unwrap().push_back(value);
    }

    /// Cutoff dates of every search, in order.
    pub fn searched_since(&self) -> Vec<NaiveDate> {
        self.searched_since.lock().unwrap().clone()
    }

    pub fn network_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
            + self.header_fetches.load(Ordering::SeqCst)
            + self.message_fetches.load(Ordering::SeqCst)
    }

    async fn lookup(&self, uid: Uid) -> AppResult<Option<Vec<u8>>> {
        let delay = self.slow_uids.lock().unwrap().get(&uid).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_uids.lock().unwrap().contains(&uid) {
            return Err(AppError::Connection(format!("connection reset while fetching {uid}")));
        }
        Ok(self.messages.lock().unwrap().get(&uid).cloned())
    }
}

pub struct FakeFactory(pub Arc<FakeServer>);

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn connect(&self) -> AppResult<Box<dyn MailboxSession>> {
        self.0.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.0.connect_error.lock().unwrap().clone() {
            return Err(error);
        }
        let queued = self.0.queued_uid_validity.lock().unwrap().pop_front();
        let uid_validity = queued.unwrap_or_else(|| self.0.uid_validity.load(Ordering::SeqCst));
        Ok(Box::new(FakeSession {
            server: Arc::clone(&self.0),
            uid_validity,
        }))
    }
}

struct FakeSession {
    server: Arc<FakeServer>,
    uid_validity: u32,
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn search_since(&mut self, since: NaiveDate) -> AppResult<Vec<Uid>> {
        self.server.searches.fetch_add(1, Ordering::SeqCst);
        self.server.searched_since.lock().unwrap().push(since);
        if let Some(error) = self.server.search_error.lock().unwrap().clone() {
            return Err(error);
        }
        let mut uids: Vec<Uid> = self.server.messages.lock().unwrap().keys().copied().collect();
        uids.extend(self.server.listed_only.lock().unwrap().iter().copied());
        Ok(uids)
    }

    async fn fetch_header(&mut self, uid: Uid) -> AppResult<Option<Vec<u8>>> {
        self.server.header_fetches.fetch_add(1, Ordering::SeqCst);
        let raw = self.server.lookup(uid).await?;
        Ok(raw.map(|raw| header_part(&raw)))
    }

    async fn fetch_message(&mut self, uid: Uid) -> AppResult<Option<Vec<u8>>> {
        self.server.message_fetches.fetch_add(1, Ordering::SeqCst);
        self.server.lookup(uid).await
    }

    fn uid_validity(&self) -> Option<u32> {
        Some(self.uid_validity)
    }

    async fn logout(&mut self) -> AppResult<()> {
        self.server.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn header_part(raw: &[u8]) -> Vec<u8> {
    match raw.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => raw[..end + 4].to_vec(),
        None => raw.to_vec(),
    }
}

pub fn message(subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: Supplier <orders@supplier.example>\r\n\
         To: desk@shop.example\r\n\
         Date: Tue, 4 Feb 2025 09:30:00 +0000\r\n\
         Subject: {subject}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    )
    .into_bytes()
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        batch_size: 10,
        command_timeout: Duration::from_secs(5),
        request_timeout: None,
        lookback_days: 40,
        default_limit: 50,
        max_limit: 500,
    }
}

pub fn pool_settings(workers: usize) -> PoolSettings {
    PoolSettings {
        workers,
        connect_attempts: 1,
        backoff: Duration::from_millis(1),
    }
}

pub struct Harness {
    pub server: Arc<FakeServer>,
    pub engine: MailEngine,
    pub clock: Arc<ManualClock>,
}

pub const TTL: Duration = Duration::from_secs(300);

pub fn harness(settings: EngineSettings, workers: usize) -> Harness {
    harness_with_pool(settings, pool_settings(workers))
}

pub fn harness_with_pool(settings: EngineSettings, pool: PoolSettings) -> Harness {
    let server = FakeServer::new();
    let clock = Arc::new(ManualClock::new());
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let cache = CacheLayer::new(TTL, 100, 10, clock_dyn);
    let pool = SessionPool::new(Arc::new(FakeFactory(Arc::clone(&server))), pool);
    let engine = MailEngine::new(
        Arc::new(pool),
        Arc::new(cache),
        Arc::new(Classifier::default()),
        settings,
    );

    Harness {
        server,
        engine,
        clock,
    }
}

pub fn system_cache() -> CacheLayer {
    CacheLayer::new(TTL, 100, 10, Arc::new(SystemClock))
}

pub fn since() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

pub fn ids(page: &[maildesk::types::MessageSummary]) -> Vec<String> {
    page.iter().map(|s| s.id.clone()).collect()
}
