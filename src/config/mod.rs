use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::classify::{Classifier, SkuPattern, DEFAULT_URGENCY_TERMS};
use crate::engine::EngineSettings;
use crate::errors::{AppError, AppResult};
use crate::session::PoolSettings;

/// Where and how to reach the mailbox.
#[derive(Clone)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub folder: String,
    /// Deadline for connect, TLS handshake, LOGIN and SELECT together.
    pub timeout: Duration,
}

impl fmt::Debug for ImapSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("folder", &self.folder)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub summary_capacity: usize,
    pub detail_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub urgency_terms: Vec<String>,
    pub sku_pattern: SkuPattern,
}

impl ClassifierSettings {
    pub fn build(&self) -> AppResult<Classifier> {
        Classifier::new(&self.urgency_terms, &self.sku_pattern)
    }
}

/// Everything the process reads from its environment. Loaded once at
/// startup; any error here stops the process before it serves a request.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub imap: ImapSettings,
    pub pool: PoolSettings,
    pub engine: EngineSettings,
    pub cache: CacheSettings,
    pub classifier: ClassifierSettings,
    pub listen: SocketAddr,
}

impl AppConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let command_timeout = Duration::from_secs(vars.positive("MAILDESK_IMAP_TIMEOUT_SECS", 30)?);
        let imap = ImapSettings {
            host: vars.required("IMAP_SERVER")?,
            port: vars.parsed("IMAP_PORT", 993)?,
            username: vars.required("EMAIL_USER")?,
            password: vars.required("EMAIL_PASS")?,
            folder: vars.get("EMAIL_FOLDER").unwrap_or_else(|| "INBOX".to_string()),
            timeout: command_timeout,
        };

        let pool = PoolSettings {
            workers: vars.positive("MAILDESK_WORKERS", 4)?,
            connect_attempts: vars.positive("MAILDESK_CONNECT_ATTEMPTS", 3)?,
            backoff: Duration::from_millis(250),
        };

        let request_timeout = match vars.parsed::<u64>("MAILDESK_REQUEST_TIMEOUT_SECS", 60)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let engine = EngineSettings {
            batch_size: vars.positive("MAILDESK_BATCH_SIZE", 10)?,
            command_timeout,
            request_timeout,
            lookback_days: vars.parsed("MAILDESK_LOOKBACK_DAYS", 40)?,
            default_limit: vars.positive("MAILDESK_DEFAULT_LIMIT", 50)?,
            max_limit: vars.positive("MAILDESK_MAX_LIMIT", 500)?,
        };
        if engine.default_limit > engine.max_limit {
            return Err(AppError::Config(format!(
                "MAILDESK_DEFAULT_LIMIT ({}) exceeds MAILDESK_MAX_LIMIT ({})",
                engine.default_limit, engine.max_limit
            )));
        }

        let cache = CacheSettings {
            ttl: Duration::from_secs(vars.positive("MAILDESK_CACHE_TTL_SECS", 300)?),
            summary_capacity: vars.positive("MAILDESK_SUMMARY_CACHE_CAPACITY", 5000)?,
            detail_capacity: vars.positive("MAILDESK_DETAIL_CACHE_CAPACITY", 500)?,
        };
        if cache.summary_capacity <= cache.detail_capacity {
            return Err(AppError::Config(format!(
                "MAILDESK_SUMMARY_CACHE_CAPACITY ({}) must exceed MAILDESK_DETAIL_CACHE_CAPACITY ({})",
                cache.summary_capacity, cache.detail_capacity
            )));
        }

        let urgency_terms = match vars.get("MAILDESK_URGENCY_TERMS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_URGENCY_TERMS.iter().map(|t| t.to_string()).collect(),
        };
        let classifier = ClassifierSettings {
            urgency_terms,
            sku_pattern: vars
                .get("MAILDESK_SKU_PATTERN")
                .map(|raw| SkuPattern::parse(&raw))
                .unwrap_or_default(),
        };
        // Reject a bad SKU regex now rather than on the first request.
        classifier.build()?;

        let listen = vars.parsed(
            "MAILDESK_LISTEN",
            SocketAddr::from(([0, 0, 0, 0], 8000)),
        )?;

        Ok(Self {
            imap,
            pool,
            engine,
            cache,
            classifier,
            listen,
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> AppResult<String> {
        self.get(key)
            .ok_or_else(|| AppError::Config(format!("{key} is not set")))
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> AppResult<T> {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> AppResult<T>
    where
        T: FromStr + PartialOrd + Default,
    {
        let value = self.parsed(key, default)?;
        if value <= T::default() {
            return Err(AppError::Config(format!("{key} must be greater than zero")));
        }
        Ok(value)
    }
}
