use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cache::CacheLayer;
use crate::cli::Cli;
use crate::config::AppConfig;
use crate::engine::MailEngine;
use crate::http;
use crate::imap::ImapConnector;
use crate::session::SessionPool;
use crate::types::ListQuery;

pub const DEFAULT_LOG_FILTER: &str = "maildesk=info,tower_http=info";

/// `RUST_LOG` directives when set and valid, otherwise [`DEFAULT_LOG_FILTER`].
pub fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load().context("loading configuration")?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(workers) = cli.workers.filter(|w| *w > 0) {
        config.pool.workers = workers;
    }
    info!(
        host = %config.imap.host,
        folder = %config.imap.folder,
        workers = config.pool.workers,
        batch_size = config.engine.batch_size,
        cache_ttl_secs = config.cache.ttl.as_secs(),
        "Configuration loaded"
    );

    let engine = build_engine(&config)?;
    let sweeper = spawn_cache_sweeper(Arc::clone(engine.cache()), config.cache.ttl);

    if cli.warm {
        let query = ListQuery::since(engine.settings().default_since());
        match engine.list_summaries(&query).await {
            Ok(page) => info!(messages = page.messages.len(), partial = page.partial, "Cache warmed"),
            Err(e) => warn!(error = %e, "Cache warm-up failed"),
        }
    }

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(addr = %config.listen, "Serving HTTP");

    axum::serve(listener, http::router(engine.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    sweeper.abort();
    engine.shutdown().await;
    Ok(())
}

pub fn build_engine(config: &AppConfig) -> Result<MailEngine> {
    let connector = ImapConnector::new(config.imap.clone()).context("preparing TLS for IMAP")?;
    let pool = SessionPool::new(Arc::new(connector), config.pool.clone());
    let cache = CacheLayer::with_system_clock(
        config.cache.ttl,
        config.cache.summary_capacity,
        config.cache.detail_capacity,
    );
    let classifier = config.classifier.build().context("building classifier")?;

    Ok(MailEngine::new(
        Arc::new(pool),
        Arc::new(cache),
        Arc::new(classifier),
        config.engine.clone(),
    ))
}

fn spawn_cache_sweeper(
    cache: Arc<CacheLayer>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cache.purge_expired();
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
