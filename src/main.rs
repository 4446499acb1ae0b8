use anyhow::Result;
use clap::Parser;
use maildesk::app;
use maildesk::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // IMAP credentials usually come from a local .env
    dotenvy::dotenv().ok();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(app::log_filter(std::env::var("RUST_LOG").ok()))
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    app::run(Cli::parse()).await
}
