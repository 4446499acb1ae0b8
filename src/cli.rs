use std::net::SocketAddr;

use clap::Parser;

/// Command-line options for maildesk.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Address to serve HTTP on (overrides MAILDESK_LISTEN).
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Worker pool size (overrides MAILDESK_WORKERS).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Fetch the default listing once at startup so the first request is
    /// served from cache.
    #[arg(long)]
    pub warm: bool,
}
