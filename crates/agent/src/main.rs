//! mailvault-agent
//!
//! Edge capture agent: accepts journaled mail over SMTP, deduplicates
//! attachments into a local CAS buffer, encrypts envelopes with per-message
//! keys, and drains the buffer to the core over the two-phase sync protocol.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;

mod allowlist;
mod buffer;
mod extract;
mod pipeline;
mod smtp;
mod sync;

use allowlist::IpAllowlist;
use buffer::Buffer;
use extract::PlainTextExtractor;
use pipeline::CapturePipeline;
use sync::SyncClient;

#[derive(Debug, Error)]
enum AgentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("buffer error: {0}")]
    Buffer(#[from] buffer::BufferError),
    #[error("sync error: {0}")]
    Sync(#[from] sync::SyncError),
}

#[derive(Parser)]
#[command(name = "mailvault-agent", version, about = "MailVault edge capture agent")]
struct Args {
    /// SMTP listen port.
    #[arg(long, env = "SMTP_PORT", default_value_t = 2525)]
    port: u16,

    /// Bind address for the SMTP listener.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Directory for the durable buffer (sqlite + payloads).
    #[arg(long, env = "AGENT_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Core base URL, e.g. https://core.internal:8000
    #[arg(long, env = "CORE_API_URL", default_value = "http://127.0.0.1:8000")]
    core_url: String,

    /// Shared write credential for the core sync endpoints.
    #[arg(long, env = "CORE_API_KEY", default_value = "secret")]
    api_key: String,

    /// Comma-separated allowed peer IPs / IPv4 CIDRs. Empty allows all.
    #[arg(long, env = "ALLOWED_SMTP_IPS", default_value = "")]
    allowed_ips: String,

    /// Outbound HTTP timeout in seconds.
    #[arg(long, default_value_t = 30)]
    http_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let buffer = Buffer::open(&args.data_dir)?;
    let pipeline = Arc::new(CapturePipeline::new(buffer.clone(), Arc::new(PlainTextExtractor)));
    let allowlist = IpAllowlist::parse(&args.allowed_ips);
    let client = SyncClient::new(
        args.core_url.clone(),
        args.api_key.clone(),
        Duration::from_secs(args.http_timeout),
    )?;

    let listener = TcpListener::bind((args.bind.as_str(), args.port)).await?;
    tracing::info!(port = args.port, core = %args.core_url, "mailvault agent starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let smtp_task = tokio::spawn(smtp::serve(listener, pipeline, allowlist, shutdown_rx.clone()));
    let sync_task = tokio::spawn(sync::run_sync_loop(buffer, client, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = smtp_task.await;
    let _ = sync_task.await;
    Ok(())
}
