//! Filestream agent daemon.
//!
//! Connects to the coordinating server over QUIC, pushes manifests of the
//! job directory and serves the file ranges the server asks for.
//!
//! Usage:
//!   filestream-agent --peer 192.168.1.2:5000 --cert /tmp/filestream-server.der \
//!       --job-id job-42 --job-dir /var/jobs/42

use std::sync::Arc;

// ---

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---

use filestream_agent::{
    // ---
    Config,
    DirectoryManifestService,
    FileStreamDeps,
    FileStreamService,
    JsonManifestCodec,
    TokioScheduler,
};
use filestream_domain::FileStreamTransport;
use filestream_quic::{PinnedCert, QuicTransport};

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    let cfg = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "filestream-agent starting");

    let file_stream = cfg.file_stream();
    file_stream.validate()?;

    let pinned = PinnedCert::from_der_file(&cfg.cert, cfg.server_name.clone())?;

    info!("connecting to peer {}", cfg.peer);
    let transport = QuicTransport::client(pinned)?;
    let session = transport.connect(cfg.peer).await?;
    info!("connected to {}", cfg.peer);

    let service = FileStreamService::new(
        file_stream,
        FileStreamDeps {
            session: Arc::new(session),
            manifest: Arc::new(DirectoryManifestService::new(
                cfg.manifest_ttl(),
                cfg.manifest_checksums,
            )),
            codec: Arc::new(JsonManifestCodec),
            scheduler: Arc::new(TokioScheduler::current()?),
        },
    )?;

    service.start(cfg.job_id.clone(), cfg.job_dir.clone()).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    service.stop().await;
    transport.shutdown().await;
    info!(
        active = service.active_transfers(),
        "filestream-agent stopped",
    );

    Ok(())
}
