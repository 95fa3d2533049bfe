//! glint - word-level language server for plain text.
//!
//! This is the main entry point for the glint binary. By default it speaks
//! LSP over stdio; `--tcp` switches to a listening socket that serves each
//! connection independently.

use clap::Parser;
use glint_server::{serve, LanguageProvider, Settings, WordProvider};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "glint")]
#[command(author, version, about = "Word-level language server for plain text", long_about = None)]
struct Cli {
    /// Listen on a TCP address instead of speaking LSP over stdio
    #[arg(long)]
    tcp: Option<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Flag lines longer than this many characters
    #[arg(long)]
    max_line_length: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    let mut settings = Settings::default();
    if let Some(limit) = cli.max_line_length {
        settings.max_line_length = limit;
    }
    let provider: Arc<dyn LanguageProvider> = Arc::new(WordProvider);

    match cli.tcp {
        Some(address) => run_tcp(address, provider, settings).await,
        None => run_stdio(provider, settings).await,
    }
}

/// Initialize logging based on verbosity and destination. Stdout carries
/// the protocol, so logs go to stderr unless a file is given; `RUST_LOG`
/// overrides the default filter either way.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = if verbose {
        "glint=debug,glint_server=debug,glint_rpc=debug"
    } else {
        "glint=info,glint_server=info,glint_rpc=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(file)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Serve a single session over stdio. The process exit code reports
/// whether the client shut the session down properly.
async fn run_stdio(provider: Arc<dyn LanguageProvider>, settings: Settings) -> anyhow::Result<()> {
    info!("serving on stdio");
    let clean = serve(tokio::io::stdin(), tokio::io::stdout(), provider, settings).await;
    if !clean {
        std::process::exit(1);
    }
    Ok(())
}

/// Accept loop for TCP mode: one independent session per connection.
async fn run_tcp(
    address: SocketAddr,
    provider: Arc<dyn LanguageProvider>,
    settings: Settings,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("listening on {}", listener.local_addr()?);

    loop {
        let (socket, peer) = listener.accept().await?;
        info!(%peer, "client connected");

        let provider = provider.clone();
        let settings = settings.clone();
        tokio::spawn(async move {
            let (read, write) = socket.into_split();
            let clean = serve(read, write, provider, settings).await;
            info!(%peer, clean, "client disconnected");
        });
    }
}
