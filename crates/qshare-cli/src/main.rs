//! QShare CLI
//!
//! Finds a QShare peer on the local network and lists, uploads and downloads
//! its files.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use qshare_core::{
    Endpoint, FileListing, SessionCoordinator, SessionDriver, SessionEvent, TransferClient,
};
use qshare_discovery::{DiscoveryEvent, EndpointResolver, MdnsBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration};

/// QShare - share files with a peer on your local network
#[derive(Parser)]
#[command(name = "qshare")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connect to this peer (host:port) instead of discovering one
    #[arg(short, long, global = true)]
    peer: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find a peer and print its endpoint
    Discover,

    /// List the peer's files
    List,

    /// Upload a file to the peer
    Upload {
        /// File to upload
        #[arg(required = true)]
        file: PathBuf,

        /// Name to store the file under (defaults to the file's name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Download a file from the peer
    Download {
        /// Remote file name
        #[arg(required = true)]
        name: String,

        /// Output directory (defaults to the configured download directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that the peer is alive
    Ping,

    /// Keep discovering and print session events until Ctrl+C
    Watch,

    /// Show configuration
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(peer) = &cli.peer {
        config.discovery.peer = Some(peer.clone());
    }

    config.validate()?;
    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Discover => discover_peer(&config).await?,
        Commands::List => list_files(&config).await?,
        Commands::Upload { file, name } => upload_file(&config, &file, name.as_deref()).await?,
        Commands::Download { name, output } => {
            let dir = output.unwrap_or_else(|| config.transfer.download_dir.clone());
            download_file(&config, &name, &dir).await?;
        }
        Commands::Ping => ping_peer(&config).await?,
        Commands::Watch => watch(&config).await?,
        Commands::Status => show_status(&config),
    }

    Ok(())
}

/// Initialize logging from config, `--verbose` wins
fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };

    let builder = tracing_subscriber::fmt().with_env_filter(level);
    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

/// Browse via mDNS until a peer resolves or the discovery timeout passes
async fn resolve_peer(config: &Config) -> anyhow::Result<Endpoint> {
    let backend = Arc::new(MdnsBackend::new(config.mdns_config())?);
    let (resolver, mut events) = EndpointResolver::new(backend, config.resolver_config());

    let spinner = TransferProgress::waiting(&format!(
        "Looking for {} peers...",
        config.discovery.service_type
    ));
    resolver.start_discovery().await;

    let outcome = tokio::time::timeout(config.discovery_timeout(), async {
        while let Some(event) = events.next().await {
            match event {
                DiscoveryEvent::Resolved { service, endpoint } => {
                    tracing::debug!("Peer properties: {:?}", service.properties);
                    return Ok(endpoint);
                }
                DiscoveryEvent::DiscoveryStartFailed(code) => {
                    anyhow::bail!("Discovery failed to start (code {code})");
                }
                DiscoveryEvent::ResolveFailed {
                    advertisement,
                    code,
                } => {
                    tracing::warn!(
                        "Could not resolve {} (code {})",
                        advertisement.instance_name,
                        code
                    );
                }
                DiscoveryEvent::ServiceFound(_) | DiscoveryEvent::ServiceLost(_) => {}
            }
        }
        anyhow::bail!("Discovery ended without finding a peer")
    })
    .await;

    resolver.stop_discovery().await;

    match outcome {
        Ok(Ok(endpoint)) => {
            spinner.finish_with_message(format!("Found peer at {endpoint}"));
            Ok(endpoint)
        }
        Ok(Err(e)) => {
            spinner.abandon();
            Err(e)
        }
        Err(_) => {
            spinner.abandon();
            anyhow::bail!(
                "No peer found within {}",
                format_duration(config.discovery_timeout())
            )
        }
    }
}

/// Build a session connected to the configured or discovered peer
async fn connect(config: &Config) -> anyhow::Result<SessionCoordinator> {
    let endpoint = match config.peer()? {
        Some(endpoint) => endpoint,
        None => resolve_peer(config).await?,
    };

    let session = SessionCoordinator::new(TransferClient::new(config.transfer_config())?);
    session.adopt_endpoint(endpoint).await;
    Ok(session)
}

async fn discover_peer(config: &Config) -> anyhow::Result<()> {
    let endpoint = resolve_peer(config).await?;
    println!("{endpoint}");
    Ok(())
}

fn print_listing(listing: &FileListing) {
    if listing.is_empty() {
        println!("No files shared");
        return;
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();

    for entry in listing {
        let size = entry.size.map(format_bytes).unwrap_or_default();
        let age = entry
            .mtime
            .map(|m| {
                let elapsed = Duration::from_secs(now.saturating_sub(m).max(0) as u64);
                format!("{} ago", format_duration(elapsed))
            })
            .unwrap_or_default();
        println!("{:<40} {:>12} {:>12}", entry.name, size, age);
    }
}

async fn list_files(config: &Config) -> anyhow::Result<()> {
    let session = connect(config).await?;
    let listing = session.refresh_listing().await?;
    print_listing(&listing);
    Ok(())
}

async fn upload_file(config: &Config, file: &Path, name: Option<&str>) -> anyhow::Result<()> {
    let session = connect(config).await?;

    let size = tokio::fs::metadata(file).await.ok().map(|m| m.len());
    let display_name = name.map_or_else(|| file.display().to_string(), str::to_string);
    let progress = TransferProgress::waiting(&format!(
        "Uploading {} ({})",
        display_name,
        size.map(format_bytes).unwrap_or_default()
    ));

    match session.upload_path(file, name).await {
        Ok(outcome) => {
            progress.finish_with_message(format!("Uploaded as {}", outcome.ack.stored_name()));
            match outcome.refresh {
                Ok(listing) => print_listing(&listing),
                Err(e) => eprintln!("Uploaded, but refreshing the listing failed: {e}"),
            }
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

async fn download_file(config: &Config, name: &str, dir: &Path) -> anyhow::Result<()> {
    let session = connect(config).await?;

    // Size is only for the progress bar; a failed listing is not fatal
    let size = match session.refresh_listing().await {
        Ok(listing) => listing.get(name).and_then(|e| e.size),
        Err(e) => {
            tracing::debug!("Listing before download failed: {}", e);
            None
        }
    };

    let mut sink = qshare_core::create_download_sink(dir, name).await?;
    let progress = TransferProgress::new(size, name);

    let result = {
        let mut writer = progress.writer(sink.file_mut());
        session.download(name, &mut writer).await
    };

    match result {
        Ok(written) => {
            let path = sink.commit().await?;
            progress.finish_with_message(format!(
                "Saved {} ({})",
                path.display(),
                format_bytes(written)
            ));
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            // Only the partial file goes; an existing file keeps its contents
            sink.discard().await;
            Err(e.into())
        }
    }
}

async fn ping_peer(config: &Config) -> anyhow::Result<()> {
    let session = connect(config).await?;
    let status = session.ping().await?;

    println!(
        "{} at {} ({})",
        if status.name.is_empty() { "peer" } else { &status.name },
        session
            .current_endpoint()
            .await
            .map(|e| e.to_string())
            .unwrap_or_default(),
        if status.ok { "ok" } else { "not ok" }
    );
    Ok(())
}

async fn watch(config: &Config) -> anyhow::Result<()> {
    let session = Arc::new(SessionCoordinator::new(TransferClient::new(
        config.transfer_config(),
    )?));
    let (driver, mut session_events) =
        SessionDriver::new(Arc::clone(&session), config.driver_config());

    let backend = Arc::new(MdnsBackend::new(config.mdns_config())?);
    let (resolver, discovery_events) = EndpointResolver::new(backend, config.resolver_config());
    let driver_task = tokio::spawn(driver.run(discovery_events));

    resolver.start_discovery().await;
    println!(
        "Watching for {} peers (Ctrl+C to stop)",
        config.discovery.service_type
    );

    loop {
        tokio::select! {
            event = session_events.recv() => match event {
                Some(SessionEvent::Connected(endpoint)) => println!("Connected to {endpoint}"),
                Some(SessionEvent::ListingUpdated(listing)) => print_listing(&listing),
                Some(SessionEvent::Disconnected) => {
                    println!("Peer went away, discovering again");
                    resolver.start_discovery().await;
                }
                Some(SessionEvent::Failed(e)) => eprintln!("Error: {e}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    resolver.stop_discovery().await;
    drop(resolver);
    if let Err(e) = driver_task.await {
        tracing::debug!("Driver task ended abnormally: {}", e);
    }

    Ok(())
}

/// Show configuration
fn show_status(config: &Config) {
    println!("QShare");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Discovery:");
    println!("  Service type: {}", config.discovery.service_type);
    match &config.discovery.peer {
        Some(peer) => println!("  Fixed peer: {peer}"),
        None => println!("  Fixed peer: none (mDNS)"),
    }
    println!(
        "  Resolve timeout: {}",
        format_duration(Duration::from_secs(config.discovery.resolve_timeout_secs))
    );
    println!(
        "  Discovery timeout: {}",
        format_duration(config.discovery_timeout())
    );
    println!("  Forget lost peer: {}", config.discovery.forget_lost_peer);
    println!();

    println!("Transfer:");
    println!(
        "  Connect timeout: {}",
        format_duration(Duration::from_secs(config.transfer.connect_timeout_secs))
    );
    println!(
        "  Response timeout: {}",
        format_duration(Duration::from_secs(config.transfer.response_timeout_secs))
    );
    println!("  Download dir: {}", config.transfer.download_dir.display());
    println!();

    println!("Config file: {}", Config::default_path().display());
}
