mod bootstrap;
pub(crate) mod cli;
mod http;

use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use mrcert_ca::authority::CertificateAuthority;
use mrcert_ca::bundle::Category;
use mrcert_ca::openssl::OpenSsl;
use mrcert_ca::CaCore;

use cli::{Cli, Command, Config};

/// Maximum time to wait for orderly shutdown before forcing exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// Brief pause after cancellation to let in-flight requests complete.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_new(cli.log_directive())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Hold the non-blocking guards for the lifetime of main so logs flush on exit.
    let log_guards = init_logging(env_filter, cli.log_file.as_deref())?;

    if cli.command == Some(Command::Version) {
        print_version(cli.json);
        return Ok(());
    }

    let config = Config::from_cli(&cli);
    if let Err(e) = bootstrap::prepare(&config) {
        tracing::error!(error = %e, "Startup failed");
        let code = e.exit_code();
        drop(log_guards);
        std::process::exit(code);
    }

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Some(Command::List { category }) => rt.block_on(list(&config, category, cli.json)),
        Some(Command::Version) | Some(Command::Serve) | None => rt.block_on(serve(config)),
    }
}

fn print_version(json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "platform": std::env::consts::OS,
            })
        );
    } else {
        println!("mrcert {}", env!("CARGO_PKG_VERSION"));
    }
}

fn build_core(config: &Config) -> CaCore {
    let openssl = OpenSsl::system(config.openssl.clone(), config.tool_timeout);
    let authority = CertificateAuthority::new(config.scratch_dir.clone(), openssl)
        .keep_scratch(config.keep_scratch);
    CaCore::new(&config.storage_dir, authority)
}

// ── Offline listing ─────────────────────────────────────────────────

async fn list(config: &Config, category: Category, json: bool) -> anyhow::Result<()> {
    let certs = build_core(config).list(category).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&certs)?);
        return Ok(());
    }
    if certs.is_empty() {
        println!("No {category} certificates.");
        return Ok(());
    }
    for (name, summary) in &certs {
        let mut line = name.clone();
        if let (Some(signer_type), Some(signer_name)) = (summary.signer_type, &summary.signer_name) {
            line.push_str(&format!("  signed by {signer_type}/{signer_name}"));
        }
        if summary.intermediate_only == Some(true) {
            line.push_str("  intermediate only");
        }
        if !summary.has_key {
            line.push_str("  (no key)");
        }
        println!("{line}");
    }
    Ok(())
}

// ── Daemon ──────────────────────────────────────────────────────────

async fn serve(config: Config) -> anyhow::Result<()> {
    startup_diagnostics(&config);

    let core = build_core(&config);
    let cancel = CancellationToken::new();
    let started_at = std::time::Instant::now();

    let http_task = {
        let core = core.clone();
        let token = cancel.clone();
        let listen = config.listen;
        let storage_dir = config.storage_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = http::start_http(core, listen, storage_dir, token, started_at).await {
                tracing::error!(error = %e, "HTTP API failed");
            }
        })
    };

    tracing::info!("Ready.");

    shutdown_signal().await;
    tracing::info!("Shutting down...");

    let shutdown = async {
        cancel.cancel();
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        let _ = http_task.await;
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown)
        .await
        .is_err()
    {
        tracing::warn!("Shutdown timed out after {:?}, forcing exit", SHUTDOWN_TIMEOUT);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

fn startup_diagnostics(config: &Config) {
    tracing::info!("mrcert v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Platform: {}", std::env::consts::OS);

    match hostname::get() {
        Ok(h) => tracing::info!("Hostname: {}", h.to_string_lossy()),
        Err(e) => tracing::warn!(error = %e, "Could not determine hostname"),
    }

    tracing::info!("Storage: {}", config.storage_dir.display());
    tracing::info!("Scratch: {}", config.scratch_dir.display());
    match config.tool_timeout {
        Some(timeout) => tracing::info!("openssl: {} (timeout {:?})", config.openssl, timeout),
        None => tracing::info!("openssl: {}", config.openssl),
    }
    if config.keep_scratch {
        tracing::warn!("Scratch workspaces are kept after each operation");
    }
}

pub(crate) fn init_logging(
    env_filter: tracing_subscriber::EnvFilter,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Vec<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(nb_stderr);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (nb_file, file_guard) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(nb_file);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();

        Ok(vec![stderr_guard, file_guard])
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();

        Ok(vec![stderr_guard])
    }
}
