use clap::{ArgAction, Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use mrcert_ca::bundle::Category;

/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 5640;

/// Default address the HTTP API binds to.
pub const DEFAULT_BIND: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Parser, Debug)]
#[command(name = "mrcert", version, about = "A small certificate authority with an HTTP API")]
pub struct Cli {
    /// Certificate storage directory (default: <data dir>/storage)
    #[arg(long, env = "MRCERT_STORAGE_DIR", value_name = "PATH", global = true)]
    pub storage_dir: Option<PathBuf>,

    /// Scratch directory for in-flight signing (default: <data dir>/scratch)
    #[arg(long, env = "MRCERT_SCRATCH_DIR", value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "MRCERT_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub port: u16,

    /// Address to bind the HTTP API to
    #[arg(long, env = "MRCERT_BIND", default_value_t = DEFAULT_BIND)]
    pub bind: IpAddr,

    /// Path or name of the openssl executable
    #[arg(long, env = "MRCERT_OPENSSL", default_value = "openssl")]
    pub openssl: String,

    /// Kill openssl invocations that run longer than this
    #[arg(
        long,
        env = "MRCERT_TOOL_TIMEOUT",
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub tool_timeout: Option<u64>,

    /// Keep scratch workspaces after each operation (debugging)
    #[arg(long, env = "MRCERT_KEEP_SCRATCH")]
    pub keep_scratch: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "MRCERT_LOG", default_value = "info")]
    pub log_level: String,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to file (in addition to stderr)
    #[arg(long, env = "MRCERT_LOG_FILE", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run the HTTP API (the default)
    Serve,
    /// Show version information
    Version,
    /// List the valid certificates of one type
    List {
        /// root, intermediate, server or client
        category: Category,
    },
}

impl Cli {
    /// Filter directive implied by `--log-level` and `-v`.
    pub fn log_directive(&self) -> &str {
        match self.verbose {
            0 => self.log_level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    }
}

// ── Resolved daemon configuration ───────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub listen: SocketAddr,
    pub openssl: String,
    pub tool_timeout: Option<Duration>,
    pub keep_scratch: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            storage_dir: cli
                .storage_dir
                .clone()
                .unwrap_or_else(mrcert_common::paths::default_storage_dir),
            scratch_dir: cli
                .scratch_dir
                .clone()
                .unwrap_or_else(mrcert_common::paths::default_scratch_dir),
            listen: SocketAddr::new(cli.bind, cli.port),
            openssl: cli.openssl.clone(),
            tool_timeout: cli.tool_timeout.map(Duration::from_secs),
            keep_scratch: cli.keep_scratch,
        }
    }

    /// Directory holding the bundles of one category.
    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.storage_dir.join(category.dir_name())
    }
}
