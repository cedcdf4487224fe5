//! SocksGate - SOCKS5 proxy toggle with a domain whitelist.
//!
//! `socksgate run` starts the daemon (proxy service plus local HTTP API).
//! Every other subcommand is a thin client of a running daemon, except
//! `export`, which reads the settings database directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use directories::ProjectDirs;
use socksgate_app::client::ApiClient;
use socksgate_app::daemon::{self, DaemonConfig};
use socksgate_app::transfer;
use socksgate_proxy::{PortInput, ProxyStatus, RawConfig, ServiceConfig, DEFAULT_HOST_TIMEOUT};
use socksgate_server::{ServerConfig, DEFAULT_PORT};
use socksgate_storage::Database;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where the CLI expects the daemon by default.
const DEFAULT_API_URL: &str = "http://127.0.0.1:48766";

/// SocksGate - route traffic through a SOCKS5 proxy, except whitelisted domains
#[derive(Parser, Debug)]
#[command(name = "socksgate", version, about)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Base URL of the running daemon
    #[arg(long, global = true, default_value = DEFAULT_API_URL)]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon
    Run(RunArgs),
    /// Show the current proxy status
    Status {
        /// Print the raw JSON status
        #[arg(long)]
        json: bool,
    },
    /// Turn the proxy on
    On,
    /// Turn the proxy off
    Off,
    /// Replace the upstream proxy and the whitelist
    Config(ConfigArgs),
    /// Show whether a URL would bypass the proxy
    Check {
        /// URL to check
        url: String,
    },
    /// Write the persisted settings to a JSON file
    Export {
        /// Destination file
        file: PathBuf,
        /// Settings database (default: platform data directory)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Load settings from a JSON file into the running daemon
    Import {
        /// Source file
        file: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Port for the local HTTP API
    #[arg(long, default_value_t = DEFAULT_PORT)]
    api_port: u16,

    /// Settings database (default: platform data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Keep proxy settings in memory instead of changing the OS settings
    #[arg(long)]
    dry_run: bool,

    /// Bound on each call into the OS proxy settings, in seconds
    #[arg(long, default_value_t = DEFAULT_HOST_TIMEOUT.as_secs())]
    host_timeout_secs: u64,

    /// Disable desktop notifications
    #[arg(long)]
    no_notifications: bool,

    /// Probe the upstream proxy every N seconds while it is on
    #[arg(long)]
    health_check_secs: Option<u64>,
}

#[derive(ClapArgs, Debug)]
struct ConfigArgs {
    /// SOCKS5 proxy host
    #[arg(long)]
    host: String,

    /// SOCKS5 proxy port
    #[arg(long)]
    port: String,

    /// Proxy username
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Proxy password
    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Domain that bypasses the proxy (`example.com` or `*.example.com`);
    /// repeat for more
    #[arg(long = "whitelist", value_name = "PATTERN")]
    whitelist: Vec<String>,
}

impl From<ConfigArgs> for RawConfig {
    fn from(args: ConfigArgs) -> Self {
        RawConfig {
            host: args.host,
            port: PortInput::Text(args.port),
            username: args.username,
            password: args.password,
            whitelist: args.whitelist,
        }
    }
}

impl RunArgs {
    fn daemon_config(&self) -> DaemonConfig {
        let service = ServiceConfig::default()
            .with_host_timeout(Duration::from_secs(self.host_timeout_secs))
            .with_notifications(!self.no_notifications)
            .with_health_check(self.health_check_secs.map(Duration::from_secs));

        DaemonConfig {
            server: ServerConfig::default().with_port(self.api_port),
            db_path: self.db.clone(),
            dry_run: self.dry_run,
            service,
        }
    }
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "socksgate", "socksgate").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging. The daemon logs to a daily-rotated file (and the
/// console with `--debug`); client subcommands log to stderr only.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };
    let daemon = matches!(args.command, Command::Run(_));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "socksgate={level},socksgate_app={level},socksgate_core={level},\
             socksgate_proxy={level},socksgate_server={level},socksgate_storage={level},warn",
            level = log_level
        ))
    });

    if daemon {
        if let Some(log_dir) = logs_dir() {
            if std::fs::create_dir_all(&log_dir).is_ok() {
                let file_appender = RollingFileAppender::builder()
                    .rotation(Rotation::DAILY)
                    .max_log_files(5)
                    .filename_prefix("socksgate")
                    .filename_suffix("log")
                    .build(&log_dir)
                    .ok();

                if let Some(appender) = file_appender {
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                    if args.debug {
                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(fmt::layer().with_writer(std::io::stdout))
                            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                            .init();
                    } else {
                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                            .init();
                    }

                    tracing::info!("Logging to {:?}", log_dir);
                    return Some(guard);
                }
            }
        }
    }

    // Client subcommands, or no writable data directory.
    let console_filter = if daemon || args.debug {
        env_filter
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(console_filter)
        .with_writer(std::io::stderr)
        .init();

    if daemon {
        tracing::warn!("File logging unavailable, using console only");
    }
    None
}

fn print_status(status: &ProxyStatus) {
    println!("Proxy:     {} ({})", status.indicator.as_str(), status.mode);
    println!("Requested: {}", if status.enabled { "on" } else { "off" });
    match &status.target.username {
        Some(user) => println!("Upstream:  {} (user {})", status.target.endpoint, user),
        None => println!("Upstream:  {}://{}", status.target.scheme, status.target.endpoint),
    }
    if status.whitelist.is_empty() {
        println!("Whitelist: (none)");
    } else {
        println!("Whitelist: {}", status.whitelist.join(", "));
    }
    println!("Bypass:    {}", status.bypass.join(", "));
    if let Some(error) = &status.last_error {
        println!("Last error [{}]: {}", error.kind.as_str(), error.message);
    }
}

fn export_settings(file: &Path, db: Option<&Path>) -> anyhow::Result<()> {
    let db = match db {
        Some(path) => Database::with_path(path),
        None => Database::new(),
    }
    .context("Could not open the settings database")?;

    let state = transfer::export(&db, file)?;
    println!(
        "Exported {} whitelist entries (proxy {}) to {}",
        state.whitelist.len(),
        if state.enabled { "on" } else { "off" },
        file.display()
    );
    Ok(())
}

async fn import_settings(client: &ApiClient, file: &Path) -> anyhow::Result<ProxyStatus> {
    let state = transfer::read(file)
        .with_context(|| format!("Could not read {}", file.display()))?;

    client
        .update_config(&transfer::to_raw_config(&state))
        .await
        .context("Daemon rejected the imported settings")?;
    let status = client
        .toggle(state.enabled)
        .await
        .context("Imported settings saved, but the proxy could not be switched")?;
    Ok(status)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive for the duration of the program.
    let _log_guard = init_logging(&args);
    if let Command::Run(run) = &args.command {
        tracing::debug!(?run, "Daemon options");
    }

    let api_url = args.api_url.clone();
    let client = || ApiClient::new(&api_url).context("Invalid --api-url");

    match args.command {
        Command::Run(run) => {
            tracing::info!("Starting SocksGate {}", env!("CARGO_PKG_VERSION"));
            daemon::run(run.daemon_config()).await?;
            tracing::info!("SocksGate shutting down");
        }
        Command::Status { json } => {
            let status = client()?.state().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        Command::On => print_status(&client()?.toggle(true).await?),
        Command::Off => print_status(&client()?.toggle(false).await?),
        Command::Config(config) => {
            let raw = RawConfig::from(config);
            // Reject bad input before contacting the daemon.
            raw.validate().context("Invalid proxy settings")?;
            print_status(&client()?.update_config(&raw).await?);
        }
        Command::Check { url } => {
            let result = client()?.check(&url).await?;
            match result.pattern {
                Some(pattern) => println!("{} bypasses the proxy (matches {})", result.url, pattern),
                None => println!("{} goes through the proxy", result.url),
            }
        }
        Command::Export { file, db } => export_settings(&file, db.as_deref())?,
        Command::Import { file } => print_status(&import_settings(&client()?, &file).await?),
    }

    Ok(())
}
