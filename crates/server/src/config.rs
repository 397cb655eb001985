// crates/server/src/config.rs
//! Server configuration: environment first, then command-line overrides.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;
use nvr_observability::LogConfig;
use nvr_server_jobs::JobsConfig;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 8080;

const DEFAULT_DB_PATH: &str = "/var/lib/nvr/nvr.db";

#[derive(Debug, Parser)]
#[command(name = "nvr-server", version, about = "NVR web API with background jobs")]
pub struct Cli {
    /// Port to listen on (overrides NVR_PORT / PORT).
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Address to bind (overrides NVR_BIND).
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// SQLite database file (overrides NVR_DB_PATH).
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Directory holding recordings and the thumbnail cache.
    #[arg(long)]
    pub storage_path: Option<PathBuf>,

    /// Scratch directory for archive files.
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Disable on-demand thumbnail generation.
    #[arg(long)]
    pub no_thumbnails: bool,

    /// Log JSON lines instead of text.
    #[arg(long)]
    pub log_json: bool,

    /// Also write rotating log files to this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub db_path: PathBuf,
    pub generate_thumbnails: bool,
    pub log: LogConfig,
    pub jobs: JobsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            generate_thumbnails: true,
            log: LogConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    /// Read `NVR_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable values fall back
    /// to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(port) = get("NVR_PORT")
            .or_else(|| get("PORT"))
            .and_then(|p| p.parse().ok())
        {
            config.port = port;
        }
        if let Some(bind) = get("NVR_BIND").and_then(|b| b.parse().ok()) {
            config.bind = bind;
        }
        if let Some(path) = get("NVR_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(path) = get("NVR_STORAGE_PATH") {
            config.jobs.storage_path = PathBuf::from(path);
        }
        if let Some(path) = get("NVR_TEMP_DIR") {
            config.jobs.temp_dir = PathBuf::from(path);
        }
        if let Some(flag) = get("NVR_GENERATE_THUMBNAILS").and_then(|v| parse_flag(&v)) {
            config.generate_thumbnails = flag;
        }
        if let Some(flag) = get("NVR_LOG_JSON").and_then(|v| parse_flag(&v)) {
            config.log.json = flag;
        }
        if let Some(dir) = get("NVR_LOG_DIR").filter(|d| !d.is_empty()) {
            config.log.log_dir = Some(PathBuf::from(dir));
        }

        config
    }

    pub fn apply_cli(mut self, cli: Cli) -> Self {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(bind) = cli.bind {
            self.bind = bind;
        }
        if let Some(path) = cli.db_path {
            self.db_path = path;
        }
        if let Some(path) = cli.storage_path {
            self.jobs.storage_path = path;
        }
        if let Some(path) = cli.temp_dir {
            self.jobs.temp_dir = path;
        }
        if cli.no_thumbnails {
            self.generate_thumbnails = false;
        }
        if cli.log_json {
            self.log.json = true;
        }
        if cli.log_dir.is_some() {
            self.log.log_dir = cli.log_dir;
        }
        self
    }
}
