use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Book catalog backend with ratings, cover uploads and token auth.
#[derive(Parser, Debug, Clone)]
#[command(name = "grimoire")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "GRIMOIRE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Secret used to sign bearer tokens (overrides the config file).
    #[arg(long, env = "GRIMOIRE_JWT_SECRET", global = true, hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Email address used to log in.
        email: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// List all users.
    List,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Cover upload configuration.
    #[serde(default)]
    pub uploads: UploadConfig,

    /// Rate limit configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Public base URL used when building image URLs, e.g. `https://books.example.com`.
    /// When unset, the request's Host header is used.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: None,
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        4000,
    )
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/grimoire.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for bearer tokens. A random one is generated at startup if unset.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Token lifetime in hours.
    #[serde(default = "default_token_hours")]
    pub token_hours: u32,

    /// Minimum password length accepted at signup.
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_hours: default_token_hours(),
            min_password_len: default_min_password_len(),
        }
    }
}

fn default_token_hours() -> u32 {
    24
}

fn default_min_password_len() -> usize {
    6
}

/// Cover upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory where processed covers are written and served from.
    #[serde(default = "default_uploads_dir")]
    pub dir: PathBuf,

    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Thumbnail bounding box width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,

    /// Thumbnail bounding box height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,

    /// JPEG quality (1-100).
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Largest width or height an upload may declare before it is decoded.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
            max_bytes: default_max_bytes(),
            width: default_width(),
            height: default_height(),
            quality: default_quality(),
            max_dimension: default_max_dimension(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_width() -> u32 {
    463
}

fn default_height() -> u32 {
    595
}

fn default_quality() -> u8 {
    80
}

fn default_max_dimension() -> u32 {
    8000
}

/// Rate limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Requests allowed per IP per window across the whole API (0 to disable).
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Requests allowed per IP per window on `/api/auth` (0 to disable).
    #[serde(default = "default_auth_max_requests")]
    pub auth_max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_requests: default_max_requests(),
            auth_max_requests: default_auth_max_requests(),
        }
    }
}

fn default_window_seconds() -> u64 {
    15 * 60
}

fn default_max_requests() -> u32 {
    100
}

fn default_auth_max_requests() -> u32 {
    5
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("grimoire.toml"),
            dirs::config_dir()
                .map(|p| p.join("grimoire").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/grimoire/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# grimoire configuration

[server]
bind = "0.0.0.0:4000"
# public_url = "https://books.example.com"

[database]
# path = "/var/lib/grimoire/grimoire.db"

[auth]
# Set this (or GRIMOIRE_JWT_SECRET), otherwise tokens are lost on restart
# jwt_secret = "change-me"
token_hours = 24
min_password_len = 6

[uploads]
# dir = "/var/lib/grimoire/uploads"
max_bytes = 5242880
width = 463
height = 595
quality = 80
max_dimension = 8000

[rate_limit]
window_seconds = 900
max_requests = 100
auth_max_requests = 5
"#
        .to_string()
    }
}
