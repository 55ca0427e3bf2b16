//! CLI argument parsing, validation, and startup helpers.

use std::sync::Arc;
use std::time::Duration;

use crate::ServerConfig;
use crate::cors::{AllowedOrigins, DEFAULT_ALLOWED_ORIGIN};
use crate::credentials::CredentialStore;
use crate::db::{Database, MemoryRefreshStore, RefreshStore};
use crate::rate_limit::DEFAULT_LOGIN_PER_MINUTE;
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::{error, info, warn};

const MIN_SECRET_LENGTH: usize = 32;
const DEV_SECRET_LENGTH: usize = 48;

const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "authpair",
    about = "Access/refresh token pair service with rotating refresh tokens"
)]
pub struct Args {
    /// Log output format
    #[arg(short, long, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the token service
    Serve(ServeArgs),
    /// Run the conformance checks against a running service
    Check(CheckArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, env = "MOCK_API_PORT", default_value = "4000")]
    pub port: u16,

    /// Comma-separated list of origins allowed to call the API
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = DEFAULT_ALLOWED_ORIGIN, value_parser = parse_allowed_origins)]
    pub allowed_origins: AllowedOrigins,

    /// Access token lifetime, e.g. "90s", "2m"
    #[arg(long, env = "ACCESS_TOKEN_TTL", default_value = "2m", value_parser = parse_ttl)]
    pub access_ttl: Duration,

    /// Refresh token lifetime, e.g. "30m", "1h"
    #[arg(long, env = "REFRESH_TOKEN_TTL", default_value = "30m", value_parser = parse_ttl)]
    pub refresh_ttl: Duration,

    /// Path to file containing the access token secret. Prefer ACCESS_TOKEN_SECRET instead
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer REFRESH_TOKEN_SECRET instead
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Generate random secrets for this run. Tokens do not survive a restart
    #[arg(long)]
    pub dev_secrets: bool,

    /// Path to SQLite database file for refresh tokens. In-memory when omitted
    #[arg(short, long)]
    pub database: Option<String>,

    /// JSON file of subjects. The built-in demo accounts are used when omitted
    #[arg(long)]
    pub subjects_file: Option<String>,

    /// Serve GET /auth/accounts listing the known subjects
    #[arg(long)]
    pub expose_accounts: bool,

    /// Login attempts allowed per client IP per minute
    #[arg(long, env = "LOGIN_RATE_PER_MINUTE", default_value_t = DEFAULT_LOGIN_PER_MINUTE)]
    pub login_rate: u32,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CheckArgs {
    /// Base URL of the running service
    #[arg(long, default_value = "http://localhost:4000")]
    pub base_url: String,

    #[arg(long, default_value = "admin@example.com")]
    pub email: String,

    #[arg(long, default_value = "123456")]
    pub password: String,

    /// Allowed origin to send on the CORS preflight check
    #[arg(long, default_value = DEFAULT_ALLOWED_ORIGIN)]
    pub origin: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

fn parse_allowed_origins(s: &str) -> Result<AllowedOrigins, String> {
    AllowedOrigins::parse(s).map_err(|e| e.to_string())
}

/// Parse a lifetime: an integer with an optional `s`, `m`, `h` or `d` suffix.
/// A bare integer is seconds.
pub fn parse_ttl(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
        _ => (s, 's'),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("Invalid duration: {}", s))?;
    if value == 0 {
        return Err(format!("Duration must be positive: {}", s));
    }

    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return Err(format!("Unknown duration unit '{}' in {}", unit, s)),
    };

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration too large: {}", s))
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a signing secret from an environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "{} is required. Set the environment variable, pass a secret file, or use --dev-secrets",
            env_var
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            env_var, MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Random alphanumeric secret for local development.
pub fn generate_dev_secret() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(DEV_SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// Load both secrets and check they are distinct.
pub fn load_secrets(args: &ServeArgs) -> Option<(String, String)> {
    if args.dev_secrets {
        warn!("Using generated development secrets");
        return Some((generate_dev_secret(), generate_dev_secret()));
    }

    let access = load_secret(ACCESS_SECRET_ENV, args.access_secret_file.as_deref())?;
    let refresh = load_secret(REFRESH_SECRET_ENV, args.refresh_secret_file.as_deref())?;

    if access == refresh {
        error!("Access and refresh token secrets must differ");
        return None;
    }

    Some((access, refresh))
}

/// Open the refresh store, logging errors if it fails.
pub async fn open_store(database: Option<&str>) -> Option<Arc<dyn RefreshStore>> {
    let Some(path) = database else {
        info!("Using in-memory refresh store");
        return Some(Arc::new(MemoryRefreshStore::new()));
    };

    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(Arc::new(db.refresh_tokens()))
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

/// Load subjects from a file, or the demo subjects when no file is given.
pub fn load_credentials(subjects_file: Option<&str>) -> Option<CredentialStore> {
    let result = match subjects_file {
        Some(path) => CredentialStore::from_file(path),
        None => CredentialStore::demo(),
    };

    match result {
        Ok(store) => {
            info!(subjects = store.subjects().len(), "Credential store loaded");
            Some(store)
        }
        Err(e) => {
            error!(error = %e, "Failed to load subjects");
            None
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &ServeArgs,
    secrets: (String, String),
    store: Arc<dyn RefreshStore>,
    credentials: CredentialStore,
) -> ServerConfig {
    let (access_secret, refresh_secret) = secrets;

    ServerConfig {
        access_secret: access_secret.into_bytes(),
        refresh_secret: refresh_secret.into_bytes(),
        access_ttl: args.access_ttl,
        refresh_ttl: args.refresh_ttl,
        store,
        credentials: Arc::new(credentials),
        allowed_origins: args.allowed_origins.clone(),
        expose_accounts: args.expose_accounts,
        login_rate_per_minute: args.login_rate,
    }
}
