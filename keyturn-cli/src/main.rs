//! Keyturn CLI
//!
//! Thin front end over `keyturn-core`: signs in, refreshes, issues authenticated
//! calls and prints the outcome as JSON.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use keyturn_core::settings::{load_settings_from, APP_NAME};
use keyturn_core::{
    load_settings, preview, AuthSessionManager, ClientSettings, Credentials, Method, TokenPair,
};
use log::{info, warn};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "keyturn", version, about = "Authenticated session client")]
struct Cli {
    /// Settings file (default: <config_dir>/Keyturn/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory holding the device identity and session
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "KEYTURN_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        register_id: Option<String>,
        /// Sign in against this base URL instead of the configured one
        #[arg(long, conflicts_with = "try_all")]
        base_url: Option<String>,
        /// Walk every configured endpoint until one accepts the credentials
        #[arg(long)]
        try_all: bool,
    },
    /// Exchange the stored refresh token for a new pair
    Refresh,
    /// Issue an authenticated call, refreshing once on 401
    Request {
        /// HTTP method, e.g. GET or POST
        method: String,
        /// Path appended to the base URL
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Show the stored session
    Status,
    /// Forget the stored session
    Logout,
    /// Show the device identity
    Device,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    if cli.data_dir.is_some() {
        settings.data_dir = cli.data_dir.clone();
    }

    init_logging(&settings);
    info!("========================================");
    info!("Starting {} v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let mut manager =
        AuthSessionManager::new(&settings).context("Failed to initialize session manager")?;

    let output = match cli.command {
        Command::Login {
            email,
            password,
            register_id,
            base_url,
            try_all,
        } => {
            let mut creds = Credentials::new(email, password);
            if let Some(register_id) = register_id {
                creds = creds.with_register_id(register_id);
            }
            let tokens = if try_all {
                manager.try_all_endpoints(&creds)?
            } else {
                manager.login(&creds, base_url.as_deref())?
            };
            json!({
                "state": manager.state().label(),
                "baseUrl": manager.base_url(),
                "tokens": token_summary(&tokens),
            })
        }
        Command::Refresh => {
            load_stored(&mut manager);
            let tokens = manager.refresh()?;
            json!({
                "state": manager.state().label(),
                "tokens": token_summary(&tokens),
            })
        }
        Command::Request { method, path, body } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .map_err(|_| anyhow!("Invalid HTTP method: {}", method))?;
            let body: Option<Value> = body
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--body is not valid JSON")?;

            load_stored(&mut manager);
            let response = manager.authenticated_request(method, &path, body.as_ref())?;
            let body = response
                .json::<Value>()
                .unwrap_or_else(|_| Value::String(response.body.clone()));
            json!({
                "status": response.status,
                "body": body,
            })
        }
        Command::Status => {
            load_stored(&mut manager);
            json!({
                "state": manager.state().label(),
                "baseUrl": manager.base_url(),
                "tokens": manager.tokens().map(token_summary),
            })
        }
        Command::Logout => {
            manager.logout()?;
            json!({ "state": manager.state().label() })
        }
        Command::Device => {
            json!({
                "dataDir": settings.resolve_data_dir()?,
                "identity": manager.device_identity(),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Adopt the stored session; an unreadable one is reported and ignored
fn load_stored(manager: &mut AuthSessionManager) {
    if let Err(e) = manager.load_session() {
        warn!("Ignoring stored session: {}", e);
        eprintln!("Warning: ignoring stored session: {}", e);
    }
}

fn token_summary(tokens: &TokenPair) -> Value {
    json!({
        "accessToken": preview(&tokens.access_token, 12),
        "refreshToken": preview(&tokens.refresh_token, 12),
        "issuedAt": tokens.issued_at,
    })
}

/// Log to `keyturn.log` in the data directory, or stderr if it cannot be opened
fn init_logging(settings: &ClientSettings) {
    let log_dir = settings
        .resolve_data_dir()
        .unwrap_or_else(|_| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let log_file_path = log_dir.join("keyturn.log");

    let log_level = std::env::var("RUST_LOG")
        .map(|_| log::LevelFilter::Debug)
        .unwrap_or(log::LevelFilter::Info);

    if let Ok(log_file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)
    {
        env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp_millis()
            .init();
    }

    info!("Log file: {}", log_file_path.display());
    info!("Log level: {:?}", log_level);
}
