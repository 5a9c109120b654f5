//! trustme: offline tooling around the TrustMe client crypto
//!
//! Commands:
//!   salt                    - print a fresh Base64 salt for a new account
//!   generate [--length N]   - print a random password
//!   seal --salt B64         - stdin PlainRecord JSON (or array) → create request JSON
//!   open --salt B64         - stdin PasswordResponse array → decrypted views JSON
//!   session status|logout   - inspect or drop the persisted session token
//!   config show             - display the effective configuration
//!
//! The master password is prompted on the terminal, or read from
//! TRUSTME_MASTER_PASSWORD when set.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

use trustme_core::config::{ClientConfig, TrustmeConfig};
use trustme_core::types::{CreatePasswordRequest, PasswordResponse, RecordId};
use trustme_crypto::{
    filter_for_domain, generate_password, CredentialRecord, CryptoEngine, DerivedKey,
    Pbkdf2AesGcm, PlainRecord, Salt,
};
use trustme_session::SessionKeyManager;

const DEFAULT_LOG_LEVEL: &str = "info";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "trustme",
    version,
    about = "TrustMe password manager client tooling",
    long_about = "trustme: generate salts and passwords, seal and open credential records offline"
)]
struct Cli {
    /// Path to trustme.toml configuration file
    #[arg(long, short = 'c', env = "TRUSTME_CONFIG", default_value = "trustme.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(long, env = "TRUSTME_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides the config
    #[arg(long, env = "TRUSTME_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a fresh random salt (only for registering a new account)
    Salt,

    /// Print a randomly generated password
    Generate {
        #[arg(long, short = 'l', default_value_t = trustme_crypto::generator::DEFAULT_LENGTH)]
        length: usize,
    },

    /// Encrypt a record (or an array of records) read from stdin
    Seal {
        /// The account's Base64 salt, as issued by the backend
        #[arg(long)]
        salt: String,
    },

    /// Decrypt a list of stored records read from stdin
    Open {
        #[arg(long)]
        salt: String,
        /// Only open records whose website matches this page URL
        #[arg(long)]
        page: Option<String>,
    },

    /// Persisted session token management
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// Show whether a session token is persisted
    Status,
    /// Remove the persisted session token
    Logout,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Display the effective configuration
    Show,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SealInput {
    One(PlainRecord),
    Many(Vec<PlainRecord>),
}

/// A decrypted record as printed by `open`.
#[derive(Serialize)]
struct OpenedRecord {
    id: RecordId,
    website_url: String,
    username: String,
    password: String,
    notes: String,
    failed: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;

    let (level, format) = log_settings(cli.log.as_deref(), cli.log_format, &config.client);
    init_logging(&level, format);

    match cli.command {
        Commands::Salt => {
            println!("{}", Salt::generate().to_base64());
            Ok(())
        }
        Commands::Generate { length } => {
            let password = generate_password(length)?;
            println!("{}", password.expose_secret());
            Ok(())
        }
        Commands::Seal { salt } => cmd_seal(&salt),
        Commands::Open { salt, page } => cmd_open(&salt, page.as_deref()),
        Commands::Session { action } => cmd_session(&config, action).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&cli.config, &config),
    }
}

/// Load the config while only the command-line log flags are known, so
/// warnings raised during loading still reach stderr.
fn load_config(cli: &Cli) -> Result<TrustmeConfig> {
    use tracing_subscriber::EnvFilter;

    let level = cli.log.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let load = || TrustmeConfig::load(&cli.config);

    let loaded = match cli.log_format {
        Some(LogFormat::Json) => {
            let bootstrap = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::with_default(bootstrap, load)
        }
        _ => {
            let bootstrap = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::with_default(bootstrap, load)
        }
    };
    loaded.with_context(|| format!("loading config {}", cli.config.display()))
}

/// Flags win over `[client]`.
fn log_settings(
    flag_level: Option<&str>,
    flag_format: Option<LogFormat>,
    client: &ClientConfig,
) -> (String, LogFormat) {
    let level = flag_level.unwrap_or(&client.log_level).to_string();
    let format = match flag_format {
        Some(format) => format,
        None if client.log_format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    (level, format)
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_seal(salt: &str) -> Result<()> {
    let salt = Salt::from_base64(salt).context("parsing --salt")?;
    let input: SealInput = serde_json::from_str(&read_stdin()?)
        .context("stdin must be a record object or an array of records")?;

    let engine = Pbkdf2AesGcm::new();
    let key = unlock(&engine, &salt)?;

    let output = match input {
        SealInput::One(record) => {
            let sealed = engine.encrypt_record(&record, &key)?;
            serde_json::to_string_pretty(&CreatePasswordRequest::from(sealed))?
        }
        SealInput::Many(records) => {
            let batch = engine.seal_batch(&records, &key)?;
            tracing::info!(records = batch.passwords.len(), "sealed batch");
            serde_json::to_string_pretty(&batch)?
        }
    };
    println!("{output}");
    Ok(())
}

fn cmd_open(salt: &str, page: Option<&str>) -> Result<()> {
    let salt = Salt::from_base64(salt).context("parsing --salt")?;
    let responses: Vec<PasswordResponse> = serde_json::from_str(&read_stdin()?)
        .context("stdin must be a JSON array of stored records")?;
    let mut records: Vec<CredentialRecord> =
        responses.into_iter().map(CredentialRecord::from).collect();

    if let Some(page) = page {
        let total = records.len();
        records = filter_for_domain(&records, page).into_iter().cloned().collect();
        tracing::info!(matching = records.len(), total, "filtered records for page");
    }

    let engine = Pbkdf2AesGcm::new();
    let key = unlock(&engine, &salt)?;

    let opened: Vec<OpenedRecord> = engine
        .decrypt_records(&records, &key)
        .into_iter()
        .map(|record| {
            let failed = record.is_failed();
            let view = record.into_view();
            OpenedRecord {
                id: view.id,
                website_url: view.website_url.clone(),
                username: view.username.clone(),
                password: view.password.expose_secret().to_string(),
                notes: view.notes.clone(),
                failed,
            }
        })
        .collect();

    let failed = opened.iter().filter(|r| r.failed).count();
    if failed > 0 {
        tracing::warn!(failed, total = opened.len(), "some records could not be decrypted");
    }
    println!("{}", serde_json::to_string_pretty(&opened)?);
    Ok(())
}

async fn cmd_session(config: &TrustmeConfig, action: SessionAction) -> Result<()> {
    let manager = SessionKeyManager::from_config(config).context("building session manager")?;
    match action {
        SessionAction::Status => {
            let state = manager.restore().await.context("loading persisted session")?;
            println!("store:    {:?}", config.session.token_store);
            println!("state:    {state}");
            if let Some(username) = manager.username() {
                println!("username: {username}");
            }
        }
        SessionAction::Logout => {
            manager.restore().await.context("loading persisted session")?;
            manager.logout().await;
            println!("session token cleared");
        }
    }
    Ok(())
}

fn cmd_config_show(path: &Path, config: &TrustmeConfig) -> Result<()> {
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config).context("rendering config")?);
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading stdin")?;
    Ok(input)
}

fn master_password() -> Result<SecretString> {
    if let Ok(password) = std::env::var("TRUSTME_MASTER_PASSWORD") {
        return Ok(SecretString::from(password));
    }
    let password = rpassword::prompt_password("Master password: ")
        .context("reading master password")?;
    Ok(SecretString::from(password))
}

fn unlock<E: CryptoEngine>(engine: &E, salt: &Salt) -> Result<DerivedKey> {
    let password = master_password()?;
    let key = engine.derive_key(&password, salt)?;
    Ok(key)
}
