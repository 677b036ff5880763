//! cast-creds - Credential maintenance for Crosscast
//!
//! Generates the token encryption key, encrypts legacy plaintext token
//! columns and reports where every connected account's tokens stand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use libcrosscast::config::ENV_ENCRYPTION_KEY;
use libcrosscast::logging::LoggingConfig;
use libcrosscast::tokens::TokenState;
use libcrosscast::vault::is_encrypted_format;
use libcrosscast::{Config, ConnectedAccount, CredentialVault, CrosscastError, Database, Secrets};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cast-creds")]
#[command(version)]
#[command(about = "Manage Crosscast token encryption and connected account credentials")]
#[command(long_about = "\
cast-creds - Manage Crosscast token encryption and connected account credentials

COMMANDS:
    generate-key  Print a new random key for CROSSCAST_ENCRYPTION_KEY
    migrate       Encrypt token columns still stored as plaintext
    status        Show the token state of every connected account

USAGE EXAMPLES:
    # Create a key (store it in your secret manager, not in config.toml)
    export CROSSCAST_ENCRYPTION_KEY=$(cast-creds generate-key)

    # See what a migration would change
    cast-creds migrate --dry-run

    # Accounts needing attention, as JSON
    cast-creds status --format json

EXIT CODES:
    0 - Success
    1 - Operation failed, or some accounts hold unreadable tokens
    2 - Database, configuration or key error
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a new random 32-byte key, hex encoded
    GenerateKey,

    /// Encrypt plaintext token columns in place
    Migrate {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the token state of every connected account
    Status {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::from_env("warn", cli.verbose).init();

    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<CrosscastError>()
            .map(CrosscastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::GenerateKey => {
            println!("{}", CredentialVault::generate_key().expose_secret());
            Ok(())
        }
        Commands::Migrate { dry_run } => {
            let config = Config::load_or_default(cli.config.as_deref())?;
            let vault = load_vault()?;
            let db = Database::new(&config.database.path).await?;
            let report = migrate(&db, &vault, dry_run).await?;

            let verb = if dry_run { "Would encrypt" } else { "Encrypted" };
            println!("{} {} token column(s)", verb, report.encrypted);
            println!("Already encrypted: {}", report.already_encrypted);
            for (account_id, reason) in &report.unreadable {
                println!("Unreadable: {} ({})", account_id, reason);
            }
            if !report.unreadable.is_empty() {
                anyhow::bail!(
                    "{} account(s) hold envelopes this key cannot open",
                    report.unreadable.len()
                );
            }
            Ok(())
        }
        Commands::Status { format } => {
            let config = Config::load_or_default(cli.config.as_deref())?;
            let db = Database::new(&config.database.path).await?;
            let now = chrono::Utc::now().timestamp();
            let rows: Vec<AccountStatus> = db
                .list_accounts()
                .await?
                .iter()
                .map(|a| AccountStatus::of(a, now, config.tokens.refresh_threshold_secs))
                .collect();

            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&rows).context("Failed to render JSON")?
                ),
                OutputFormat::Text => print_status(&rows, now),
            }
            Ok(())
        }
    }
}

fn load_vault() -> Result<CredentialVault> {
    let secrets = Secrets::from_env();
    let key = secrets.encryption_key().with_context(|| {
        format!("{} must be set; create one with `cast-creds generate-key`", ENV_ENCRYPTION_KEY)
    })?;
    Ok(CredentialVault::from_encoded_key(key)?)
}

#[derive(Debug, Default)]
struct MigrationReport {
    /// Plaintext columns sealed (or that would be, on a dry run)
    encrypted: usize,
    already_encrypted: usize,
    /// Accounts whose envelopes do not open with the current key
    unreadable: Vec<(String, String)>,
}

/// Seal every plaintext token column. Envelopes are test-decrypted so a
/// wrong key shows up here rather than at publish time.
async fn migrate(db: &Database, vault: &CredentialVault, dry_run: bool) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    let now = chrono::Utc::now().timestamp();

    for account in db.list_accounts().await? {
        let mut changed = false;
        let mut unreadable = None;

        let mut seal = |column: &str| -> Result<String> {
            if is_encrypted_format(column) {
                report.already_encrypted += 1;
                if let Err(e) = vault.decrypt(column) {
                    unreadable = Some(e.to_string());
                }
                return Ok(column.to_string());
            }
            report.encrypted += 1;
            changed = true;
            Ok(vault.encrypt(column)?)
        };

        let access = seal(&account.access_token_enc)?;
        let refresh = account
            .refresh_token_enc
            .as_deref()
            .map(&mut seal)
            .transpose()?;

        if let Some(reason) = unreadable {
            tracing::warn!(account_id = %account.id, "Stored token does not decrypt");
            report.unreadable.push((account.id.clone(), reason));
            continue;
        }
        if changed && !dry_run {
            db.replace_token_columns(&account.id, &access, refresh.as_deref(), now)
                .await?;
            tracing::info!(account_id = %account.id, platform = %account.platform, "Token columns encrypted");
        }
    }

    Ok(report)
}

#[derive(Debug, Serialize)]
struct AccountStatus {
    account_id: String,
    user_id: String,
    platform: String,
    username: Option<String>,
    state: TokenState,
    token_expires_at: Option<i64>,
    has_refresh_token: bool,
    /// False while a token column still holds legacy plaintext
    encrypted: bool,
    last_error: Option<String>,
}

impl AccountStatus {
    fn of(account: &ConnectedAccount, now: i64, threshold_secs: i64) -> Self {
        Self {
            account_id: account.id.clone(),
            user_id: account.user_id.clone(),
            platform: account.platform.to_string(),
            username: account.platform_username.clone(),
            state: TokenState::of(account, now, threshold_secs),
            token_expires_at: account.token_expires_at,
            has_refresh_token: account.refresh_token_enc.is_some(),
            encrypted: is_encrypted_format(&account.access_token_enc)
                && account
                    .refresh_token_enc
                    .as_deref()
                    .map_or(true, is_encrypted_format),
            last_error: account.last_error.clone(),
        }
    }
}

fn print_status(rows: &[AccountStatus], now: i64) {
    if rows.is_empty() {
        println!("No connected accounts");
        return;
    }

    for row in rows {
        let state = match row.state {
            TokenState::Valid => "valid",
            TokenState::Refreshing => "needs refresh",
            TokenState::ExpiredUnrecoverable => "reconnect required",
        };
        let expiry = match row.token_expires_at {
            Some(at) if at > now => format!("expires in {}m", (at - now) / 60),
            Some(_) => "expired".to_string(),
            None => "no expiry".to_string(),
        };
        println!(
            "{} | {} | {} | {} | {}{}",
            row.account_id,
            row.platform,
            row.username.as_deref().unwrap_or(&row.user_id),
            state,
            expiry,
            if row.encrypted { "" } else { " | PLAINTEXT" }
        );
        if let Some(error) = &row.last_error {
            println!("    last error: {}", error);
        }
    }
}
