//! Operator CLI
//!
//! Usage:
//!   clinicq migrate
//!   clinicq create-clinic --name "Sunny Clinic" --owner-email owner@sunny.test --owner-name Sam --password ...
//!   clinicq create-admin --email ops@clinicq.test --name Ops --password ...
//!   clinicq hash-password <password>
//!   clinicq issue-token --user-id <uuid> --role STAFF --clinic-id <uuid>
//!   clinicq config

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clinicq::{
    auth::TokenService,
    config::{Config, StorageBackend},
    db, logging, password,
    services::accounts::RegisterRequest,
    state::AppState,
};
use clinicq_core::Role;
use serde_json::json;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[clap(name = "clinicq")]
#[clap(about = "Administer a clinicq deployment", version)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Register a clinic together with its owner account
    CreateClinic {
        #[clap(long)]
        name: String,
        /// Defaults to a slug derived from the name
        #[clap(long)]
        slug: Option<String>,
        #[clap(long)]
        owner_email: String,
        #[clap(long)]
        owner_name: String,
        #[clap(long, env = "CLINICQ_OWNER_PASSWORD")]
        password: String,
    },

    /// Create a platform admin login
    CreateAdmin {
        #[clap(long)]
        email: String,
        #[clap(long)]
        name: String,
        #[clap(long, env = "CLINICQ_ADMIN_PASSWORD")]
        password: String,
    },

    /// Print the Argon2 hash of a password
    HashPassword { password: String },

    /// Sign an access token without a login (support and smoke tests)
    IssueToken {
        #[clap(long)]
        user_id: Uuid,
        /// OWNER, STAFF or PLATFORM_ADMIN
        #[clap(long)]
        role: String,
        #[clap(long)]
        clinic_id: Option<Uuid>,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_simple_logging();
    let args = Args::parse();

    match args.command {
        Command::Migrate => migrate().await,
        Command::CreateClinic {
            name,
            slug,
            owner_email,
            owner_name,
            password,
        } => {
            let state = persistent_state().await?;
            let session = state
                .accounts
                .register(RegisterRequest {
                    clinic_name: name,
                    slug,
                    owner_name,
                    email: owner_email,
                    password,
                })
                .await?;
            print_json(&json!({
                "clinicId": session.clinic.as_ref().map(|c| c.id),
                "slug": session.clinic.as_ref().map(|c| c.slug.as_str()),
                "ownerId": session.user.id,
                "token": session.token,
            }))
        }
        Command::CreateAdmin {
            email,
            name,
            password,
        } => {
            let state = persistent_state().await?;
            let admin = state
                .accounts
                .create_platform_admin(&email, &name, &password)
                .await?;
            print_json(&json!({ "userId": admin.id, "email": admin.email }))
        }
        Command::HashPassword { password } => {
            println!("{}", password::hash_password(&password)?);
            Ok(())
        }
        Command::IssueToken {
            user_id,
            role,
            clinic_id,
        } => {
            let config = load_config()?;
            let role: Role = serde_json::from_value(json!(role.to_ascii_uppercase()))
                .with_context(|| format!("unknown role '{role}'"))?;
            if role != Role::PlatformAdmin && clinic_id.is_none() {
                bail!("--clinic-id is required for clinic roles");
            }
            let token = TokenService::new(&config.auth).issue_for(user_id, clinic_id, role)?;
            println!("{token}");
            Ok(())
        }
        Command::Config => {
            let mut config = load_config()?;
            redact(&mut config.auth.jwt_secret);
            redact(&mut config.billing.webhook_secret);
            if config.database.url.contains('@') {
                redact(&mut config.database.url);
            }
            print_json(&serde_json::to_value(&config)?)
        }
    }
}

fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    Ok(config)
}

/// State over Postgres; bootstrap commands are pointless against the in-memory store.
async fn persistent_state() -> Result<AppState> {
    let config = load_config()?;
    if config.database.backend != StorageBackend::Postgres {
        bail!("this command needs database.backend = \"postgres\"");
    }
    Ok(AppState::new(config)
        .await
        .context("Failed to connect to the database")?)
}

async fn migrate() -> Result<()> {
    let config = load_config()?;
    if config.database.backend != StorageBackend::Postgres {
        bail!("migrations only apply to the postgres backend");
    }
    let mut database = config.database.clone();
    database.run_migrations = true;
    db::connect(&database).await?;
    tracing::info!("Migrations applied");
    Ok(())
}

fn redact(secret: &mut String) {
    if !secret.is_empty() {
        *secret = "<redacted>".to_string();
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
