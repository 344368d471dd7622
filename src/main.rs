//! busgate CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use busgate::auth::GrantManager;
use busgate::issuance::TokenIssuer;
use busgate::registry::User;
use busgate::server::{run_server, AppState};
use busgate::storage::{CredentialStore, PostgresConfig, PostgresStore};
use busgate::{crypto, provision};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let get_db_config = || -> Result<PostgresConfig> {
        if let Some(url) = &cli.database_url {
            PostgresConfig::from_url(url).context("Invalid DATABASE_URL")
        } else {
            PostgresConfig::from_env().context("DATABASE_URL not set")
        }
    };

    match cli.command {
        Commands::Serve { bind } => serve(get_db_config()?, bind).await,
        Commands::Init => init(get_db_config()?).await,
        Commands::Status => status(get_db_config()?).await,
        Commands::Admin { name, secret } => admin(get_db_config()?, name, secret).await,
        Commands::Grant { client, buses } => grant(get_db_config()?, client, buses).await,
        Commands::Revoke { client, buses } => revoke(get_db_config()?, client, buses).await,
        Commands::Grants { clients } => grants(get_db_config()?, clients).await,
        Commands::Code { client, buses } => code(get_db_config()?, client, buses).await,
    }
}

async fn connect(db_config: PostgresConfig) -> Result<Arc<dyn CredentialStore>> {
    Ok(Arc::new(PostgresStore::new(db_config).await?))
}

async fn serve(db_config: PostgresConfig, bind: String) -> Result<()> {
    let store = connect(db_config).await?;
    let bind_addr = bind.parse().context("Invalid bind address")?;
    let state = AppState::new(store);

    info!("Starting busgate server...");

    // Run server with graceful shutdown on ctrl-c
    tokio::select! {
        result = run_server(bind_addr, state) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping server");
        }
    }

    Ok(())
}

async fn init(db_config: PostgresConfig) -> Result<()> {
    let _store = PostgresStore::new(db_config).await?;
    println!("Database schema initialized successfully");
    Ok(())
}

async fn status(db_config: PostgresConfig) -> Result<()> {
    let _store = PostgresStore::new(db_config).await?;

    println!("busgate Status");
    println!("==============");
    println!("Database: Connected");

    Ok(())
}

async fn admin(db_config: PostgresConfig, name: String, secret: String) -> Result<()> {
    let store = connect(db_config).await?;

    let pwd_hash = crypto::hash_secret(&secret);
    store.put_user(&User::new(name.as_str(), pwd_hash.as_str())).await?;

    println!("Admin user: {}", name);
    println!("PWDHASH: {}", pwd_hash);

    Ok(())
}

async fn grant(db_config: PostgresConfig, client: String, buses: Vec<String>) -> Result<()> {
    let store = connect(db_config).await?;
    let manager = GrantManager::new(store);

    manager.add_grants(&client, &buses).await?;

    println!("{}: {}", client, provision::GRANT_UPDATE_SUCCESS);
    for bus in buses {
        println!("  + {}", bus);
    }

    Ok(())
}

async fn revoke(db_config: PostgresConfig, client: String, buses: Vec<String>) -> Result<()> {
    let store = connect(db_config).await?;
    let manager = GrantManager::new(store);

    manager.revoke_grants(&client, &buses).await?;

    println!("{}: {}", client, provision::GRANT_UPDATE_SUCCESS);
    for bus in buses {
        println!("  - {}", bus);
    }

    Ok(())
}

async fn grants(db_config: PostgresConfig, clients: Vec<String>) -> Result<()> {
    let store = connect(db_config).await?;
    let manager = GrantManager::new(store);

    let listing = manager.list_grants(&clients).await?;
    if listing.is_empty() {
        println!("(no grants)");
        return Ok(());
    }

    for (client, per_rel) in listing {
        println!("{}:", client);
        for (rel_id, buses) in per_rel {
            println!("  {} -> {}", rel_id, buses);
        }
    }

    Ok(())
}

async fn code(db_config: PostgresConfig, client: String, buses: Vec<String>) -> Result<()> {
    let store = connect(db_config).await?;
    let issuer = TokenIssuer::new(store);

    let code = issuer.grant_code(&client, &buses).await?;

    println!("{}", code.id());
    println!("Scope: {}", code.scope_string());
    if let Some(expires) = code.expires() {
        println!("Expires: {} (epoch seconds)", expires);
    }

    Ok(())
}
