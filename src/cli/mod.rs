//! CLI module for docmigrate.
//!
//! Subcommands:
//! - `migrate`: Run every pending migration in version order
//! - `run`: Run a single migration by version
//! - `status`: Show applied and pending migrations
//! - `unlock`: Release a claim left behind by a killed run

mod migrate;
mod run;
mod status;
mod unlock;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;

use crate::config::Config;
use crate::store::backends::MongoStore;
use crate::store::DocumentStore;

/// docmigrate - run-once MongoDB schema migrations
#[derive(Parser)]
#[command(name = "docmigrate")]
#[command(about = "Idempotent schema migrations for MongoDB")]
#[command(version)]
pub struct App {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run all pending migrations
    Migrate,

    /// Run one migration, unless it is already recorded
    Run {
        /// Migration version
        version: u32,
    },

    /// List migrations and whether they have been applied
    Status,

    /// Release the execution claim on a version
    Unlock {
        /// Migration version
        version: u32,
    },
}

impl App {
    /// Run the CLI application.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Migrate => self.run_migrate().await,
            Command::Run { version } => self.run_one(version).await,
            Command::Status => self.run_status().await,
            Command::Unlock { version } => self.run_unlock(version).await,
        }
    }

    /// Load configuration and connect to the configured database.
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        let config = Config::load()?;

        tracing::info!("Connecting to MongoDB at {}", redact(&config.mongodb.url));
        let store = MongoStore::connect(&config.mongodb).await?;
        tracing::info!("Connected to database '{}'", store.database_name());

        Ok(Arc::new(store))
    }
}

/// Hides the password in a connection string for logging.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}
