//! Migrate command handler.

use color_eyre::Result;

use crate::migrations::run_migrations;

use super::App;

impl App {
    /// Run every registered migration that is not yet recorded.
    pub async fn run_migrate(&self) -> Result<()> {
        let store = self.connect().await?;

        tracing::info!("Running migrations...");
        let result = run_migrations(store).await?;

        if result.applied.is_empty() {
            tracing::info!("Database up to date, no migrations needed");
        } else {
            tracing::info!("Applied migrations: {:?}", result.applied);
        }

        Ok(())
    }
}
