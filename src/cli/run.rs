//! Run command handler.

use color_eyre::Result;

use crate::migrations::{create_register, Runner};

use super::App;

impl App {
    /// Run a single registered migration.
    pub async fn run_one(&self, version: u32) -> Result<()> {
        let register = create_register();
        register.check()?;

        let store = self.connect().await?;
        register.run_one(&Runner::new(store), version).await?;

        Ok(())
    }
}
