//! Unlock command handler.

use color_eyre::Result;

use crate::migrations::Claims;
use crate::models::Version;

use super::App;

impl App {
    /// Release the claim on `version` left by a run that did not finish.
    pub async fn run_unlock(&self, version: u32) -> Result<()> {
        let version = Version::new(i64::from(version))?;
        let store = self.connect().await?;

        match Claims::new(store).force_release(version).await? {
            Some(claim) => tracing::info!(
                "Released claim on migration {} held by {} since {}",
                version,
                claim.holder,
                claim.claimed_at.to_rfc3339()
            ),
            None => tracing::info!("Migration {} is not claimed", version),
        }

        Ok(())
    }
}
