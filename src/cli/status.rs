//! Status command handler.

use std::collections::BTreeMap;

use color_eyre::Result;

use crate::migrations::{create_register, Claims, Ledger, LEDGER_COLLECTION};
use crate::models::Version;

use super::App;

impl App {
    /// Print each registered migration with its ledger state.
    pub async fn run_status(&self) -> Result<()> {
        let store = self.connect().await?;

        let ledger = Ledger::new(store.clone());
        if !ledger.exists().await? {
            println!("Ledger collection '{}' does not exist yet", LEDGER_COLLECTION);
        }

        let mut recorded: BTreeMap<i32, _> = ledger
            .entries()
            .await?
            .into_iter()
            .map(|entry| (entry.version.get(), entry))
            .collect();
        let claims = Claims::new(store);

        println!("{:>7}  {:<32}  STATE", "VERSION", "MIGRATION");
        for migration in create_register().iter() {
            let version = Version::new(i64::from(migration.version()))?;
            let state = match recorded.remove(&version.get()) {
                Some(entry) => format!("applied {}", entry.created_at.to_rfc3339()),
                None => match claims.current(version).await? {
                    Some(claim) => format!("running (claimed by {})", claim.holder),
                    None => "pending".to_string(),
                },
            };
            println!("{:>7}  {:<32}  {}", version, migration.id(), state);
        }

        // Entries written by migrations this binary does not know about.
        for (version, entry) in recorded {
            println!(
                "{:>7}  {:<32}  applied {}",
                version,
                "(unknown)",
                entry.created_at.to_rfc3339()
            );
        }

        Ok(())
    }
}
