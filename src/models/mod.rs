//! Documents persisted by the migration system.

mod claim;
mod ledger_entry;
mod version;

pub use claim::Claim;
pub use ledger_entry::LedgerEntry;
pub use version::Version;
