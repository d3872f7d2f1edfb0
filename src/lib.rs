//! docmigrate - run-once schema migrations for MongoDB
//!
//! Each migration records its version in a ledger collection and is skipped
//! once recorded.

pub mod cli;
pub mod config;
pub mod error;
pub mod migrations;
pub mod models;
pub mod store;
