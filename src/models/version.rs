//! Migration version numbers.

use mongodb::bson::Bson;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A migration version normalized to the fixed-width integer stored in the
/// ledger (BSON `int`). Always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Version(i32);

impl Version {
    /// Normalizes a raw version number.
    pub fn new(raw: i64) -> Result<Self, AppError> {
        match i32::try_from(raw) {
            Ok(v) if v >= 1 => Ok(Self(v)),
            _ => Err(AppError::InvalidVersion(raw)),
        }
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for Version {
    type Error = AppError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(i64::from(value))
    }
}

impl From<Version> for i32 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl From<Version> for Bson {
    fn from(version: Version) -> Self {
        Bson::Int32(version.0)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
