//! Results of schema commands.

use mongodb::bson::{doc, Bson, Document};

/// Server error codes the migration system reacts to.
pub mod codes {
    pub const NAMESPACE_NOT_FOUND: i32 = 26;
    pub const INDEX_NOT_FOUND: i32 = 27;
    pub const NAMESPACE_EXISTS: i32 = 48;
    pub const INVALID_OPTIONS: i32 = 72;
    pub const INDEX_OPTIONS_CONFLICT: i32 = 85;
    pub const DOCUMENT_VALIDATION_FAILURE: i32 = 121;
    pub const DUPLICATE_KEY: i32 = 11000;
}

/// Result of a schema command: a success flag plus the server's payload.
///
/// Successful payloads carry `ok: 1` and command details (e.g. `createdIndex`);
/// failed payloads carry `ok: 0`, `code`, `codeName` and `errmsg`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Ok(Document),
    Failed(Document),
}

impl CommandOutcome {
    /// A successful outcome; `ok: 1` is prepended to `details`.
    pub fn success(details: Document) -> Self {
        let mut payload = doc! { "ok": 1 };
        for (key, value) in details {
            payload.insert(key, value);
        }
        Self::Ok(payload)
    }

    /// A failed outcome in the server's error shape.
    pub fn failure(code: i32, code_name: &str, message: impl Into<String>) -> Self {
        Self::Failed(doc! {
            "ok": 0,
            "errmsg": message.into(),
            "code": code,
            "codeName": code_name,
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn payload(&self) -> &Document {
        match self {
            Self::Ok(payload) | Self::Failed(payload) => payload,
        }
    }

    /// Converts into a `Result`, building the error from the failure payload
    /// rendered as JSON.
    pub fn into_result<E>(self, err: impl FnOnce(String) -> E) -> Result<Document, E> {
        match self {
            Self::Ok(payload) => Ok(payload),
            Self::Failed(payload) => Err(err(to_json(&payload))),
        }
    }
}

/// Renders a document as relaxed extended JSON.
pub fn to_json(document: &Document) -> String {
    let value: serde_json::Value = Bson::Document(document.clone()).into_relaxed_extjson();
    value.to_string()
}
