//! Error taxonomy for the binding engine.
//!
//! Nothing here is fatal. Every failure is logged at the point it happens and the
//! surrounding render/update/dispatch continues with the next record.

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_MALFORMED_PATH: &str = "Z-BIND-PATH-001";
pub const ERR_TYPE_ASSERTION: &str = "Z-BIND-PATH-002";
pub const ERR_INDEX_OUT_OF_RANGE: &str = "Z-BIND-PATH-003";
pub const ERR_NOT_AN_ARRAY: &str = "Z-BIND-STORE-001";
pub const ERR_NO_MATCH: &str = "Z-BIND-STORE-002";
pub const ERR_MISSING_BINDING: &str = "Z-BIND-RENDER-001";
pub const ERR_INVALID_VIEW: &str = "Z-BIND-RENDER-002";
pub const ERR_UNKNOWN_EVALUATOR: &str = "Z-BIND-EVAL-001";
pub const ERR_IMPORT_FAILED: &str = "Z-BIND-IMPORT-001";
pub const ERR_UNRESOLVED_REF: &str = "Z-BIND-REF-001";
pub const ERR_PAYLOAD: &str = "Z-BIND-HYDRATE-001";
pub const ERR_TRANSPORT: &str = "Z-BIND-SYNC-001";
pub const ERR_CONFIG: &str = "Z-BIND-CONFIG-001";

/// Which bucket of the taxonomy an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A template author or caller mistake. Logged, operation aborted.
    UserInput,
    /// A module, evaluator or opaque id could not be resolved.
    Resolution,
    /// Outbound sync failed.
    Transport,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BindingError {
    #[error("malformed binding path {path:?}: a non-empty path is required")]
    MalformedPath { path: String },

    #[error("cannot descend into {path}: found a {found} where a container is required")]
    TypeAssertion { path: String, found: &'static str },

    #[error("index {index} under {path} is too far past the end of an array of length {len}")]
    IndexOutOfRange { path: String, index: usize, len: usize },

    #[error("value at {path} is a {found}, not an array")]
    NotAnArray { path: String, found: &'static str },

    #[error("no element of {path} matches {query}")]
    NoMatch { path: String, query: String },

    #[error("property {property:?} on <{tag}> is an evaluator but the node declares no binding")]
    MissingBinding { tag: String, property: String },

    #[error("invalid view node {node}: {reason}")]
    InvalidView { node: String, reason: String },

    #[error("no evaluator registered under {key:?}")]
    UnknownEvaluator { key: String },

    #[error("failed to load module {locator:?}: {reason}")]
    ImportFailed { locator: String, reason: String },

    #[error("opaque reference {id:?} does not resolve to a live node")]
    UnresolvedRef { id: String },

    #[error("resume payload rejected: {reason}")]
    Payload { reason: String },

    #[error("sync to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("invalid engine config: {reason}")]
    Config { reason: String },
}

impl BindingError {
    /// Stable diagnostic code, suitable for matching in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedPath { .. } => ERR_MALFORMED_PATH,
            Self::TypeAssertion { .. } => ERR_TYPE_ASSERTION,
            Self::IndexOutOfRange { .. } => ERR_INDEX_OUT_OF_RANGE,
            Self::NotAnArray { .. } => ERR_NOT_AN_ARRAY,
            Self::NoMatch { .. } => ERR_NO_MATCH,
            Self::MissingBinding { .. } => ERR_MISSING_BINDING,
            Self::InvalidView { .. } => ERR_INVALID_VIEW,
            Self::UnknownEvaluator { .. } => ERR_UNKNOWN_EVALUATOR,
            Self::ImportFailed { .. } => ERR_IMPORT_FAILED,
            Self::UnresolvedRef { .. } => ERR_UNRESOLVED_REF,
            Self::Payload { .. } => ERR_PAYLOAD,
            Self::Transport { .. } => ERR_TRANSPORT,
            Self::Config { .. } => ERR_CONFIG,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedPath { .. }
            | Self::TypeAssertion { .. }
            | Self::IndexOutOfRange { .. }
            | Self::NotAnArray { .. }
            | Self::NoMatch { .. }
            | Self::MissingBinding { .. }
            | Self::InvalidView { .. }
            | Self::Config { .. } => ErrorClass::UserInput,
            Self::UnknownEvaluator { .. }
            | Self::ImportFailed { .. }
            | Self::UnresolvedRef { .. }
            | Self::Payload { .. } => ErrorClass::Resolution,
            Self::Transport { .. } => ErrorClass::Transport,
        }
    }
}

/// Short type name of a JSON value, used in error messages.
pub(crate) fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_classes() {
        let err = BindingError::NotAnArray {
            path: "todos".to_string(),
            found: "string",
        };
        assert_eq!(err.code(), "Z-BIND-STORE-001");
        assert_eq!(err.class(), ErrorClass::UserInput);
        assert_eq!(err.to_string(), "value at todos is a string, not an array");

        let err = BindingError::UnresolvedRef {
            id: "zr4".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Resolution);
    }
}
