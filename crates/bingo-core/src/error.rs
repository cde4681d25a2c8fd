//! Error types for all BingoDB operations.

use std::io;
use thiserror::Error;

use crate::types::FieldType;

/// Top-level error type for BingoDB operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("field '{field}' is defined as {declared_type} type but value '{raw}' cannot be parsed")]
    FieldParse {
        field: String,
        declared_type: FieldType,
        raw: serde_json::Value,
    },

    #[error("expected a JSON object, got {0}")]
    NotAnObject(serde_json::Value),

    #[error("set or setOnInsert are required")]
    SetOrInsertMissing,

    #[error("hash key is missing in set")]
    HashKeyMissing,

    #[error("sort key is missing in set")]
    SortKeyMissing,

    #[error("expire key is missing in set")]
    ExpireKeyMissing,

    #[error("document not found")]
    DocumentNotFound,

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while turning a configuration into table schemas.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("table cannot be empty")]
    EmptyTables,

    #[error("table '{0}': name starting with '_' or named 'metrics' is reserved")]
    ReservedTableName(String),

    #[error("table '{0}': fields cannot be empty")]
    EmptyFields(String),

    #[error("table '{table}': unknown field type '{field_type}' in '{field}'")]
    UnknownFieldType {
        table: String,
        field: String,
        field_type: String,
    },

    #[error("table '{table}': undefined field '{field}' for {role}")]
    UndefinedField {
        table: String,
        field: String,
        role: String,
    },

    #[error("table '{table}': {role} cannot be empty")]
    MissingKey { table: String, role: String },

    #[error("table '{0}': hashKey and sortKey must be different")]
    SameHashAndSortKey(String),

    #[error("table '{table}': only integer type can be used for expireKey, '{field}' is {field_type}")]
    ExpireKeyNotInteger {
        table: String,
        field: String,
        field_type: FieldType,
    },

    #[error("table '{0}': expireKeyRequired is set but no expireKey is declared")]
    ExpireKeyRequiredWithoutField(String),
}

impl Error {
    /// Stable numeric code, shared with the wire protocol.
    pub fn code(&self) -> u16 {
        match self {
            Error::FieldParse { .. } => 100,
            Error::NotAnObject(_) => 101,
            Error::SetOrInsertMissing => 200,
            Error::HashKeyMissing => 300,
            Error::SortKeyMissing => 301,
            Error::ExpireKeyMissing => 302,
            Error::DocumentNotFound => 400,
            Error::IndexNotFound(_) => 401,
            Error::TableNotFound(_) => 402,
            Error::Config(_) => 500,
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::FieldParse { .. } => "FieldParseError",
            Error::NotAnObject(_) => "NotAnObject",
            Error::SetOrInsertMissing => "SetOrInsertMissing",
            Error::HashKeyMissing => "HashKeyMissing",
            Error::SortKeyMissing => "SortKeyMissing",
            Error::ExpireKeyMissing => "ExpireKeyMissing",
            Error::DocumentNotFound => "DocumentNotFound",
            Error::IndexNotFound(_) => "IndexNotFound",
            Error::TableNotFound(_) => "TableNotFound",
            Error::Config(_) => "ConfigError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_parse_message() {
        let err = Error::FieldParse {
            field: "age".to_string(),
            declared_type: FieldType::Integer,
            raw: json!("abc"),
        };
        assert_eq!(
            err.to_string(),
            "field 'age' is defined as integer type but value '\"abc\"' cannot be parsed"
        );
        assert_eq!(err.code(), 100);
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            Error::NotAnObject(json!(1)),
            Error::SetOrInsertMissing,
            Error::HashKeyMissing,
            Error::SortKeyMissing,
            Error::ExpireKeyMissing,
            Error::DocumentNotFound,
            Error::IndexNotFound("guest".to_string()),
            Error::TableNotFound("onlines".to_string()),
        ];
        let mut codes: Vec<u16> = errors.iter().map(Error::code).collect();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_config_error_converts() {
        let err: Error = ConfigError::EmptyTables.into();
        assert_eq!(err.kind(), "ConfigError");
        assert_eq!(err.to_string(), "table cannot be empty");
    }
}
