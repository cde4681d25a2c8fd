//! JSON configuration: server settings and table declarations.
//!
//! ```json
//! {
//!   "server": { "socket": "/tmp/bingo.sock", "sweep_interval_ms": 1000 },
//!   "tables": {
//!     "onlines": {
//!       "fields": { "channelId": "string", "personKey": "string",
//!                   "updatedAt": "integer", "expiresAt": "integer" },
//!       "hashKey": "channelId",
//!       "sortKey": "personKey",
//!       "expireKey": "expiresAt",
//!       "subIndices": { "guest": { "hashKey": "channelId", "sortKey": "updatedAt" } }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::keeper::KeeperConfig;
use crate::types::{FieldSchema, FieldType, Key, TableSchema};

/// Table names that collide with internal bookkeeping.
const RESERVED_TABLE_NAME: &str = "metrics";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BingoConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tables: BTreeMap<String, TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Unix socket path for the server binary.
    pub socket: Option<PathBuf>,
    pub sweep_interval_ms: u64,
    pub metrics_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            sweep_interval_ms: 1_000,
            metrics_interval_ms: 60_000,
        }
    }
}

impl ServerConfig {
    pub fn keeper_config(&self) -> KeeperConfig {
        KeeperConfig::new().with_sweep_interval(Duration::from_millis(self.sweep_interval_ms.max(1)))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TableConfig {
    /// Field name to type name (`"string"` or `"integer"`).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub hash_key: String,
    #[serde(default)]
    pub sort_key: Option<String>,
    #[serde(default)]
    pub expire_key: Option<String>,
    #[serde(default)]
    pub expire_key_required: bool,
    #[serde(default)]
    pub sub_indices: BTreeMap<String, SubIndexConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SubIndexConfig {
    #[serde(default)]
    pub hash_key: String,
    #[serde(default)]
    pub sort_key: Option<String>,
}

impl FromStr for BingoConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}

impl BingoConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        contents.parse()
    }

    /// Validate every table and build its schema.
    pub fn build(&self) -> Result<Vec<Arc<TableSchema>>, ConfigError> {
        if self.tables.is_empty() {
            return Err(ConfigError::EmptyTables);
        }

        let mut schemas = Vec::with_capacity(self.tables.len());
        for (name, table) in &self.tables {
            if name.is_empty() {
                warn!("skipping table with empty name");
                continue;
            }
            schemas.push(Arc::new(table.build(name)?));
        }
        if schemas.is_empty() {
            return Err(ConfigError::EmptyTables);
        }
        Ok(schemas)
    }
}

impl TableConfig {
    fn build(&self, name: &str) -> Result<TableSchema, ConfigError> {
        if name.starts_with('_') || name == RESERVED_TABLE_NAME {
            return Err(ConfigError::ReservedTableName(name.to_string()));
        }
        if self.fields.is_empty() {
            return Err(ConfigError::EmptyFields(name.to_string()));
        }

        let mut fields = BTreeMap::new();
        for (field, type_name) in &self.fields {
            let field_type = type_name
                .parse::<FieldType>()
                .map_err(|field_type| ConfigError::UnknownFieldType {
                    table: name.to_string(),
                    field: field.clone(),
                    field_type,
                })?;
            fields.insert(field.clone(), FieldSchema::new(field.clone(), field_type));
        }

        let primary_key = build_key(name, &fields, &self.hash_key, self.sort_key.as_deref(), "hashKey", "sortKey")?;

        let mut sub_index_keys = BTreeMap::new();
        for (index, sub) in &self.sub_indices {
            let key = build_key(
                name,
                &fields,
                &sub.hash_key,
                sub.sort_key.as_deref(),
                &format!("hashKey of sub-index '{index}'"),
                &format!("sortKey of sub-index '{index}'"),
            )?;
            sub_index_keys.insert(index.clone(), key);
        }

        let expire_field = match non_empty(self.expire_key.as_deref()) {
            Some(expire_key) => {
                let field = lookup(name, &fields, expire_key, "expireKey")?;
                if field.field_type != FieldType::Integer {
                    return Err(ConfigError::ExpireKeyNotInteger {
                        table: name.to_string(),
                        field: field.name.clone(),
                        field_type: field.field_type,
                    });
                }
                Some(field)
            }
            None if self.expire_key_required => {
                return Err(ConfigError::ExpireKeyRequiredWithoutField(name.to_string()));
            }
            None => None,
        };

        Ok(TableSchema {
            name: name.to_string(),
            fields,
            primary_key,
            sub_index_keys,
            expire_field,
            expire_key_required: self.expire_key_required,
        })
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

fn lookup(
    table: &str,
    fields: &BTreeMap<String, FieldSchema>,
    field: &str,
    role: &str,
) -> Result<FieldSchema, ConfigError> {
    if field.is_empty() {
        return Err(ConfigError::MissingKey {
            table: table.to_string(),
            role: role.to_string(),
        });
    }
    fields
        .get(field)
        .cloned()
        .ok_or_else(|| ConfigError::UndefinedField {
            table: table.to_string(),
            field: field.to_string(),
            role: role.to_string(),
        })
}

fn build_key(
    table: &str,
    fields: &BTreeMap<String, FieldSchema>,
    hash_key: &str,
    sort_key: Option<&str>,
    hash_role: &str,
    sort_role: &str,
) -> Result<Key, ConfigError> {
    let hash_field = lookup(table, fields, hash_key, hash_role)?;
    let sort_field = match non_empty(sort_key) {
        Some(sort_key) if sort_key == hash_key => {
            return Err(ConfigError::SameHashAndSortKey(table.to_string()));
        }
        Some(sort_key) => Some(lookup(table, fields, sort_key, sort_role)?),
        None => None,
    };
    Ok(Key::new(hash_field, sort_field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ONLINES: &str = r#"{
        "server": {"socket": "/tmp/bingo.sock", "sweep_interval_ms": 250},
        "tables": {
            "onlines": {
                "fields": {
                    "channelId": "string",
                    "personKey": "string",
                    "updatedAt": "integer",
                    "expiresAt": "integer"
                },
                "hashKey": "channelId",
                "sortKey": "personKey",
                "expireKey": "expiresAt",
                "subIndices": {"guest": {"hashKey": "channelId", "sortKey": "updatedAt"}}
            }
        }
    }"#;

    fn table_error(table: &str) -> ConfigError {
        let config: BingoConfig = format!(r#"{{"tables": {{"weird": {table}}}}}"#).parse().unwrap();
        config.build().unwrap_err()
    }

    #[test]
    fn test_build_onlines() {
        let config: BingoConfig = ONLINES.parse().unwrap();
        let schemas = config.build().unwrap();
        assert_eq!(schemas.len(), 1);

        let schema = &schemas[0];
        assert_eq!(schema.name, "onlines");
        assert_eq!(schema.hash_field().name, "channelId");
        assert_eq!(schema.sort_field().unwrap().name, "personKey");
        assert_eq!(schema.expire_field.as_ref().unwrap().field_type, FieldType::Integer);
        let guest = &schema.sub_index_keys["guest"];
        assert_eq!(guest.sort_field.as_ref().unwrap().name, "updatedAt");

        assert_eq!(config.server.socket, Some(PathBuf::from("/tmp/bingo.sock")));
        assert_eq!(config.server.keeper_config().sweep_interval, Duration::from_millis(250));
        assert_eq!(config.server.metrics_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ONLINES.as_bytes()).unwrap();
        let config = BingoConfig::from_file(file.path()).unwrap();
        assert!(config.tables.contains_key("onlines"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BingoConfig::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_empty_tables() {
        let config: BingoConfig = "{}".parse().unwrap();
        assert!(matches!(config.build(), Err(ConfigError::EmptyTables)));
        let config: BingoConfig = r#"{"tables": {}}"#.parse().unwrap();
        assert!(matches!(config.build(), Err(ConfigError::EmptyTables)));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = r#"{"tables": {"weird": {"weird": "weird", "fields": {"id": "string"}, "hashKey": "id"}}}"#
            .parse::<BingoConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_reserved_names() {
        for name in ["_name", "metrics"] {
            let config: BingoConfig = format!(
                r#"{{"tables": {{"{name}": {{"fields": {{"id": "string"}}, "hashKey": "id"}}}}}}"#
            )
            .parse()
            .unwrap();
            assert!(matches!(config.build(), Err(ConfigError::ReservedTableName(n)) if n == name));
        }
    }

    #[test]
    fn test_field_errors() {
        assert!(matches!(table_error(r#"{"hashKey": "id"}"#), ConfigError::EmptyFields(_)));
        assert!(matches!(
            table_error(r#"{"fields": {"id": "string", "email": "weird"}, "hashKey": "id"}"#),
            ConfigError::UnknownFieldType { field, field_type, .. } if field == "email" && field_type == "weird"
        ));
    }

    #[test]
    fn test_key_errors() {
        assert!(matches!(
            table_error(r#"{"fields": {"id": "string"}}"#),
            ConfigError::MissingKey { role, .. } if role == "hashKey"
        ));
        assert!(matches!(
            table_error(r#"{"fields": {"id": "string"}, "hashKey": "name"}"#),
            ConfigError::UndefinedField { field, .. } if field == "name"
        ));
        assert!(matches!(
            table_error(r#"{"fields": {"id": "string"}, "hashKey": "id", "sortKey": "id"}"#),
            ConfigError::SameHashAndSortKey(_)
        ));
        assert!(matches!(
            table_error(r#"{"fields": {"id": "string"}, "hashKey": "id", "sortKey": "name"}"#),
            ConfigError::UndefinedField { role, .. } if role == "sortKey"
        ));
        assert!(matches!(
            table_error(r#"{"fields": {"id": "string"}, "hashKey": "id", "subIndices": {"by": {"hashKey": "nope"}}}"#),
            ConfigError::UndefinedField { role, .. } if role.contains("'by'")
        ));
    }

    #[test]
    fn test_expire_key_errors() {
        assert!(matches!(
            table_error(r#"{"fields": {"id": "string", "at": "string"}, "hashKey": "id", "expireKey": "at"}"#),
            ConfigError::ExpireKeyNotInteger { field_type: FieldType::String, .. }
        ));
        assert!(matches!(
            table_error(r#"{"fields": {"id": "string"}, "hashKey": "id", "expireKeyRequired": true}"#),
            ConfigError::ExpireKeyRequiredWithoutField(_)
        ));
    }

    #[test]
    fn test_hash_only_table_without_expiry() {
        let config: BingoConfig = r#"{"tables": {"users": {"fields": {"id": "string"}, "hashKey": "id", "sortKey": ""}}}"#
            .parse()
            .unwrap();
        let schemas = config.build().unwrap();
        assert!(schemas[0].sort_field().is_none());
        assert!(schemas[0].expire_field.is_none());
    }
}
