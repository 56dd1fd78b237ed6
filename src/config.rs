//! Compiler configuration.
//!
//! A [`CompilerConfig`] is handed to [`crate::compiler::QueryEngine::new`]
//! and fixed for the engine's lifetime. Every setting has a documented
//! default; configs can be loaded from JSON or from `RELQ_*` environment
//! variables.

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Target SQL dialect.
///
/// Drives identifier quoting, parameter placeholders, row limiting,
/// the boolean surrogate type and function spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// `[ident]`, `@p0`, `TOP (n)` / `OFFSET n ROWS FETCH NEXT m ROWS ONLY`,
    /// booleans as `BIT`.
    #[default]
    SqlServer,
    /// `"ident"`, `$1`, `LIMIT m OFFSET n`, native `boolean`.
    Postgres,
    /// `"ident"`, `?1`, `LIMIT m OFFSET n`, booleans as integers.
    Sqlite,
}

impl Dialect {
    pub fn parse(s: &str) -> Option<Dialect> {
        match s.to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "tsql" => Some(Dialect::SqlServer),
            "postgres" | "postgresql" | "pg" => Some(Dialect::Postgres),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    /// Whether the dialect has a first-class boolean column type.
    pub fn has_native_boolean(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Whether correlated lateral joins (APPLY) can be emitted.
    pub fn supports_apply(self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }
}

/// Plan cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every call compiles from scratch.
    pub enabled: bool,
    /// Maximum number of cached plans. Exceeding it clears the cache.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            capacity: 1024,
        }
    }
}

/// Settings that shape how queries are compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Target dialect. Default: SQL Server.
    pub dialect: Dialect,
    /// Whether nested sequence-valued queries in a projection count as
    /// server-translatable. When false (the default) they are classified
    /// as client work and executed once per outer row.
    pub supports_complex_nested_queries: bool,
    /// Whether string literals become parameters. Default: true.
    ///
    /// Turning this off inlines strings into the SQL text and makes them
    /// part of the cache key, so each distinct literal compiles its own plan.
    pub parameterize_strings: bool,
    pub cache: CacheConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            dialect: Dialect::default(),
            supports_complex_nested_queries: false,
            parameterize_strings: true,
            cache: CacheConfig::default(),
        }
    }
}

impl CompilerConfig {
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_complex_nested_queries(mut self, enabled: bool) -> Self {
        self.supports_complex_nested_queries = enabled;
        self
    }

    pub fn with_cache(mut self, enabled: bool, capacity: usize) -> Self {
        self.cache = CacheConfig { enabled, capacity };
        self
    }

    /// Load a config from a JSON document. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, QueryError> {
        serde_json::from_str(json)
            .map_err(|e| QueryError::InvalidArgument(format!("invalid compiler config: {e}")))
    }

    /// Load a config from `RELQ_*` environment variables.
    ///
    /// - `RELQ_DIALECT`: `sqlserver` | `postgres` | `sqlite`
    /// - `RELQ_COMPLEX_NESTED_QUERIES`: boolean
    /// - `RELQ_PARAMETERIZE_STRINGS`: boolean
    /// - `RELQ_CACHE_ENABLED`: boolean
    /// - `RELQ_CACHE_CAPACITY`: positive integer
    pub fn from_env() -> Result<Self, QueryError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CompilerConfig::from_env`] over an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, QueryError> {
        let mut config = CompilerConfig::default();

        if let Some(raw) = lookup("RELQ_DIALECT") {
            config.dialect = Dialect::parse(&raw).ok_or_else(|| {
                QueryError::InvalidArgument(format!("RELQ_DIALECT: unknown dialect '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup("RELQ_COMPLEX_NESTED_QUERIES") {
            config.supports_complex_nested_queries =
                parse_bool("RELQ_COMPLEX_NESTED_QUERIES", &raw)?;
        }
        if let Some(raw) = lookup("RELQ_PARAMETERIZE_STRINGS") {
            config.parameterize_strings = parse_bool("RELQ_PARAMETERIZE_STRINGS", &raw)?;
        }
        if let Some(raw) = lookup("RELQ_CACHE_ENABLED") {
            config.cache.enabled = parse_bool("RELQ_CACHE_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("RELQ_CACHE_CAPACITY") {
            config.cache.capacity = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    QueryError::InvalidArgument(format!(
                        "RELQ_CACHE_CAPACITY: expected a positive integer, got '{raw}'"
                    ))
                })?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, QueryError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(QueryError::InvalidArgument(format!(
            "{key}: expected a boolean, got '{raw}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.dialect, Dialect::SqlServer);
        assert!(!config.supports_complex_nested_queries);
        assert!(config.parameterize_strings);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, 1024);
    }

    #[test]
    fn test_from_json_partial() {
        let config = CompilerConfig::from_json(r#"{"dialect": "Postgres", "cache": {"capacity": 8}}"#)
            .unwrap();
        assert_eq!(config.dialect, Dialect::Postgres);
        assert_eq!(config.cache.capacity, 8);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = CompilerConfig::from_json("{\"dialect\": 7}").unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("RELQ_DIALECT", "sqlite"),
            ("RELQ_CACHE_ENABLED", "off"),
            ("RELQ_CACHE_CAPACITY", "16"),
        ]
        .into_iter()
        .collect();
        let config =
            CompilerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.dialect, Dialect::Sqlite);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.capacity, 16);
    }

    #[test]
    fn test_from_lookup_rejects_zero_capacity() {
        let err = CompilerConfig::from_lookup(|k| {
            (k == "RELQ_CACHE_CAPACITY").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("RELQ_CACHE_CAPACITY"));
    }

    #[test]
    fn test_dialect_parse() {
        assert_eq!(Dialect::parse("PostgreSQL"), Some(Dialect::Postgres));
        assert_eq!(Dialect::parse("mssql"), Some(Dialect::SqlServer));
        assert_eq!(Dialect::parse("oracle"), None);
    }
}
