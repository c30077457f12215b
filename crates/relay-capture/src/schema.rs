//! Table schema providers
//!
//! Column order and primary-key membership for source tables, either from
//! static configuration or from the source database's information schema.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Opts, Pool};
use relay_core::config::StaticTableConfig;
use relay_core::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const COLUMNS_SQL: &str = "SELECT COLUMN_NAME FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION";

const PRIMARY_KEY_SQL: &str = "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
     ORDER BY ORDINAL_POSITION";

// ============================================================================
// Static Provider
// ============================================================================

/// Schemas fixed at startup
#[derive(Debug, Default, Clone)]
pub struct StaticSchemaProvider {
    tables: HashMap<TableRef, TableSchema>,
}

impl StaticSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(tables: &[StaticTableConfig]) -> Self {
        let mut provider = Self::new();
        for table in tables {
            provider.insert(table.table_ref(), table.table_schema());
        }
        provider
    }

    pub fn insert(&mut self, table: TableRef, schema: TableSchema) {
        self.tables.insert(table, schema);
    }

    pub fn with_table(mut self, table: TableRef, schema: TableSchema) -> Self {
        self.insert(table, schema);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[async_trait]
impl SchemaProvider for StaticSchemaProvider {
    async fn table_schema(&self, table: &TableRef) -> Result<TableSchema> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| RelayError::config(format!("no schema configured for {table}")))
    }

    fn name(&self) -> &'static str {
        "static_schema"
    }
}

// ============================================================================
// MySQL Provider
// ============================================================================

/// Reads column order and the PRIMARY constraint from `information_schema`
pub struct MySqlSchemaProvider {
    pool: Pool,
}

impl MySqlSchemaProvider {
    /// Create a provider from a `mysql://` URL
    pub fn from_url(url: &str) -> Result<Self> {
        let opts = Opts::from_url(url)
            .map_err(|e| RelayError::config(format!("Invalid source database URL: {e}")))?;
        Ok(Self {
            pool: Pool::new(opts),
        })
    }

    /// Close the pool; pending lookups finish first
    pub async fn disconnect(&self) -> Result<()> {
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(|e| RelayError::database_with_source("Failed to close source pool", e))
    }
}

#[async_trait]
impl SchemaProvider for MySqlSchemaProvider {
    async fn table_schema(&self, table: &TableRef) -> Result<TableSchema> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| RelayError::database_with_source("Failed to connect to source", e))?;

        let columns: Vec<(String,)> = conn
            .exec(COLUMNS_SQL, (table.schema.as_str(), table.name.as_str()))
            .await
            .map_err(|e| RelayError::database_with_source("Failed to read columns", e))?;

        if columns.is_empty() {
            return Err(RelayError::config(format!("table {table} not found in source")));
        }

        let primary_key: Vec<(String,)> = conn
            .exec(PRIMARY_KEY_SQL, (table.schema.as_str(), table.name.as_str()))
            .await
            .map_err(|e| RelayError::database_with_source("Failed to read primary key", e))?;

        let schema = TableSchema {
            columns: columns.into_iter().map(|(c,)| c).collect(),
            primary_key: primary_key.into_iter().map(|(c,)| c).collect(),
        };
        debug!(table = %table, columns = schema.columns.len(), primary_key = ?schema.primary_key, "Loaded table schema");
        Ok(schema)
    }

    fn name(&self) -> &'static str {
        "mysql_schema"
    }
}

// ============================================================================
// Layered Provider
// ============================================================================

/// Static schemas first, then a fallback provider
pub struct LayeredSchemaProvider {
    overrides: StaticSchemaProvider,
    fallback: Option<Arc<dyn SchemaProvider>>,
}

impl LayeredSchemaProvider {
    pub fn new(overrides: StaticSchemaProvider, fallback: Option<Arc<dyn SchemaProvider>>) -> Self {
        Self {
            overrides,
            fallback,
        }
    }
}

#[async_trait]
impl SchemaProvider for LayeredSchemaProvider {
    async fn table_schema(&self, table: &TableRef) -> Result<TableSchema> {
        match (self.overrides.table_schema(table).await, &self.fallback) {
            (Ok(schema), _) => Ok(schema),
            (Err(_), Some(fallback)) => fallback.table_schema(table).await,
            (Err(e), None) => Err(e),
        }
    }

    fn name(&self) -> &'static str {
        "layered_schema"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableRef {
        TableRef::new("shop", "users")
    }

    fn users_schema() -> TableSchema {
        TableSchema {
            columns: vec!["id".into(), "name".into()],
            primary_key: vec!["id".into()],
        }
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticSchemaProvider::new().with_table(users(), users_schema());

        assert_eq!(provider.table_schema(&users()).await.unwrap(), users_schema());
        let missing = provider.table_schema(&TableRef::new("shop", "orders")).await;
        assert!(matches!(missing, Err(RelayError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_layered_provider_prefers_overrides() {
        let keyless = TableSchema {
            columns: vec!["id".into(), "name".into()],
            primary_key: Vec::new(),
        };
        let fallback: Arc<dyn SchemaProvider> =
            Arc::new(StaticSchemaProvider::new().with_table(users(), keyless.clone()));
        let overrides = StaticSchemaProvider::new().with_table(users(), users_schema());

        let layered = LayeredSchemaProvider::new(overrides, Some(fallback.clone()));
        assert_eq!(layered.table_schema(&users()).await.unwrap(), users_schema());

        let layered = LayeredSchemaProvider::new(StaticSchemaProvider::new(), Some(fallback));
        assert_eq!(layered.table_schema(&users()).await.unwrap(), keyless);
    }

    #[test]
    fn test_mysql_provider_rejects_bad_url() {
        assert!(MySqlSchemaProvider::from_url("postgres://nope").is_err());
    }
}
