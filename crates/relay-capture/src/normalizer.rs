//! Change normalizer
//!
//! Turns raw row events into canonical change records. Table layouts come
//! from a `SchemaProvider` and are cached for the life of the process.

use relay_core::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub struct ChangeNormalizer {
    schemas: Arc<dyn SchemaProvider>,
    cache: RwLock<HashMap<TableRef, Arc<TableSchema>>>,
}

impl ChangeNormalizer {
    pub fn new(schemas: Arc<dyn SchemaProvider>) -> Self {
        Self {
            schemas,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Layout for a table, looked up once
    pub async fn schema_for(&self, table: &TableRef) -> Result<Arc<TableSchema>> {
        if let Some(schema) = self.cache.read().await.get(table) {
            return Ok(schema.clone());
        }

        let schema = Arc::new(self.schemas.table_schema(table).await?);
        debug!(
            table = %table,
            provider = self.schemas.name(),
            "Cached table schema"
        );

        let mut cache = self.cache.write().await;
        Ok(cache.entry(table.clone()).or_insert(schema).clone())
    }

    /// Exactly one record per row event
    pub async fn normalize(&self, event: &RowEvent) -> Result<ChangeRecord> {
        let schema = self.schema_for(&event.table).await?;
        let width = schema.columns.len();
        let table = event.table.qualified();
        let columns = schema.columns.clone();
        let primary_key = schema.primary_key.clone();

        let record = match event.action {
            RowAction::Insert => {
                let after = image(event, "after", event.after.as_deref(), width)?;
                ChangeRecord::insert(table, columns, primary_key, after)
            }
            RowAction::Delete => {
                let before = image(event, "before", event.before.as_deref(), width)?;
                ChangeRecord::delete(table, columns, primary_key, before)
            }
            RowAction::Update => {
                let before = image(event, "before", event.before.as_deref(), width)?;
                let after = image(event, "after", event.after.as_deref(), width)?;
                ChangeRecord::update(table, columns, primary_key, before, after)
            }
        };

        Ok(record)
    }

    pub async fn cached_tables(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn image(
    event: &RowEvent,
    which: &str,
    values: Option<&[Value]>,
    width: usize,
) -> Result<Vec<Value>> {
    let values = values.ok_or_else(|| {
        RelayError::invalid_record(format!(
            "{} event on {} is missing its {which} image",
            event.action, event.table
        ))
    })?;

    if values.len() != width {
        return Err(RelayError::invalid_record(format!(
            "{which} image of {} event on {} has {} values for {width} columns",
            event.action,
            event.table,
            values.len()
        )));
    }

    Ok(values.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchemaProvider;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn users() -> TableRef {
        TableRef::new("shop", "users")
    }

    fn users_schema() -> TableSchema {
        TableSchema {
            columns: vec!["id".into(), "name".into(), "age".into()],
            primary_key: vec!["id".into()],
        }
    }

    fn normalizer() -> ChangeNormalizer {
        ChangeNormalizer::new(Arc::new(
            StaticSchemaProvider::new().with_table(users(), users_schema()),
        ))
    }

    #[tokio::test]
    async fn test_update_keeps_before_then_after() {
        let event = RowEvent::update(
            users(),
            vec![json!(1), json!("a"), json!(20)],
            vec![json!(1), json!("b"), json!(21)],
        );

        let record = normalizer().normalize(&event).await.unwrap();
        assert_eq!(record.action, RowAction::Update);
        assert_eq!(record.table, "shop.users");
        assert_eq!(
            record.rows,
            vec![json!(1), json!("a"), json!(20), json!(1), json!("b"), json!(21)]
        );
        assert_eq!(record.primary_key, vec!["id".to_string()]);
        record.validate().unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_delete_images() {
        let n = normalizer();

        let insert = n
            .normalize(&RowEvent::insert(users(), vec![json!(2), json!("c"), json!(30)]))
            .await
            .unwrap();
        assert_eq!(insert.rows, vec![json!(2), json!("c"), json!(30)]);

        let delete = n
            .normalize(&RowEvent::delete(users(), vec![json!(5), json!("x"), json!(9)]))
            .await
            .unwrap();
        assert_eq!(delete.action, RowAction::Delete);
        assert_eq!(delete.rows, vec![json!(5), json!("x"), json!(9)]);
    }

    #[tokio::test]
    async fn test_missing_or_short_image_fails() {
        let n = normalizer();

        let mut no_after = RowEvent::update(users(), vec![json!(1), json!("a"), json!(2)], vec![]);
        no_after.after = None;
        assert!(matches!(
            n.normalize(&no_after).await,
            Err(RelayError::InvalidRecord { .. })
        ));

        let short = RowEvent::insert(users(), vec![json!(1)]);
        assert!(n.normalize(&short).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_table_fails() {
        let event = RowEvent::insert(TableRef::new("shop", "orders"), vec![json!(1)]);
        assert!(normalizer().normalize(&event).await.is_err());
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SchemaProvider for CountingProvider {
        async fn table_schema(&self, _table: &TableRef) -> Result<TableSchema> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(users_schema())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_schema_is_looked_up_once_per_table() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let n = ChangeNormalizer::new(provider.clone());

        for id in 0..5 {
            n.normalize(&RowEvent::insert(users(), vec![json!(id), json!("n"), json!(1)]))
                .await
                .unwrap();
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(n.cached_tables().await, 1);
    }
}
