//! Target database executors

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Opts, Pool};
use relay_core::prelude::*;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::statement::Statement;

/// Runs reconstructed statements against the target
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Execute one statement, returning affected rows
    async fn execute(&self, statement: &Statement) -> Result<u64>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// MySQL Executor
// ============================================================================

/// `mysql_async` pool executor with a bounded statement timeout
pub struct MySqlExecutor {
    pool: Pool,
    statement_timeout: Duration,
    running: AtomicBool,
}

impl MySqlExecutor {
    pub fn from_url(url: &str, statement_timeout: Duration) -> Result<Self> {
        let opts = Opts::from_url(url)
            .map_err(|e| RelayError::config(format!("Invalid target database URL: {e}")))?;
        Ok(Self {
            pool: Pool::new(opts),
            statement_timeout,
            running: AtomicBool::new(false),
        })
    }

    async fn exec(&self, statement: &Statement) -> Result<u64> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| RelayError::database_with_source("Failed to connect to target", e))?;

        let params: Vec<mysql_async::Value> = statement.params.iter().map(json_to_mysql).collect();
        conn.exec_drop(statement.sql.as_str(), params)
            .await
            .map_err(|e| {
                RelayError::database_with_source(format!("Failed to execute {}", statement.sql), e)
            })?;

        Ok(conn.affected_rows())
    }
}

/// Bind a JSON value as a MySQL parameter
fn json_to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                mysql_async::Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                mysql_async::Value::UInt(u)
            } else {
                mysql_async::Value::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => mysql_async::Value::from(s.as_str()),
        // Nested values land in JSON columns
        Value::Array(_) | Value::Object(_) => mysql_async::Value::from(value.to_string()),
    }
}

#[async_trait]
impl StatementExecutor for MySqlExecutor {
    async fn execute(&self, statement: &Statement) -> Result<u64> {
        trace!(sql = %statement.sql, params = statement.params.len(), "Executing statement");
        match tokio::time::timeout(self.statement_timeout, self.exec(statement)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::timeout(
                format!("{} on {}", statement.action, statement.table),
                self.statement_timeout.as_millis() as u64,
            )),
        }
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}

#[async_trait]
impl Lifecycle for MySqlExecutor {
    async fn start(&self) -> Result<()> {
        self.health_check().await?;
        self.running.store(true, Ordering::SeqCst);
        info!("MySQL executor started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        // Pool::disconnect consumes the pool; clones share the same connections
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(|e| RelayError::database_with_source("Failed to close target pool", e))?;
        debug!("MySQL executor stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for MySqlExecutor {
    async fn health_check(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| RelayError::database_with_source("Target unreachable", e))?;
        conn.ping()
            .await
            .map_err(|e| RelayError::database_with_source("Target ping failed", e))
    }

    fn component_name(&self) -> &'static str {
        "mysql_executor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_binding() {
        assert_eq!(json_to_mysql(&json!(null)), mysql_async::Value::NULL);
        assert_eq!(json_to_mysql(&json!(-3)), mysql_async::Value::Int(-3));
        assert_eq!(json_to_mysql(&json!(u64::MAX)), mysql_async::Value::UInt(u64::MAX));
        assert_eq!(json_to_mysql(&json!(1.5)), mysql_async::Value::Double(1.5));
        assert_eq!(
            json_to_mysql(&json!("b")),
            mysql_async::Value::Bytes(b"b".to_vec())
        );
        assert_eq!(
            json_to_mysql(&json!({"k": 1})),
            mysql_async::Value::Bytes(br#"{"k":1}"#.to_vec())
        );
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(MySqlExecutor::from_url("http://localhost", Duration::from_secs(1)).is_err());
    }
}
