//! End-to-end replay against an in-memory target.
//!
//! A simulated source table is mutated, every mutation becomes a change
//! record, the records are delivered in arbitrary chunks, and the replayed
//! target must end up identical to the source.

use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;
use relay_core::config::ReplayTaskConfig;
use relay_core::prelude::*;
use relay_replay::{ReplayEngine, Statement, StatementExecutor};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type Row = BTreeMap<String, Value>;

// ============================================================================
// Test doubles
// ============================================================================

/// Applies statements structurally, keyed by the `id` column
#[derive(Default)]
struct MemoryTarget {
    rows: Mutex<BTreeMap<String, Row>>,
    reject_names: Vec<String>,
}

fn key_of(value: &Value) -> String {
    value.to_string()
}

#[async_trait]
impl StatementExecutor for MemoryTarget {
    async fn execute(&self, statement: &Statement) -> Result<u64> {
        if statement
            .params
            .iter()
            .any(|p| p.as_str().is_some_and(|s| self.reject_names.iter().any(|r| r == s)))
        {
            return Err(RelayError::database("constraint violation"));
        }

        let mut rows = self.rows.lock().await;
        let width = statement.columns.len();
        let find_key = |params: &[Value]| -> Option<String> {
            statement
                .key_columns
                .iter()
                .position(|c| c == "id")
                .map(|i| key_of(&params[i]))
        };

        match statement.action {
            RowAction::Insert => {
                let row: Row = statement
                    .columns
                    .iter()
                    .cloned()
                    .zip(statement.params.iter().cloned())
                    .collect();
                let key = key_of(&row["id"]);
                if rows.contains_key(&key) {
                    return Err(RelayError::database("duplicate entry"));
                }
                rows.insert(key, row);
            }
            RowAction::Update => {
                let old_key = find_key(&statement.params[width..]).unwrap();
                let Some(_) = rows.remove(&old_key) else {
                    return Ok(0);
                };
                let row: Row = statement
                    .columns
                    .iter()
                    .cloned()
                    .zip(statement.params[..width].iter().cloned())
                    .collect();
                rows.insert(key_of(&row["id"]), row);
            }
            RowAction::Delete => {
                let key = find_key(&statement.params).unwrap();
                return Ok(rows.remove(&key).map_or(0, |_| 1));
            }
        }
        Ok(1)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Hands out queued payloads, then empty bodies
#[derive(Default)]
struct QueuedSource {
    payloads: Mutex<VecDeque<Bytes>>,
}

#[async_trait]
impl DeliverySource for QueuedSource {
    async fn consume(&self, _task: &TaskIdentity) -> Result<Bytes> {
        Ok(self.payloads.lock().await.pop_front().unwrap_or_default())
    }
}

// ============================================================================
// Source simulation
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Write { id: i64, name: String },
    Rekey { id: i64, new_id: i64 },
    Delete { id: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..12, "[a-z]{1,6}").prop_map(|(id, name)| Op::Write { id, name }),
        (0i64..12, 0i64..12).prop_map(|(id, new_id)| Op::Rekey { id, new_id }),
        (0i64..12).prop_map(|id| Op::Delete { id }),
    ]
}

fn columns() -> Vec<String> {
    vec!["id".into(), "name".into(), "version".into()]
}

fn image(id: i64, name: &str, version: u64) -> Vec<Value> {
    vec![json!(id), json!(name), json!(version)]
}

/// Apply `ops` to a simulated source table, returning its final state and
/// the change records it emitted
fn simulate(ops: &[Op]) -> (BTreeMap<String, Row>, Vec<ChangeRecord>) {
    let mut source: BTreeMap<i64, (String, u64)> = BTreeMap::new();
    let mut records = Vec::new();
    let pk = vec!["id".to_string()];

    for op in ops {
        match op {
            Op::Write { id, name } => match source.get(id).cloned() {
                None => {
                    source.insert(*id, (name.clone(), 0));
                    records.push(ChangeRecord::insert("shop.users", columns(), pk.clone(), image(*id, name, 0)));
                }
                Some((old_name, version)) => {
                    source.insert(*id, (name.clone(), version + 1));
                    records.push(ChangeRecord::update(
                        "shop.users",
                        columns(),
                        pk.clone(),
                        image(*id, &old_name, version),
                        image(*id, name, version + 1),
                    ));
                }
            },
            Op::Rekey { id, new_id } => {
                if id == new_id || source.contains_key(new_id) {
                    continue;
                }
                if let Some((name, version)) = source.remove(id) {
                    source.insert(*new_id, (name.clone(), version));
                    records.push(ChangeRecord::update(
                        "shop.users",
                        columns(),
                        pk.clone(),
                        image(*id, &name, version),
                        image(*new_id, &name, version),
                    ));
                }
            }
            Op::Delete { id } => {
                if let Some((name, version)) = source.remove(id) {
                    records.push(ChangeRecord::delete("shop.users", columns(), pk.clone(), image(*id, &name, version)));
                }
            }
        }
    }

    let state = source
        .into_iter()
        .map(|(id, (name, version))| {
            let row: Row = columns().into_iter().zip(image(id, &name, version)).collect();
            (key_of(&json!(id)), row)
        })
        .collect();
    (state, records)
}

fn task() -> ReplayTaskConfig {
    ReplayTaskConfig {
        name: "users".into(),
        account: "repl".into(),
        database: "shop".into(),
        table: "users".into(),
        table_suffix: Some("_001".into()),
        capabilities: ActionCapabilities::all(),
    }
}

async fn replay(records: &[ChangeRecord], chunk: usize, target: Arc<MemoryTarget>) -> u64 {
    let source = Arc::new(QueuedSource::default());
    for part in records.chunks(chunk.max(1)) {
        source
            .payloads
            .lock()
            .await
            .push_back(relay_core::encode_payload(part).unwrap());
    }

    let engine = ReplayEngine::new(task(), source.clone(), target, Duration::from_millis(1));
    let mut applied = 0;
    while !source.payloads.lock().await.is_empty() {
        applied += engine.poll_once().await.unwrap().applied;
    }
    applied
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Replaying every record in order reproduces the source table
    #[test]
    fn replay_reproduces_source_state(
        ops in prop::collection::vec(op_strategy(), 1..80),
        chunk in 1usize..10,
    ) {
        let (expected, records) = simulate(&ops);
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        let target = Arc::new(MemoryTarget::default());
        let applied = runtime.block_on(replay(&records, chunk, target.clone()));
        let actual = runtime.block_on(async { target.rows.lock().await.clone() });

        prop_assert_eq!(applied, records.len() as u64);
        prop_assert_eq!(actual, expected);
    }
}

#[tokio::test]
async fn test_failed_statement_is_skipped_and_replay_continues() {
    let ops = vec![
        Op::Write { id: 1, name: "ann".into() },
        Op::Write { id: 2, name: "bad".into() },
        Op::Write { id: 3, name: "cy".into() },
        Op::Write { id: 1, name: "bo".into() },
    ];
    let (_, records) = simulate(&ops);

    let target = Arc::new(MemoryTarget {
        reject_names: vec!["bad".into()],
        ..Default::default()
    });
    let applied = replay(&records, 2, target.clone()).await;
    assert_eq!(applied, 3);

    let rows = target.rows.lock().await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[&key_of(&json!(1))]["name"], json!("bo"));
    assert!(!rows.contains_key(&key_of(&json!(2))));
}
