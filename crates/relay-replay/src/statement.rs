//! Statement reconstruction
//!
//! Rebuilds one parameterized INSERT/UPDATE/DELETE per change record. Values
//! are always bound; identifiers are validated and backtick-quoted before
//! they reach the statement text.

use relay_core::prelude::*;
use serde_json::Value;

/// Longest identifier MySQL accepts
const MAX_IDENTIFIER_LEN: usize = 64;

/// A parameterized statement ready to execute
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub action: RowAction,
    /// Unquoted target table
    pub table: String,
    /// Columns bound first (VALUES or SET)
    pub columns: Vec<String>,
    /// Columns of the WHERE clause, bound after `columns`
    pub key_columns: Vec<String>,
    pub sql: String,
    pub params: Vec<Value>,
}

/// Reject anything that is not `[A-Za-z_][A-Za-z0-9_]*` of at most 64 chars
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RelayError::invalid_identifier(name, "identifier cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(RelayError::invalid_identifier(
            name,
            format!("longer than {MAX_IDENTIFIER_LEN} characters"),
        ));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(RelayError::invalid_identifier(
                name,
                "must start with a letter or underscore",
            ))
        }
    }
    if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(RelayError::invalid_identifier(
            name,
            format!("contains invalid character {c:?}"),
        ));
    }
    Ok(())
}

/// Validate, then wrap in backticks
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{name}`"))
}

/// Unqualified table name of a record (`shop.users` -> `users`)
pub fn base_table(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// Physical target table: base name plus the optional partition suffix
pub fn target_table(qualified: &str, suffix: Option<&str>) -> Result<String> {
    let table = format!("{}{}", base_table(qualified), suffix.unwrap_or_default());
    validate_identifier(&table)?;
    Ok(table)
}

/// Build the statement replaying `record` against `table`
pub fn build_statement(record: &ChangeRecord, table: &str) -> Result<Statement> {
    record.validate()?;

    if record.action.requires_primary_key() && record.primary_key.is_empty() {
        return Err(RelayError::MissingPrimaryKey {
            table: record.table.clone(),
            action: record.action.to_string(),
        });
    }

    let quoted_table = quote_identifier(table)?;
    let quoted_columns = record
        .columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Result<Vec<_>>>()?;
    let key_positions = record.primary_key_positions()?;

    let (columns, key_columns, sql, params) = match record.action {
        RowAction::Insert => {
            let placeholders = vec!["?"; quoted_columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {quoted_table} ({}) VALUES ({placeholders})",
                quoted_columns.join(", ")
            );
            let new = image(record, record.new_values())?;
            (record.columns.clone(), Vec::new(), sql, new.to_vec())
        }
        RowAction::Update => {
            let old = image(record, record.old_values())?;
            let new = image(record, record.new_values())?;
            let set = quoted_columns
                .iter()
                .map(|c| format!("{c} = ?"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {quoted_table} SET {set} WHERE {}",
                where_clause(&quoted_columns, &key_positions)
            );

            // SET binds the new image, WHERE binds the old key
            let mut params = new.to_vec();
            params.extend(key_positions.iter().map(|&i| old[i].clone()));
            (record.columns.clone(), record.primary_key.clone(), sql, params)
        }
        RowAction::Delete => {
            let sql = format!(
                "DELETE FROM {quoted_table} WHERE {}",
                where_clause(&quoted_columns, &key_positions)
            );
            let old = image(record, record.old_values())?;
            let params = key_positions.iter().map(|&i| old[i].clone()).collect();
            (Vec::new(), record.primary_key.clone(), sql, params)
        }
    };

    Ok(Statement {
        action: record.action,
        table: table.to_string(),
        columns,
        key_columns,
        sql,
        params,
    })
}

fn image<'a>(record: &ChangeRecord, values: Option<&'a [Value]>) -> Result<&'a [Value]> {
    values.ok_or_else(|| {
        RelayError::invalid_record(format!(
            "{} record for {} is missing its row image",
            record.action, record.table
        ))
    })
}

fn where_clause(quoted_columns: &[String], key_positions: &[usize]) -> String {
    key_positions
        .iter()
        .map(|&i| format!("{} = ?", quoted_columns[i]))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_update_sets_new_image_and_targets_old_key() {
        let record = ChangeRecord::update(
            "shop.users",
            cols(&["id", "name", "age"]),
            cols(&["id"]),
            vec![json!(1), json!("a"), json!(20)],
            vec![json!(1), json!("b"), json!(21)],
        );

        let stmt = build_statement(&record, "users").unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE `users` SET `id` = ?, `name` = ?, `age` = ? WHERE `id` = ?"
        );
        assert_eq!(stmt.params, vec![json!(1), json!("b"), json!(21), json!(1)]);
    }

    #[test]
    fn test_update_of_key_addresses_old_row() {
        let record = ChangeRecord::update(
            "shop.users",
            cols(&["id", "name"]),
            cols(&["id"]),
            vec![json!(1), json!("a")],
            vec![json!(2), json!("a")],
        );

        let stmt = build_statement(&record, "users").unwrap();
        assert_eq!(stmt.params.last(), Some(&json!(1)));
    }

    #[test]
    fn test_delete_binds_key_positions() {
        let record = ChangeRecord::delete("shop.users", cols(&["id", "name"]), cols(&["id"]), vec![json!(5), json!("x")]);

        let stmt = build_statement(&record, "users").unwrap();
        assert_eq!(stmt.sql, "DELETE FROM `users` WHERE `id` = ?");
        assert_eq!(stmt.params, vec![json!(5)]);
    }

    #[test]
    fn test_delete_with_key_not_first() {
        let record = ChangeRecord::delete(
            "shop.orders",
            cols(&["note", "shop_id", "order_id"]),
            cols(&["shop_id", "order_id"]),
            vec![json!("n"), json!(3), json!(44)],
        );

        let stmt = build_statement(&record, "orders_001").unwrap();
        assert_eq!(
            stmt.sql,
            "DELETE FROM `orders_001` WHERE `shop_id` = ? AND `order_id` = ?"
        );
        assert_eq!(stmt.params, vec![json!(3), json!(44)]);
    }

    #[test]
    fn test_insert() {
        let record = ChangeRecord::insert("shop.users", cols(&["id", "name"]), cols(&["id"]), vec![json!(7), json!("z")]);

        let stmt = build_statement(&record, "users").unwrap();
        assert_eq!(stmt.sql, "INSERT INTO `users` (`id`, `name`) VALUES (?, ?)");
        assert_eq!(stmt.params, vec![json!(7), json!("z")]);
    }

    #[test]
    fn test_empty_primary_key_fails_fast() {
        let delete = ChangeRecord::delete("shop.logs", cols(&["msg"]), Vec::new(), vec![json!("x")]);
        assert!(matches!(
            build_statement(&delete, "logs"),
            Err(RelayError::MissingPrimaryKey { .. })
        ));

        let update = ChangeRecord::update("shop.logs", cols(&["msg"]), Vec::new(), vec![json!("x")], vec![json!("y")]);
        assert!(build_statement(&update, "logs").is_err());

        // Inserts never need a key
        let insert = ChangeRecord::insert("shop.logs", cols(&["msg"]), Vec::new(), vec![json!("x")]);
        assert!(build_statement(&insert, "logs").is_ok());
    }

    #[test]
    fn test_hostile_identifiers_are_rejected() {
        let record = ChangeRecord::insert(
            "shop.users",
            cols(&["id", "name`; DROP TABLE users; --"]),
            Vec::new(),
            vec![json!(1), json!("x")],
        );
        assert!(matches!(
            build_statement(&record, "users"),
            Err(RelayError::InvalidIdentifier { .. })
        ));

        assert!(validate_identifier("1users").is_err());
        assert!(validate_identifier(&"a".repeat(65)).is_err());
        assert!(validate_identifier("_users_001").is_ok());
    }

    #[test]
    fn test_target_table() {
        assert_eq!(target_table("shop.users", Some("_001")).unwrap(), "users_001");
        assert_eq!(target_table("users", None).unwrap(), "users");
        assert!(target_table("shop.users", Some("-x")).is_err());
    }
}
