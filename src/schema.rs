//! Schema bootstrapper (C8, spec §4.5).

use rusqlite::Connection;

use crate::config::{BundleStoreConfig, StorageModel};
use crate::error::{BundleResult, BundleStoreError};

const DEFAULT_BINARY_DDL: &str = include_str!("../ddl/default-binary.ddl");
const DEFAULT_SPLIT_DDL: &str = include_str!("../ddl/default-split.ddl");

/// Escapes characters outside `[A-Z0-9_]` to `_xHHHH_` (lowercase hex,
/// zero-padded to 4 digits) and uppercases everything else. Applied once
/// at init to the configured `schemaObjectPrefix` (§4.5).
pub fn sanitize_prefix(raw: &str) -> String {
    let mut out = String::new();
    for c in raw.chars() {
        let upper = c.to_ascii_uppercase();
        if upper.is_ascii_alphanumeric() || upper == '_' {
            out.push(upper);
        } else {
            out.push_str(&format!("_x{:04x}_", c as u32));
        }
    }
    out
}

/// `<schema>.ddl` is named by the `schema` config option; the storage
/// model further selects which key-column layout that resource uses,
/// since the model is pinned at construction independently of the schema
/// dialect (§3, §4.5).
fn ddl_resource(schema: &str, model: StorageModel) -> BundleResult<&'static str> {
    match (schema, model) {
        ("default", StorageModel::BinaryKeys) => Ok(DEFAULT_BINARY_DDL),
        ("default", StorageModel::SplitLong) => Ok(DEFAULT_SPLIT_DDL),
        _ => Err(BundleStoreError::SchemaError(format!(
            "no DDL resource for schema '{schema}'"
        ))),
    }
}

/// Detects whether `<prefix>BUNDLE` exists; if not, loads the DDL
/// resource, substitutes `${schemaObjectPrefix}`, skips `BINVAL` lines
/// when the DB-resident blob backend is disabled, and executes the
/// remaining non-blank lines one statement per line.
pub fn bootstrap(conn: &Connection, config: &BundleStoreConfig) -> BundleResult<()> {
    let prefix = sanitize_prefix(&config.schema_object_prefix);
    let bundle_table = format!("{prefix}BUNDLE");

    if table_exists(conn, &bundle_table)? {
        tracing::debug!(table = %bundle_table, "schema already bootstrapped");
        return Ok(());
    }

    let ddl_text = ddl_resource(&config.schema, config.storage_model)?;
    tracing::info!(schema = %config.schema, prefix = %prefix, "bootstrapping schema");

    for line in ddl_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !config.external_blobs && line.to_uppercase().contains("BINVAL") {
            continue;
        }
        let statement = line.replace("${schemaObjectPrefix}", &prefix);
        conn.execute(&statement, []).map_err(|e| {
            BundleStoreError::SchemaError(format!("DDL statement failed: {e} ({statement})"))
        })?;
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> BundleResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND upper(name) = upper(?1)",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
