// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::schema::{FieldType, Schema};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    /// The statement itself was bad (syntax, missing table, type misuse).
    /// Regenerating the query can fix this.
    #[error("Query rejected: {0}")]
    QueryRejected(String),
    /// The engine is unhealthy (resource or storage failure). Regeneration
    /// cannot help; the run must stop.
    #[error("Engine failure: {0}")]
    Fatal(String),
    #[error("Introspection failed: {0}")]
    Introspection(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl SqlValue {
    fn field_type(&self) -> Option<FieldType> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(_) => Some(FieldType::Integer),
            SqlValue::Real(_) => Some(FieldType::Real),
            SqlValue::Text(_) => Some(FieldType::Text),
            SqlValue::Boolean(_) => Some(FieldType::Boolean),
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "{v}"),
            SqlValue::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<&SqlValue> for rusqlite::types::Value {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => rusqlite::types::Value::Null,
            SqlValue::Integer(v) => rusqlite::types::Value::Integer(*v),
            SqlValue::Real(v) => rusqlite::types::Value::Real(*v),
            SqlValue::Text(v) => rusqlite::types::Value::Text(v.clone()),
            SqlValue::Boolean(v) => rusqlite::types::Value::Integer(i64::from(*v)),
        }
    }
}

/// An ordered result set. Column order and names are preserved exactly as the
/// engine returned them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub statements_run: u64,
    pub failures: u64,
}

/// Embedded in-memory SQL engine for one session's dataset. All reads and
/// writes for a session go through this one connection; the session layer
/// serialises access.
pub struct SqlEngine {
    conn: Connection,
    metrics: EngineMetrics,
}

impl SqlEngine {
    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Fatal(format!("could not open engine: {e}")))?;
        Ok(Self {
            conn,
            metrics: EngineMetrics::default(),
        })
    }

    /// Runs one statement and returns its rows. Statements that produce no
    /// columns (DDL, DML) return an empty row set; deciding what that means
    /// is the caller's business.
    pub fn execute(&mut self, sql: &str) -> Result<RowSet, EngineError> {
        debug!(sql, "Executing statement");
        self.metrics.statements_run += 1;
        let result = self.run_statement(sql);
        if let Err(error) = &result {
            self.metrics.failures += 1;
            warn!(%error, "Statement failed");
        }
        result
    }

    fn run_statement(&self, sql: &str) -> Result<RowSet, EngineError> {
        let mut stmt = self.conn.prepare(sql).map_err(classify)?;
        if stmt.column_count() == 0 {
            stmt.execute([]).map_err(classify)?;
            return Ok(RowSet::default());
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([]).map_err(classify)?;
        let mut data = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let mut record = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                let value = row.get_ref(index).map_err(classify)?;
                record.push(convert_value(value));
            }
            data.push(record);
        }
        Ok(RowSet {
            columns,
            rows: data,
        })
    }

    /// Runs setup SQL (multiple statements allowed). Used to seed a dataset
    /// before the schema snapshot is taken.
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), EngineError> {
        self.metrics.statements_run += 1;
        self.conn.execute_batch(sql).map_err(classify)
    }

    /// Creates `table` from a row set. Column types are inferred from the
    /// first non-null value per column; all-null columns become TEXT.
    pub fn materialise(&mut self, table: &str, rows: &RowSet) -> Result<(), EngineError> {
        let columns = rows
            .columns
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let field_type = rows
                    .rows
                    .iter()
                    .find_map(|row| row.get(index).and_then(SqlValue::field_type))
                    .unwrap_or(FieldType::Text);
                format!("\"{name}\" {}", field_type.sql_name())
            })
            .collect::<Vec<_>>()
            .join(", ");
        let create = format!("CREATE TABLE \"{table}\" ({columns})");
        debug!(sql = %create, "Materialising result set");
        self.conn.execute(&create, []).map_err(classify)?;

        let placeholders = (0..rows.columns.len())
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!("INSERT INTO \"{table}\" VALUES ({placeholders})");
        let tx = self.conn.unchecked_transaction().map_err(classify)?;
        {
            let mut stmt = tx.prepare(&insert).map_err(classify)?;
            for row in &rows.rows {
                let params = row
                    .iter()
                    .map(rusqlite::types::Value::from)
                    .collect::<Vec<_>>();
                stmt.execute(rusqlite::params_from_iter(params))
                    .map_err(classify)?;
            }
        }
        tx.commit().map_err(classify)?;
        info!(table, rows = rows.len(), "Materialised scratch table");
        Ok(())
    }

    /// Reads table and column metadata into a schema snapshot.
    pub fn introspect(&self) -> Result<Schema, EngineError> {
        let mut schema = Schema::new();
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .map_err(|e| EngineError::Introspection(e.to_string()))?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| EngineError::Introspection(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::Introspection(e.to_string()))?;

        for table in tables {
            let mut info = self
                .conn
                .prepare(&format!("PRAGMA table_info(\"{table}\")"))
                .map_err(|e| EngineError::Introspection(e.to_string()))?;
            let fields = info
                .query_map([], |row| {
                    Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })
                .map_err(|e| EngineError::Introspection(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EngineError::Introspection(e.to_string()))?;
            for (field, declared) in fields {
                schema
                    .extend(&table, &field, FieldType::from_declared(&declared))
                    .map_err(|e| EngineError::Introspection(e.to_string()))?;
            }
        }
        Ok(schema)
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics
    }
}

fn convert_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
    }
}

/// Splits engine failures into what a regenerated query could fix and what it
/// never can. Resource-level codes are fatal; everything else is a defect of
/// the statement text.
fn classify(error: rusqlite::Error) -> EngineError {
    match &error {
        rusqlite::Error::SqliteFailure(ffi_error, message) => match ffi_error.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::OutOfMemory
            | ErrorCode::CannotOpen
            | ErrorCode::DiskFull
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::NotADatabase => EngineError::Fatal(
                message
                    .clone()
                    .unwrap_or_else(|| ffi_error.to_string()),
            ),
            _ => EngineError::QueryRejected(
                message
                    .clone()
                    .unwrap_or_else(|| ffi_error.to_string()),
            ),
        },
        _ => EngineError::QueryRejected(error.to_string()),
    }
}
