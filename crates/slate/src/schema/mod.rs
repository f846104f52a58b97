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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Unknown table '{0}'")]
    UnknownTable(String),
    #[error("Field '{table}.{field}' is already declared as {existing}, refusing {requested}")]
    TypeConflict {
        table: String,
        field: String,
        existing: FieldType,
        requested: FieldType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
}

impl FieldType {
    /// Maps a declared SQL column type to the closed field-type set. Unknown
    /// declarations fall back to text, which is how the engine treats them.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.contains("BOOL") {
            FieldType::Boolean
        } else if upper.contains("INT") {
            FieldType::Integer
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUMERIC")
            || upper.contains("DECIMAL")
        {
            FieldType::Real
        } else if upper.contains("DATE") || upper.contains("TIME") {
            FieldType::Timestamp
        } else {
            FieldType::Text
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Real => "REAL",
            FieldType::Text => "TEXT",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDef {
    pub fields: BTreeMap<String, FieldType>,
}

/// A field a generation step needed but the schema did not yet hold, e.g. a
/// column of a materialised scratch table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldAddition {
    pub table: String,
    pub field: String,
    pub field_type: FieldType,
}

/// The session's view of the dataset structure. Built once by engine
/// introspection, then grown by additive merge only; nothing is ever removed
/// or overwritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    tables: BTreeMap<String, TableDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &TableDef)> {
        self.tables.iter()
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Renders the schema as prompt text. `table` narrows the output to one
    /// table; `None` describes everything.
    pub fn describe(&self, table: Option<&str>) -> Result<String, SchemaError> {
        let mut out = String::new();
        match table {
            Some(name) => {
                let def = self
                    .tables
                    .get(name)
                    .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))?;
                describe_table(&mut out, name, def);
            }
            None => {
                for (name, def) in &self.tables {
                    describe_table(&mut out, name, def);
                }
            }
        }
        Ok(out)
    }

    /// Adds a field, creating the table if needed. Re-adding an identical
    /// field is a no-op (`Ok(false)`); the same name with a different type is
    /// a reported conflict, never an overwrite.
    pub fn extend(
        &mut self,
        table: &str,
        field: &str,
        field_type: FieldType,
    ) -> Result<bool, SchemaError> {
        let def = self.tables.entry(table.to_string()).or_default();
        match def.fields.get(field) {
            Some(existing) if *existing == field_type => {
                debug!(table, field, "Schema extend was a no-op");
                Ok(false)
            }
            Some(existing) => Err(SchemaError::TypeConflict {
                table: table.to_string(),
                field: field.to_string(),
                existing: *existing,
                requested: field_type,
            }),
            None => {
                info!(table, field, %field_type, "Extending schema");
                def.fields.insert(field.to_string(), field_type);
                Ok(true)
            }
        }
    }

    /// Applies a batch of discovered fields. Returns how many were genuinely
    /// new; stops at the first conflict so a bad batch cannot half-apply a
    /// table it has already reported broken.
    pub fn merge(&mut self, additions: &[FieldAddition]) -> Result<usize, SchemaError> {
        let mut added = 0;
        for addition in additions {
            if self.extend(&addition.table, &addition.field, addition.field_type)? {
                added += 1;
            }
        }
        Ok(added)
    }
}

fn describe_table(out: &mut String, name: &str, def: &TableDef) {
    out.push_str("Table name: ");
    out.push_str(name);
    out.push('\n');
    let fields = def
        .fields
        .iter()
        .map(|(field, ty)| format!("{field} {ty}"))
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&fields);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passengers() -> Schema {
        let mut schema = Schema::new();
        schema.extend("passengers", "age", FieldType::Real).unwrap();
        schema
            .extend("passengers", "survived", FieldType::Boolean)
            .unwrap();
        schema
    }

    #[test]
    fn describe_lists_all_tables_without_argument() {
        let mut schema = passengers();
        schema.extend("ports", "name", FieldType::Text).unwrap();
        let text = schema.describe(None).unwrap();
        assert!(text.contains("Table name: passengers"));
        assert!(text.contains("Table name: ports"));
        assert!(text.contains("age REAL"));
    }

    #[test]
    fn describe_unknown_table_is_an_error() {
        let schema = passengers();
        assert!(matches!(
            schema.describe(Some("crew")),
            Err(SchemaError::UnknownTable(_))
        ));
    }

    #[test]
    fn extend_is_idempotent() {
        let mut schema = passengers();
        assert!(!schema.extend("passengers", "age", FieldType::Real).unwrap());
        assert_eq!(schema.table("passengers").unwrap().fields.len(), 2);
    }

    #[test]
    fn extend_reports_type_conflicts() {
        let mut schema = passengers();
        let err = schema
            .extend("passengers", "age", FieldType::Text)
            .unwrap_err();
        assert!(matches!(err, SchemaError::TypeConflict { .. }));
        // the original declaration is untouched
        assert_eq!(
            schema.table("passengers").unwrap().fields["age"],
            FieldType::Real
        );
    }

    #[test]
    fn merge_counts_only_new_fields() {
        let mut schema = passengers();
        let added = schema
            .merge(&[
                FieldAddition {
                    table: "passengers".to_string(),
                    field: "age".to_string(),
                    field_type: FieldType::Real,
                },
                FieldAddition {
                    table: "passengers".to_string(),
                    field: "fare".to_string(),
                    field_type: FieldType::Real,
                },
            ])
            .unwrap();
        assert_eq!(added, 1);
    }
}
