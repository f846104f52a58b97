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

use crate::engine::{RowSet, SqlValue};
use model_contracts::ChartKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("{kind} chart needs exactly {expected} columns, got {got}")]
    ColumnArity {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Selected column '{0}' is not in the result set")]
    UnknownColumn(String),
}

/// A renderable chart description: the kind, the axis mappings and the data
/// points lifted out of the executed rows. Rendering to pixels belongs to
/// whatever front end consumes this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSpec {
    pub chart_kind: ChartKind,
    pub mappings: BTreeMap<String, String>,
    pub points: Vec<(SqlValue, SqlValue)>,
    pub dimensions_used: usize,
}

/// Builds a chart from the selected columns, in selection order: first column
/// is x, second is y. Arity and column membership are checked here; a
/// mismatch is the selection step's fault and is reported, never truncated.
pub fn render(kind: ChartKind, columns: &[String], rows: &RowSet) -> Result<RenderSpec, PlotError> {
    let expected = kind.required_columns();
    if columns.len() != expected {
        return Err(PlotError::ColumnArity {
            kind: kind.as_str(),
            expected,
            got: columns.len(),
        });
    }

    let indices = columns
        .iter()
        .map(|name| {
            rows.column_index(name)
                .ok_or_else(|| PlotError::UnknownColumn(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let points = rows
        .rows
        .iter()
        .map(|row| (row[indices[0]].clone(), row[indices[1]].clone()))
        .collect();

    let mut mappings = BTreeMap::new();
    mappings.insert("x".to_string(), columns[0].clone());
    mappings.insert("y".to_string(), columns[1].clone());

    Ok(RenderSpec {
        chart_kind: kind,
        mappings,
        points,
        dimensions_used: expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> RowSet {
        RowSet {
            columns: vec!["age".to_string(), "fare".to_string()],
            rows: vec![
                vec![SqlValue::Real(29.0), SqlValue::Real(72.5)],
                vec![SqlValue::Real(41.0), SqlValue::Real(13.0)],
            ],
        }
    }

    #[test]
    fn scatter_maps_columns_in_selection_order() {
        let columns = vec!["age".to_string(), "fare".to_string()];
        let spec = render(ChartKind::Scatter, &columns, &rows()).unwrap();
        assert_eq!(spec.mappings["x"], "age");
        assert_eq!(spec.mappings["y"], "fare");
        assert_eq!(spec.points.len(), 2);
        assert_eq!(spec.points[0].0, SqlValue::Real(29.0));
    }

    #[test]
    fn wrong_arity_is_reported_not_truncated() {
        let columns = vec![
            "age".to_string(),
            "fare".to_string(),
            "survived".to_string(),
        ];
        let error = render(ChartKind::Bar, &columns, &rows()).unwrap_err();
        assert!(matches!(
            error,
            PlotError::ColumnArity {
                expected: 2,
                got: 3,
                ..
            }
        ));
    }

    #[test]
    fn unknown_column_is_reported() {
        let columns = vec!["age".to_string(), "cabin".to_string()];
        let error = render(ChartKind::Scatter, &columns, &rows()).unwrap_err();
        assert!(matches!(error, PlotError::UnknownColumn(name) if name == "cabin"));
    }
}
