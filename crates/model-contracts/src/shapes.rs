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

use crate::types::{ModelError, ModelResult, OutputShape};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured model output the workflow can consume. `from_value` is the
/// only entry point: it parses and validates in one pass, so a shape value in
/// the workflow state is always complete.
pub trait StructuredShape: DeserializeOwned + Sized {
    const SHAPE: OutputShape;

    /// Invariants beyond what serde checks, e.g. non-empty text fields.
    fn validate(&self) -> Result<(), String>;

    fn from_value(value: Value) -> ModelResult<Self> {
        let parsed: Self =
            serde_json::from_value(value).map_err(|e| ModelError::MalformedOutput {
                shape: Self::SHAPE,
                reason: e.to_string(),
            })?;
        parsed
            .validate()
            .map_err(|reason| ModelError::MalformedOutput {
                shape: Self::SHAPE,
                reason,
            })?;
        Ok(parsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    Relevant,
    NotRelevant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    pub relevance: Relevance,
}

impl StructuredShape for RelevanceVerdict {
    const SHAPE: OutputShape = OutputShape::RelevanceVerdict;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Query,
    Chart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Scatter,
    Bar,
}

impl ChartKind {
    /// Column arity the renderer requires for this kind.
    pub fn required_columns(&self) -> usize {
        match self {
            ChartKind::Scatter | ChartKind::Bar => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Scatter => "scatter",
            ChartKind::Bar => "bar",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteVerdict {
    pub route: Route,
    #[serde(default)]
    pub chart_kind: Option<ChartKind>,
}

impl StructuredShape for RouteVerdict {
    const SHAPE: OutputShape = OutputShape::RouteVerdict;

    fn validate(&self) -> Result<(), String> {
        if self.route == Route::Chart && self.chart_kind.is_none() {
            return Err("chart route requires a chart_kind".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub sql_query: String,
}

impl StructuredShape for GeneratedQuery {
    const SHAPE: OutputShape = OutputShape::GeneratedQuery;

    fn validate(&self) -> Result<(), String> {
        if self.sql_query.trim().is_empty() {
            return Err("sql_query is empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewrittenQuestion {
    pub question: String,
}

impl StructuredShape for RewrittenQuestion {
    const SHAPE: OutputShape = OutputShape::RewrittenQuestion;

    fn validate(&self) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("question is empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChosenColumns {
    pub columns: Vec<String>,
}

impl StructuredShape for ChosenColumns {
    const SHAPE: OutputShape = OutputShape::ChosenColumns;

    fn validate(&self) -> Result<(), String> {
        if self.columns.is_empty() {
            return Err("columns is empty".to_string());
        }
        if self.columns.iter().any(|c| c.trim().is_empty()) {
            return Err("columns contains an empty name".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub response: String,
}

impl StructuredShape for Narrative {
    const SHAPE: OutputShape = OutputShape::Narrative;

    fn validate(&self) -> Result<(), String> {
        if self.response.trim().is_empty() {
            return Err("response is empty".to_string());
        }
        Ok(())
    }
}
