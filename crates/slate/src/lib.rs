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

pub mod engine;
pub mod flow;
pub mod llm;
pub mod plots;
pub mod schema;
pub mod session;

pub use engine::{EngineError, EngineMetrics, RowSet, SqlEngine, SqlValue};
pub use flow::{
    next_state, AgentState, ChartArtifacts, Controller, FlowError, FlowState, PathArtifacts,
    QueryArtifacts, Relevance, RunOutcome, COLUMN_RETRIES, MAX_ATTEMPTS,
};
pub use llm::{extract_json_from_text, HttpModelAdapter, ModelAdapter};
pub use plots::{PlotError, RenderSpec};
pub use schema::{FieldAddition, FieldType, Schema, SchemaError, TableDef};
pub use session::Session;
