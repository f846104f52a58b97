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

use crate::engine::RowSet;
use crate::plots::RenderSpec;
use model_contracts::ChartKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    Unknown,
    Relevant,
    NotRelevant,
}

impl From<model_contracts::Relevance> for Relevance {
    fn from(verdict: model_contracts::Relevance) -> Self {
        match verdict {
            model_contracts::Relevance::Relevant => Relevance::Relevant,
            model_contracts::Relevance::NotRelevant => Relevance::NotRelevant,
        }
    }
}

/// Everything the query path accumulates: the generated statement, the
/// uniquely named scratch table its rows are materialised into, the outcome
/// flag the controller routes on, and the narrative shown to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryArtifacts {
    pub sql_query: String,
    pub scratch_table: String,
    pub query_rows: Option<RowSet>,
    pub sql_error: bool,
    pub error_message: Option<String>,
    pub narrative: String,
}

impl QueryArtifacts {
    pub fn new() -> Self {
        Self {
            // unique per run; a collision with a prior run's scratch table is
            // a defect, not a recoverable condition
            scratch_table: format!("scratch_{}", Uuid::new_v4().simple()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartArtifacts {
    pub query: QueryArtifacts,
    pub kind: ChartKind,
    pub columns: Vec<String>,
    pub rendered: Option<RenderSpec>,
}

impl ChartArtifacts {
    pub fn new(kind: ChartKind) -> Self {
        Self {
            query: QueryArtifacts::new(),
            kind,
            columns: Vec::new(),
            rendered: None,
        }
    }
}

/// The route decision as data. Exactly one branch is ever active for a run;
/// there is no way to populate query and chart artifacts at the same time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PathArtifacts {
    Undecided,
    Query(QueryArtifacts),
    Chart(ChartArtifacts),
}

impl PathArtifacts {
    pub fn meant_as_query(&self) -> Option<bool> {
        match self {
            PathArtifacts::Undecided => None,
            PathArtifacts::Query(_) => Some(true),
            PathArtifacts::Chart(_) => Some(false),
        }
    }

    /// The query artifacts of whichever branch is active; the chart branch
    /// carries a query too, since the chart's data comes from one.
    pub fn query(&self) -> Option<&QueryArtifacts> {
        match self {
            PathArtifacts::Undecided => None,
            PathArtifacts::Query(query) => Some(query),
            PathArtifacts::Chart(chart) => Some(&chart.query),
        }
    }

    pub fn query_mut(&mut self) -> Option<&mut QueryArtifacts> {
        match self {
            PathArtifacts::Undecided => None,
            PathArtifacts::Query(query) => Some(query),
            PathArtifacts::Chart(chart) => Some(&mut chart.query),
        }
    }

    pub fn chart(&self) -> Option<&ChartArtifacts> {
        match self {
            PathArtifacts::Chart(chart) => Some(chart),
            _ => None,
        }
    }

    pub fn chart_mut(&mut self) -> Option<&mut ChartArtifacts> {
        match self {
            PathArtifacts::Chart(chart) => Some(chart),
            _ => None,
        }
    }
}

/// The single record threaded through one run. The controller owns it
/// exclusively; steps see it only for the duration of their call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    question: String,
    /// The question as currently posed to the query generator; rewritten on
    /// each regeneration cycle while `question` stays untouched.
    pub working_question: String,
    pub relevance: Relevance,
    pub path: PathArtifacts,
    pub attempts: u32,
    /// Narrative for the irrelevant terminal.
    pub quip: Option<String>,
}

impl AgentState {
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            working_question: question.to_string(),
            relevance: Relevance::Unknown,
            path: PathArtifacts::Undecided,
            attempts: 0,
            quip: None,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn meant_as_query(&self) -> Option<bool> {
        self.path.meant_as_query()
    }

    pub fn sql_error(&self) -> bool {
        self.path.query().map(|q| q.sql_error).unwrap_or(false)
    }
}

/// What the caller gets back. Exactly one variant per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Tabular {
        narrative: String,
        rows: RowSet,
    },
    Chart {
        chart_kind: ChartKind,
        columns: Vec<String>,
        rendered: RenderSpec,
    },
    Irrelevant {
        narrative: String,
    },
    Exhausted {
        narrative: String,
    },
}

impl RunOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            RunOutcome::Tabular { .. } => "tabular",
            RunOutcome::Chart { .. } => "chart",
            RunOutcome::Irrelevant { .. } => "irrelevant",
            RunOutcome::Exhausted { .. } => "exhausted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_table_names_are_unique_across_runs() {
        let a = QueryArtifacts::new();
        let b = QueryArtifacts::new();
        assert_ne!(a.scratch_table, b.scratch_table);
        assert!(a.scratch_table.starts_with("scratch_"));
    }

    #[test]
    fn path_is_mutually_exclusive() {
        let mut state = AgentState::new("plot age vs fare");
        assert_eq!(state.meant_as_query(), None);

        state.path = PathArtifacts::Chart(ChartArtifacts::new(ChartKind::Scatter));
        assert_eq!(state.meant_as_query(), Some(false));
        assert!(state.path.query().is_some());
        assert!(state.path.chart().is_some());

        state.path = PathArtifacts::Query(QueryArtifacts::new());
        assert_eq!(state.meant_as_query(), Some(true));
        assert!(state.path.chart().is_none());
    }
}
