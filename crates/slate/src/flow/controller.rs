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

use crate::engine::EngineError;
use crate::flow::state::{AgentState, Relevance, RunOutcome};
use crate::flow::steps::{
    execute_query, AnswerComposer, ColumnSelector, FlowStep, QueryGenerator, QuestionRewriter,
    QuipComposer, RelevanceGate, RouteClassifier,
};
use crate::plots::{self, PlotError};
use crate::session::Session;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Regeneration cycles allowed per run, shared by every failure cause.
pub const MAX_ATTEMPTS: u32 = 3;

/// Extra chances the column-selection step gets when its answer does not fit
/// the chart's arity. The query is never regenerated for a selection fault.
pub const COLUMN_RETRIES: u32 = 2;

const EXHAUSTED_APOLOGY: &str =
    "I'm sorry - I could not find a working query for your question. Please try rephrasing it.";

#[derive(Error, Debug)]
pub enum FlowError {
    /// Fatal engine failure. Regeneration cannot fix it, so the run stops
    /// with a fixed apology; the cause stays attached for the logs only.
    #[error("I could not reach the data engine. Apologies - please try again in a moment.")]
    EngineUnavailable {
        #[source]
        source: EngineError,
    },
    #[error("Chart configuration failed: {0}")]
    Configuration(#[from] PlotError),
}

/// The closed set of workflow states. Routing lives in [`next_state`], a pure
/// function over the agent state, so the whole transition table is testable
/// without a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    CheckRelevance,
    CheckQueryOrPlot,
    GenerateQuery,
    ExecuteQuery,
    RegenerateQuery,
    ComposeAnswer,
    SelectColumns,
    ComposeQuip,
    Exhausted,
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowState::CheckRelevance => "check_relevance",
            FlowState::CheckQueryOrPlot => "check_query_or_plot",
            FlowState::GenerateQuery => "generate_query",
            FlowState::ExecuteQuery => "execute_query",
            FlowState::RegenerateQuery => "regenerate_query",
            FlowState::ComposeAnswer => "compose_answer",
            FlowState::SelectColumns => "select_columns",
            FlowState::ComposeQuip => "compose_quip",
            FlowState::Exhausted => "exhausted",
        };
        write!(f, "{name}")
    }
}

/// Where to go after `current`, given the declared outcome fields of the
/// state. Conditions are evaluated on entry to the state, so the
/// regeneration check reads the budget before the rewrite consumes it.
pub fn next_state(current: FlowState, state: &AgentState) -> FlowState {
    match current {
        FlowState::CheckRelevance => {
            if state.relevance == Relevance::Relevant {
                FlowState::CheckQueryOrPlot
            } else {
                FlowState::ComposeQuip
            }
        }
        FlowState::CheckQueryOrPlot => FlowState::GenerateQuery,
        FlowState::GenerateQuery => FlowState::ExecuteQuery,
        FlowState::ExecuteQuery => {
            if state.sql_error() {
                FlowState::RegenerateQuery
            } else if state.meant_as_query().unwrap_or(true) {
                FlowState::ComposeAnswer
            } else {
                FlowState::SelectColumns
            }
        }
        FlowState::RegenerateQuery => {
            if state.attempts < MAX_ATTEMPTS {
                FlowState::GenerateQuery
            } else {
                FlowState::Exhausted
            }
        }
        terminal => terminal,
    }
}

/// Drives one run through the state machine: decision and generation steps in
/// sequence, the engine for side effects, and the attempt budget on every
/// failure path.
pub struct Controller {
    session: Arc<Session>,
}

impl Controller {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn run(&self, question: &str) -> Result<RunOutcome, FlowError> {
        self.run_traced(question).await.map(|(outcome, _)| outcome)
    }

    /// Like [`run`](Self::run), also returning the final agent state. Useful
    /// to callers that want the attempt count or the generated query.
    pub async fn run_traced(
        &self,
        question: &str,
    ) -> Result<(RunOutcome, AgentState), FlowError> {
        let mut state = AgentState::new(question);
        let mut current = FlowState::CheckRelevance;

        loop {
            debug!(state = %current, attempts = state.attempts, "Entering flow state");
            match current {
                FlowState::CheckRelevance => {
                    if !self.model_step(&RelevanceGate, &mut state).await {
                        current = FlowState::Exhausted;
                        continue;
                    }
                }
                FlowState::CheckQueryOrPlot => {
                    if !self.model_step(&RouteClassifier, &mut state).await {
                        current = FlowState::Exhausted;
                        continue;
                    }
                }
                FlowState::GenerateQuery => {
                    if !self.model_step(&QueryGenerator, &mut state).await {
                        current = FlowState::Exhausted;
                        continue;
                    }
                }
                FlowState::ExecuteQuery => {
                    execute_query(&self.session, &mut state)
                        .await
                        .map_err(|source| {
                            error!(error = %source, "Engine failure ended the run");
                            FlowError::EngineUnavailable { source }
                        })?;
                }
                FlowState::RegenerateQuery => {
                    match next_state(FlowState::RegenerateQuery, &state) {
                        FlowState::GenerateQuery => {
                            if !self.model_step(&QuestionRewriter, &mut state).await {
                                current = FlowState::Exhausted;
                                continue;
                            }
                            state.attempts += 1;
                            info!(attempts = state.attempts, "Starting regeneration cycle");
                            current = FlowState::GenerateQuery;
                        }
                        other => {
                            warn!("Attempt budget exhausted");
                            current = other;
                        }
                    }
                    continue;
                }
                FlowState::ComposeAnswer => {
                    let needs_narrative = state
                        .path
                        .query()
                        .map(|q| q.narrative.is_empty())
                        .unwrap_or(false);
                    if needs_narrative && !self.model_step(&AnswerComposer, &mut state).await {
                        current = FlowState::Exhausted;
                        continue;
                    }
                    let (narrative, rows) = state
                        .path
                        .query()
                        .map(|q| (q.narrative.clone(), q.query_rows.clone().unwrap_or_default()))
                        .unwrap_or_default();
                    info!("Run finished with a tabular answer");
                    return Ok((RunOutcome::Tabular { narrative, rows }, state));
                }
                FlowState::SelectColumns => match self.select_and_render(&mut state).await? {
                    Some(outcome) => {
                        info!("Run finished with a chart");
                        return Ok((outcome, state));
                    }
                    None => {
                        current = FlowState::Exhausted;
                        continue;
                    }
                },
                FlowState::ComposeQuip => {
                    if !self.model_step(&QuipComposer, &mut state).await {
                        current = FlowState::Exhausted;
                        continue;
                    }
                    let narrative = state.quip.clone().unwrap_or_default();
                    info!("Run finished as not relevant");
                    return Ok((RunOutcome::Irrelevant { narrative }, state));
                }
                FlowState::Exhausted => {
                    info!(attempts = state.attempts, "Run finished exhausted");
                    return Ok((
                        RunOutcome::Exhausted {
                            narrative: EXHAUSTED_APOLOGY.to_string(),
                        },
                        state,
                    ));
                }
            }
            current = next_state(current, &state);
        }
    }

    /// One model-backed step under the shared attempt budget. A failed call
    /// (transport, timeout, malformed output) consumes an attempt and the
    /// step reruns; returns false once the budget is gone.
    async fn model_step(&self, step: &dyn FlowStep, state: &mut AgentState) -> bool {
        loop {
            match step.run(state, &self.session).await {
                Ok(()) => return true,
                Err(error) => {
                    warn!(step = step.name(), %error, "Model step failed");
                    if state.attempts >= MAX_ATTEMPTS {
                        return false;
                    }
                    state.attempts += 1;
                }
            }
        }
    }

    /// Column selection with its own bounded retry: an arity or membership
    /// mismatch is the selection step's fault, so the selection reruns and
    /// the query is left alone. A persistent mismatch is a configuration
    /// error for the caller.
    async fn select_and_render(
        &self,
        state: &mut AgentState,
    ) -> Result<Option<RunOutcome>, FlowError> {
        let mut selection_attempts = 0;
        loop {
            if !self.model_step(&ColumnSelector, state).await {
                return Ok(None);
            }
            let (kind, columns, rows) = {
                // unreachable off the chart path by the transition table
                let Some(chart) = state.path.chart() else {
                    return Ok(None);
                };
                (
                    chart.kind,
                    chart.columns.clone(),
                    chart.query.query_rows.clone().unwrap_or_default(),
                )
            };
            match plots::render(kind, &columns, &rows) {
                Ok(rendered) => {
                    if let Some(chart) = state.path.chart_mut() {
                        chart.rendered = Some(rendered.clone());
                    }
                    return Ok(Some(RunOutcome::Chart {
                        chart_kind: kind,
                        columns,
                        rendered,
                    }));
                }
                Err(error) if selection_attempts < COLUMN_RETRIES => {
                    selection_attempts += 1;
                    warn!(%error, selection_attempts, "Re-running column selection");
                }
                Err(error) => {
                    error!(%error, "Column selection never fitted the chart");
                    return Err(FlowError::Configuration(error));
                }
            }
        }
    }
}
