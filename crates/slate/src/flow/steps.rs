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

use crate::engine::{EngineError, RowSet, SqlValue};
use crate::flow::state::{AgentState, ChartArtifacts, PathArtifacts, QueryArtifacts};
use crate::schema::{FieldAddition, FieldType};
use crate::session::Session;
use async_trait::async_trait;
use model_contracts::{
    ChosenColumns, GeneratedQuery, ModelError, ModelResult, Narrative, OutputShape,
    RelevanceVerdict, RewrittenQuestion, Route, RouteVerdict, StructuredShape,
};
use tracing::{debug, info, warn};

/// Fixed narrative for a statement that is not a read but ran without
/// raising.
pub const ACTION_COMPLETED: &str = "The action has been successfully completed.";

const ROWS_IN_PROMPT: usize = 20;

/// One decision or generation step: reads the state, makes one model call
/// with a fixed output shape, writes the declared outcome fields back. A
/// failed or malformed call is an error; it never leaves partial state
/// behind.
#[async_trait]
pub trait FlowStep: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, state: &mut AgentState, session: &Session) -> ModelResult<()>;
}

pub struct RelevanceGate;

#[async_trait]
impl FlowStep for RelevanceGate {
    fn name(&self) -> &'static str {
        "relevance_gate"
    }

    async fn run(&self, state: &mut AgentState, session: &Session) -> ModelResult<()> {
        let schema = session.schema_text().await;
        info!(question = state.question(), "Checking relevance");
        let system = format!(
            "You are an assistant that determines whether a given question is \
             related to the following database schema.\n\nSchema:\n{schema}\n\
             Respond with JSON only: {{\"relevance\": \"relevant\"}} or \
             {{\"relevance\": \"not_relevant\"}}."
        );
        let value = session
            .structured_call(&system, state.question(), OutputShape::RelevanceVerdict)
            .await?;
        let verdict = RelevanceVerdict::from_value(value)?;
        state.relevance = verdict.relevance.into();
        Ok(())
    }
}

pub struct RouteClassifier;

#[async_trait]
impl FlowStep for RouteClassifier {
    fn name(&self) -> &'static str {
        "route_classifier"
    }

    async fn run(&self, state: &mut AgentState, session: &Session) -> ModelResult<()> {
        let schema = session.schema_text().await;
        info!(question = state.question(), "Classifying query vs chart");
        let system = format!(
            "You are an assistant that determines whether a given question asks \
             for a query result or a chart, based on the following schema:\n\
             {schema}\nRespond with JSON only: {{\"route\": \"query\"}} if the \
             question is data retrieval or manipulation expressible in SQL, or \
             {{\"route\": \"chart\", \"chart_kind\": \"scatter\"}} (or \"bar\") \
             if it asks for a visualisation."
        );
        let value = session
            .structured_call(&system, state.question(), OutputShape::RouteVerdict)
            .await?;
        let verdict = RouteVerdict::from_value(value)?;
        state.path = match verdict.route {
            Route::Query => PathArtifacts::Query(QueryArtifacts::new()),
            Route::Chart => {
                // validate() guarantees the kind is present on this route
                let kind = verdict.chart_kind.ok_or_else(|| ModelError::MalformedOutput {
                    shape: OutputShape::RouteVerdict,
                    reason: "chart route without chart_kind".to_string(),
                })?;
                PathArtifacts::Chart(ChartArtifacts::new(kind))
            }
        };
        debug!(meant_as_query = ?state.meant_as_query(), "Route decided");
        Ok(())
    }
}

pub struct QueryGenerator;

#[async_trait]
impl FlowStep for QueryGenerator {
    fn name(&self) -> &'static str {
        "query_generator"
    }

    async fn run(&self, state: &mut AgentState, session: &Session) -> ModelResult<()> {
        let schema = session.schema_text().await;
        let question = state.working_question.clone();
        info!(question = %question, "Converting question to SQL");
        let system = format!(
            "You are an assistant that converts natural language questions into \
             SQL queries based on the following schema:\n{schema}\n\
             Provide only the SQL query without any explanations. Alias columns \
             appropriately to match the expected keys in the result, e.g. alias \
             'passengers.age' as 'age'.\n\
             Respond with JSON only: {{\"sql_query\": \"...\"}}."
        );
        let value = session
            .structured_call(&system, &question, OutputShape::GeneratedQuery)
            .await?;
        let generated = GeneratedQuery::from_value(value)?;

        let query = state.path.query_mut().ok_or_else(|| {
            ModelError::Configuration("query generation before route decision".to_string())
        })?;
        query.sql_query = generated.sql_query;
        query.query_rows = None;
        query.sql_error = false;
        query.error_message = None;
        Ok(())
    }
}

pub struct QuestionRewriter;

#[async_trait]
impl FlowStep for QuestionRewriter {
    fn name(&self) -> &'static str {
        "question_rewriter"
    }

    async fn run(&self, state: &mut AgentState, session: &Session) -> ModelResult<()> {
        let (sql, error) = state
            .path
            .query()
            .map(|q| {
                (
                    q.sql_query.clone(),
                    q.error_message.clone().unwrap_or_default(),
                )
            })
            .unwrap_or_default();
        info!(error = %error, "Rewriting question after failed execution");
        let system = format!(
            "You are an assistant that rewrites a question so it can be \
             translated into a working SQL query. The previous attempt failed.\n\
             Original question: {original}\n\
             Failed SQL: {sql}\nExecution error: {error}\n\
             Rewrite the question to avoid the failure while preserving its \
             meaning. Respond with JSON only: {{\"question\": \"...\"}}.",
            original = state.question(),
        );
        let value = session
            .structured_call(&system, &state.working_question, OutputShape::RewrittenQuestion)
            .await?;
        let rewritten = RewrittenQuestion::from_value(value)?;
        state.working_question = rewritten.question;
        Ok(())
    }
}

pub struct AnswerComposer;

#[async_trait]
impl FlowStep for AnswerComposer {
    fn name(&self) -> &'static str {
        "answer_composer"
    }

    async fn run(&self, state: &mut AgentState, session: &Session) -> ModelResult<()> {
        let (sql, rows_text) = state
            .path
            .query()
            .map(|q| {
                (
                    q.sql_query.clone(),
                    q.query_rows
                        .as_ref()
                        .map(|rows| format_rows(rows, ROWS_IN_PROMPT))
                        .unwrap_or_default(),
                )
            })
            .unwrap_or_default();
        info!("Composing answer from executed query");
        let system = format!(
            "You are an assistant that answers a user's question from an \
             executed SQL query result.\nQuestion: {question}\n\
             SQL query: {sql}\nResult:\n{rows_text}\n\
             Provide a concise and clear answer to the question. Respond with \
             JSON only: {{\"response\": \"...\"}}.",
            question = state.question(),
        );
        let value = session
            .structured_call(&system, state.question(), OutputShape::Narrative)
            .await?;
        let narrative = Narrative::from_value(value)?;
        let query = state.path.query_mut().ok_or_else(|| {
            ModelError::Configuration("answer composition before route decision".to_string())
        })?;
        query.narrative = narrative.response;
        Ok(())
    }
}

pub struct QuipComposer;

#[async_trait]
impl FlowStep for QuipComposer {
    fn name(&self) -> &'static str {
        "quip_composer"
    }

    async fn run(&self, state: &mut AgentState, session: &Session) -> ModelResult<()> {
        let schema = session.schema_text().await;
        info!(question = state.question(), "Composing off-topic reply");
        let system = format!(
            "The user's question is not related to the dataset described by \
             this schema:\n{schema}\nReply with a short, light-hearted refusal \
             that steers the user back to questions about the data. Respond \
             with JSON only: {{\"response\": \"...\"}}."
        );
        let value = session
            .structured_call(&system, state.question(), OutputShape::Narrative)
            .await?;
        let narrative = Narrative::from_value(value)?;
        state.quip = Some(narrative.response);
        Ok(())
    }
}

pub struct ColumnSelector;

#[async_trait]
impl FlowStep for ColumnSelector {
    fn name(&self) -> &'static str {
        "column_selector"
    }

    async fn run(&self, state: &mut AgentState, session: &Session) -> ModelResult<()> {
        let schema = session.schema_text().await;
        let kind = state
            .path
            .chart()
            .map(|chart| chart.kind)
            .ok_or_else(|| {
                ModelError::Configuration("column selection outside the chart path".to_string())
            })?;
        let required = kind.required_columns();
        info!(kind = kind.as_str(), required, "Selecting chart columns");
        let system = format!(
            "You are an assistant that chooses the columns for a {kind} chart \
             based on the following schema:\n{schema}\n\
             Choose exactly {required} column names, in the order they should \
             be used in the chart (x first, then y), with no SQL and no \
             explanations. Respond with JSON only: {{\"columns\": [\"...\"]}}.",
            kind = kind.as_str(),
        );
        let value = session
            .structured_call(&system, state.question(), OutputShape::ChosenColumns)
            .await?;
        let chosen = ChosenColumns::from_value(value)?;
        if let Some(chart) = state.path.chart_mut() {
            chart.columns = chosen.columns;
        }
        Ok(())
    }
}

/// Runs the generated statement against the engine. A rejected statement is
/// recorded in the state for the controller to route on; only a fatal engine
/// failure escapes. On a successful read the rows are materialised into the
/// run's scratch table and its columns are reported to the schema provider.
pub async fn execute_query(session: &Session, state: &mut AgentState) -> Result<(), EngineError> {
    let Some(query) = state.path.query_mut() else {
        return Ok(());
    };
    let sql = query.sql_query.trim().to_string();
    info!(sql = %sql, "Executing generated statement");

    match session.execute(&sql).await {
        Ok(rows) => {
            if is_read_statement(&sql) {
                session.materialise(&query.scratch_table, &rows).await?;
                let additions = discovered_fields(&query.scratch_table, &rows);
                if let Err(error) = session.merge_schema(&additions).await {
                    // the run can still answer; the schema just stays behind
                    warn!(%error, "Could not merge discovered fields");
                }
                query.query_rows = Some(rows);
                debug!("Read statement executed and materialised");
            } else {
                query.query_rows = Some(RowSet::default());
                query.narrative = ACTION_COMPLETED.to_string();
                debug!("Non-read statement executed");
            }
            query.sql_error = false;
            query.error_message = None;
            Ok(())
        }
        Err(EngineError::QueryRejected(message)) => {
            warn!(error = %message, "Statement rejected");
            query.sql_error = true;
            query.error_message = Some(message);
            Ok(())
        }
        Err(fatal) => Err(fatal),
    }
}

fn is_read_statement(sql: &str) -> bool {
    let lower = sql.trim_start().to_ascii_lowercase();
    lower.starts_with("select") || lower.starts_with("with")
}

fn discovered_fields(table: &str, rows: &RowSet) -> Vec<FieldAddition> {
    rows.columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let field_type = rows
                .rows
                .iter()
                .find_map(|row| match row.get(index) {
                    Some(SqlValue::Integer(_)) => Some(FieldType::Integer),
                    Some(SqlValue::Real(_)) => Some(FieldType::Real),
                    Some(SqlValue::Text(_)) => Some(FieldType::Text),
                    Some(SqlValue::Boolean(_)) => Some(FieldType::Boolean),
                    _ => None,
                })
                .unwrap_or(FieldType::Text);
            FieldAddition {
                table: table.to_string(),
                field: column.clone(),
                field_type,
            }
        })
        .collect()
}

fn format_rows(rows: &RowSet, limit: usize) -> String {
    let mut out = rows.columns.join(" | ");
    out.push('\n');
    for row in rows.rows.iter().take(limit) {
        let line = row
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(" | ");
        out.push_str(&line);
        out.push('\n');
    }
    if rows.len() > limit {
        out.push_str(&format!("... ({} rows total)\n", rows.len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_statement_detection() {
        assert!(is_read_statement("SELECT * FROM passengers"));
        assert!(is_read_statement("  with t as (select 1) select * from t"));
        assert!(!is_read_statement("UPDATE passengers SET age = 1"));
        assert!(!is_read_statement("CREATE TABLE notes (body TEXT)"));
    }

    #[test]
    fn discovered_fields_infer_from_first_non_null() {
        let rows = RowSet {
            columns: vec!["age".to_string(), "note".to_string()],
            rows: vec![
                vec![SqlValue::Null, SqlValue::Null],
                vec![SqlValue::Real(29.0), SqlValue::Text("ok".to_string())],
            ],
        };
        let additions = discovered_fields("scratch_1", &rows);
        assert_eq!(additions.len(), 2);
        assert_eq!(additions[0].field_type, FieldType::Real);
        assert_eq!(additions[1].field_type, FieldType::Text);
        assert!(additions.iter().all(|a| a.table == "scratch_1"));
    }

    #[test]
    fn row_formatting_caps_at_limit() {
        let rows = RowSet {
            columns: vec!["n".to_string()],
            rows: (0..5).map(|i| vec![SqlValue::Integer(i)]).collect(),
        };
        let text = format_rows(&rows, 2);
        assert!(text.starts_with("n\n0\n1\n"));
        assert!(text.contains("(5 rows total)"));
    }
}
