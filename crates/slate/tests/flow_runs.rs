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

use async_trait::async_trait;
use model_contracts::{ChartKind, ModelError, ModelRequest, ModelResponse, ModelResult};
use slate::flow::steps::ACTION_COMPLETED;
use slate::{Controller, FlowError, ModelAdapter, RunOutcome, Session, MAX_ATTEMPTS};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const SEED_SQL: &str = "
CREATE TABLE passengers (age REAL, fare REAL, survived BOOLEAN);
INSERT INTO passengers VALUES (29.0, 211.34, 1);
INSERT INTO passengers VALUES (22.0, 7.25, 0);
INSERT INTO passengers VALUES (38.0, 71.28, 1);
INSERT INTO passengers VALUES (26.0, 7.92, 1);
INSERT INTO passengers VALUES (54.0, 51.86, 0);
";

/// Replays a fixed sequence of model replies; `Err` entries simulate a failed
/// or unreachable model service.
struct ScriptedAdapter {
    replies: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedAdapter {
    fn new(replies: Vec<Result<&str, &str>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
        }
    }

    fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    async fn call(&self, request: ModelRequest) -> ModelResult<ModelResponse> {
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted adapter ran out of replies");
        match next {
            Ok(content) => Ok(ModelResponse::new(request.id, content, "scripted", "test")),
            Err(message) => Err(ModelError::Network(message)),
        }
    }
}

async fn session_with(replies: Vec<Result<&str, &str>>) -> (Arc<Session>, Arc<ScriptedAdapter>) {
    let adapter = Arc::new(ScriptedAdapter::new(replies));
    let session = Arc::new(Session::open(adapter.clone()).unwrap());
    session.seed(SEED_SQL).await.unwrap();
    (session, adapter)
}

#[tokio::test]
async fn tabular_question_answers_on_first_attempt() {
    let (session, adapter) = session_with(vec![
        Ok(r#"{"relevance": "relevant"}"#),
        Ok(r#"{"route": "query"}"#),
        Ok(r#"{"sql_query": "SELECT AVG(age) AS average_age FROM passengers WHERE survived = 1"}"#),
        Ok(r#"{"response": "Surviving passengers were about 31 years old on average."}"#),
    ])
    .await;
    let controller = Controller::new(session.clone());

    let (outcome, state) = controller
        .run_traced("What is the average age of passengers who survived?")
        .await
        .unwrap();

    let RunOutcome::Tabular { narrative, rows } = &outcome else {
        panic!("expected a tabular outcome, got {}", outcome.kind());
    };
    assert!(!narrative.is_empty());
    assert_eq!(rows.columns, vec!["average_age"]);
    assert_eq!(rows.len(), 1);
    assert_eq!(state.attempts, 0);
    assert_eq!(state.meant_as_query(), Some(true));
    assert_eq!(adapter.remaining(), 0);

    // the materialised scratch table is retrievable by name with the same
    // shape as the original result
    let scratch = state.path.query().unwrap().scratch_table.clone();
    let reread = session
        .execute(&format!("SELECT * FROM {scratch}"))
        .await
        .unwrap();
    assert_eq!(reread.columns, rows.columns);
    assert_eq!(reread.len(), rows.len());
}

#[tokio::test]
async fn chart_question_selects_columns_in_order() {
    let (session, adapter) = session_with(vec![
        Ok(r#"{"relevance": "relevant"}"#),
        Ok(r#"{"route": "chart", "chart_kind": "scatter"}"#),
        Ok(r#"{"sql_query": "SELECT age, fare FROM passengers"}"#),
        Ok(r#"{"columns": ["age", "fare"]}"#),
    ])
    .await;
    let controller = Controller::new(session);

    let (outcome, state) = controller.run_traced("plot age vs fare").await.unwrap();

    let RunOutcome::Chart {
        chart_kind,
        columns,
        rendered,
    } = &outcome
    else {
        panic!("expected a chart outcome, got {}", outcome.kind());
    };
    assert_eq!(*chart_kind, ChartKind::Scatter);
    assert_eq!(columns, &vec!["age".to_string(), "fare".to_string()]);
    assert_eq!(rendered.mappings["x"], "age");
    assert_eq!(rendered.mappings["y"], "fare");
    assert_eq!(rendered.points.len(), 5);
    assert_eq!(state.meant_as_query(), Some(false));
    assert_eq!(state.attempts, 0);
    assert_eq!(adapter.remaining(), 0);
}

#[tokio::test]
async fn failed_execution_regenerates_once_then_succeeds() {
    let (session, adapter) = session_with(vec![
        Ok(r#"{"relevance": "relevant"}"#),
        Ok(r#"{"route": "query"}"#),
        // deliberate syntax error on the first generation
        Ok(r#"{"sql_query": "SELEC AVG(age) FROM passengers"}"#),
        Ok(r#"{"question": "What is the mean age of passengers who survived?"}"#),
        Ok(r#"{"sql_query": "SELECT AVG(age) AS average_age FROM passengers WHERE survived = 1"}"#),
        Ok(r#"{"response": "About 31 years."}"#),
    ])
    .await;
    let controller = Controller::new(session);

    let (outcome, state) = controller
        .run_traced("What is the average age of passengers who survived?")
        .await
        .unwrap();

    assert_eq!(outcome.kind(), "tabular");
    assert_eq!(state.attempts, 1);
    assert_eq!(adapter.remaining(), 0);
}

#[tokio::test]
async fn irrelevant_question_never_touches_the_engine() {
    let (session, adapter) = session_with(vec![
        Ok(r#"{"relevance": "not_relevant"}"#),
        Ok(r#"{"response": "My crystal ball only shows passenger data, I'm afraid."}"#),
    ])
    .await;
    let controller = Controller::new(session.clone());

    let (outcome, state) = controller
        .run_traced("What's my favourite colour?")
        .await
        .unwrap();

    let RunOutcome::Irrelevant { narrative } = &outcome else {
        panic!("expected an irrelevant outcome, got {}", outcome.kind());
    };
    assert!(!narrative.is_empty());
    assert_eq!(state.meant_as_query(), None);
    assert_eq!(adapter.remaining(), 0);

    // only the seed batch ever reached the engine
    let metrics = session.engine_metrics().await;
    assert_eq!(metrics.statements_run, 1);
}

#[tokio::test]
async fn exhausted_budget_surfaces_the_apology() {
    let bad = r#"{"sql_query": "SELEC broken FROM nowhere"}"#;
    let rewrite = r#"{"question": "try again"}"#;
    let (session, adapter) = session_with(vec![
        Ok(r#"{"relevance": "relevant"}"#),
        Ok(r#"{"route": "query"}"#),
        Ok(bad),
        Ok(rewrite),
        Ok(bad),
        Ok(rewrite),
        Ok(bad),
        Ok(rewrite),
        Ok(bad),
    ])
    .await;
    let controller = Controller::new(session);

    let (outcome, state) = controller
        .run_traced("What is the average age of passengers who survived?")
        .await
        .unwrap();

    let RunOutcome::Exhausted { narrative } = &outcome else {
        panic!("expected an exhausted outcome, got {}", outcome.kind());
    };
    assert!(!narrative.is_empty());
    // never a partial or garbled result: the narrative is the fixed apology,
    // not the engine's error text
    assert!(!narrative.contains("SELEC"));
    assert_eq!(state.attempts, MAX_ATTEMPTS);
    assert_eq!(adapter.remaining(), 0);
}

#[tokio::test]
async fn malformed_step_output_consumes_an_attempt() {
    let (session, adapter) = session_with(vec![
        // prose with no JSON: a malformed structured response
        Ok("I would say this is probably relevant."),
        Ok(r#"{"relevance": "relevant"}"#),
        Ok(r#"{"route": "query"}"#),
        Ok(r#"{"sql_query": "SELECT COUNT(*) AS survivors FROM passengers WHERE survived = 1"}"#),
        Ok(r#"{"response": "Three passengers survived."}"#),
    ])
    .await;
    let controller = Controller::new(session);

    let (outcome, state) = controller.run_traced("How many survived?").await.unwrap();

    assert_eq!(outcome.kind(), "tabular");
    assert_eq!(state.attempts, 1);
    assert_eq!(adapter.remaining(), 0);
}

#[tokio::test]
async fn model_outage_past_the_budget_exhausts_the_run() {
    let (session, _adapter) = session_with(vec![
        Err("connection refused"),
        Err("connection refused"),
        Err("connection refused"),
        Err("connection refused"),
    ])
    .await;
    let controller = Controller::new(session);

    let (outcome, state) = controller.run_traced("How many survived?").await.unwrap();

    assert_eq!(outcome.kind(), "exhausted");
    assert_eq!(state.attempts, MAX_ATTEMPTS);
}

#[tokio::test]
async fn column_arity_mismatch_retries_the_selection_step() {
    let (session, adapter) = session_with(vec![
        Ok(r#"{"relevance": "relevant"}"#),
        Ok(r#"{"route": "chart", "chart_kind": "bar"}"#),
        Ok(r#"{"sql_query": "SELECT age, fare, survived FROM passengers"}"#),
        // three columns do not fit a two-column chart; the selection step is
        // retried, the query is not regenerated
        Ok(r#"{"columns": ["age", "fare", "survived"]}"#),
        Ok(r#"{"columns": ["age", "fare"]}"#),
    ])
    .await;
    let controller = Controller::new(session);

    let (outcome, state) = controller
        .run_traced("bar chart of age against fare")
        .await
        .unwrap();

    assert_eq!(outcome.kind(), "chart");
    assert_eq!(state.attempts, 0);
    assert_eq!(adapter.remaining(), 0);
}

#[tokio::test]
async fn persistent_arity_mismatch_is_a_configuration_error() {
    let three = r#"{"columns": ["age", "fare", "survived"]}"#;
    let (session, _adapter) = session_with(vec![
        Ok(r#"{"relevance": "relevant"}"#),
        Ok(r#"{"route": "chart", "chart_kind": "bar"}"#),
        Ok(r#"{"sql_query": "SELECT age, fare, survived FROM passengers"}"#),
        Ok(three),
        Ok(three),
        Ok(three),
    ])
    .await;
    let controller = Controller::new(session);

    let error = controller
        .run_traced("bar chart of everything")
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::Configuration(_)));
}

#[tokio::test]
async fn non_read_statement_gets_the_fixed_narrative() {
    let (session, adapter) = session_with(vec![
        Ok(r#"{"relevance": "relevant"}"#),
        Ok(r#"{"route": "query"}"#),
        Ok(r#"{"sql_query": "CREATE TABLE notes (body TEXT)"}"#),
    ])
    .await;
    let controller = Controller::new(session);

    let (outcome, state) = controller
        .run_traced("create a notes table")
        .await
        .unwrap();

    let RunOutcome::Tabular { narrative, rows } = &outcome else {
        panic!("expected a tabular outcome, got {}", outcome.kind());
    };
    assert_eq!(narrative, ACTION_COMPLETED);
    assert!(rows.is_empty());
    assert_eq!(state.attempts, 0);
    // no answer-composition call was needed
    assert_eq!(adapter.remaining(), 0);
}

#[tokio::test]
async fn chart_run_discovers_scratch_columns_for_selection() {
    let (session, _adapter) = session_with(vec![
        Ok(r#"{"relevance": "relevant"}"#),
        Ok(r#"{"route": "chart", "chart_kind": "scatter"}"#),
        Ok(r#"{"sql_query": "SELECT age AS x_age, fare AS y_fare FROM passengers"}"#),
        Ok(r#"{"columns": ["x_age", "y_fare"]}"#),
    ])
    .await;
    let controller = Controller::new(session.clone());

    let (outcome, state) = controller.run_traced("plot age vs fare").await.unwrap();
    assert_eq!(outcome.kind(), "chart");

    // the aliased result columns were reported back to the schema provider
    // under the run's scratch table
    let scratch = state.path.query().unwrap().scratch_table.clone();
    let described = session.describe_schema(Some(&scratch)).await.unwrap();
    assert!(described.contains("x_age"));
    assert!(described.contains("y_fare"));
}
