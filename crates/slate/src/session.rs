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

use crate::engine::{EngineError, EngineMetrics, RowSet, SqlEngine};
use crate::llm::ModelAdapter;
use crate::schema::{FieldAddition, Schema, SchemaError};
use model_contracts::{ModelError, ModelResult, OutputShape};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

const DEFAULT_STEP_TIMEOUT_SECS: u64 = 60;

/// One dataset, one model adapter, any number of concurrent runs. The engine
/// sits behind a mutex and the schema behind a read-write lock, so readers
/// overlap and schema extension writes serialise.
pub struct Session {
    engine: Mutex<SqlEngine>,
    schema: RwLock<Schema>,
    adapter: Arc<dyn ModelAdapter>,
    step_timeout: Duration,
}

impl Session {
    pub fn open(adapter: Arc<dyn ModelAdapter>) -> Result<Self, EngineError> {
        let engine = SqlEngine::in_memory()?;
        let step_timeout = std::env::var("SLATE_STEP_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS));
        Ok(Self {
            engine: Mutex::new(engine),
            schema: RwLock::new(Schema::new()),
            adapter,
            step_timeout,
        })
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Seeds the dataset and takes the session's schema snapshot from the
    /// engine's actual structure.
    pub async fn seed(&self, sql: &str) -> Result<(), EngineError> {
        {
            let mut engine = self.engine.lock().await;
            engine.execute_batch(sql)?;
        }
        self.refresh_schema().await
    }

    pub async fn refresh_schema(&self) -> Result<(), EngineError> {
        let snapshot = {
            let engine = self.engine.lock().await;
            engine.introspect()?
        };
        let mut schema = self.schema.write().await;
        *schema = snapshot;
        info!("Schema snapshot refreshed");
        Ok(())
    }

    pub async fn describe_schema(&self, table: Option<&str>) -> Result<String, SchemaError> {
        let schema = self.schema.read().await;
        schema.describe(table)
    }

    /// The full schema as prompt text. Describing everything cannot fail.
    pub async fn schema_text(&self) -> String {
        let schema = self.schema.read().await;
        schema.describe(None).unwrap_or_default()
    }

    pub async fn schema_snapshot(&self) -> Schema {
        self.schema.read().await.clone()
    }

    /// Serialised schema extension; concurrent runs discovering fields at the
    /// same time cannot lose updates.
    pub async fn merge_schema(&self, additions: &[FieldAddition]) -> Result<usize, SchemaError> {
        let mut schema = self.schema.write().await;
        schema.merge(additions)
    }

    pub async fn execute(&self, sql: &str) -> Result<RowSet, EngineError> {
        let mut engine = self.engine.lock().await;
        engine.execute(sql)
    }

    pub async fn materialise(&self, table: &str, rows: &RowSet) -> Result<(), EngineError> {
        let mut engine = self.engine.lock().await;
        engine.materialise(table, rows)
    }

    pub async fn engine_metrics(&self) -> EngineMetrics {
        let engine = self.engine.lock().await;
        engine.metrics()
    }

    /// One model call under the per-run deadline. Unbounded external latency
    /// becomes `ModelError::Timeout` instead of a hung run.
    pub async fn structured_call(
        &self,
        system_prompt: &str,
        user_input: &str,
        shape: OutputShape,
    ) -> ModelResult<Value> {
        tokio::time::timeout(
            self.step_timeout,
            self.adapter.generate_structured(system_prompt, user_input, shape),
        )
        .await
        .map_err(|_| ModelError::Timeout)?
    }
}
