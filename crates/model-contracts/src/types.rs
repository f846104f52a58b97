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
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Anthropic,
    OpenAI,
    Ollama,
    Custom(String),
}

/// The closed set of structured outputs the workflow asks a model for. Every
/// call names the shape it expects; anything that does not parse into that
/// shape is a step failure, never a partial result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    RelevanceVerdict,
    RouteVerdict,
    GeneratedQuery,
    RewrittenQuestion,
    ChosenColumns,
    Narrative,
}

impl std::fmt::Display for OutputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputShape::RelevanceVerdict => "relevance_verdict",
            OutputShape::RouteVerdict => "route_verdict",
            OutputShape::GeneratedQuery => "generated_query",
            OutputShape::RewrittenQuestion => "rewritten_question",
            OutputShape::ChosenColumns => "chosen_columns",
            OutputShape::Narrative => "narrative",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed structured output for {shape}: {reason}")]
    MalformedOutput { shape: OutputShape, reason: String },

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Timeout error")]
    Timeout,
}

pub type ModelResult<T> = Result<T, ModelError>;

impl From<String> for Provider {
    fn from(s: String) -> Self {
        match s.as_str() {
            "anthropic" => Provider::Anthropic,
            "openai" => Provider::OpenAI,
            "ollama" => Provider::Ollama,
            _ => Provider::Custom(s),
        }
    }
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
            Provider::Ollama => "ollama",
            Provider::Custom(s) => s.as_str(),
        }
    }
}
