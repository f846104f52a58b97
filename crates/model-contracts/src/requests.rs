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

use crate::types::OutputShape;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub id: Uuid,
    pub system_prompt: String,
    pub user_prompt: String,
    pub expected_shape: Option<OutputShape>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl ModelRequest {
    /// A deterministic, shape-constrained request. Classification and query
    /// generation run at temperature zero so regeneration cycles change the
    /// question, not the sampling.
    pub fn structured(system: &str, user: &str, shape: OutputShape) -> Self {
        Self {
            id: Uuid::new_v4(),
            system_prompt: system.to_string(),
            user_prompt: user.to_string(),
            expected_shape: Some(shape),
            generation_config: GenerationConfig {
                temperature: Some(0.0),
                ..GenerationConfig::default()
            },
        }
    }

    pub fn freeform(system: &str, user: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            system_prompt: system.to_string(),
            user_prompt: user.to_string(),
            expected_shape: None,
            generation_config: GenerationConfig::default(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: Some(0.7),
            stop_sequences: None,
        }
    }
}
