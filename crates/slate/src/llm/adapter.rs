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

use crate::llm::extract::extract_json_from_text;
use async_trait::async_trait;
use dotenvy::dotenv;
use model_contracts::{ModelError, ModelRequest, ModelResponse, ModelResult, OutputShape};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| Client::builder().build().expect("HTTP client"));

/// The workflow's only view of the model service. Steps go through
/// `generate_structured`, which enforces the expected output shape at the
/// boundary: malformed or empty output is an error here, never a value that
/// travels further.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn call(&self, request: ModelRequest) -> ModelResult<ModelResponse>;

    async fn generate_structured(
        &self,
        system_prompt: &str,
        user_input: &str,
        shape: OutputShape,
    ) -> ModelResult<Value> {
        let request = ModelRequest::structured(system_prompt, user_input, shape);
        let response = self.call(request).await?;
        extract_json_from_text(&response.content).ok_or_else(|| ModelError::MalformedOutput {
            shape,
            reason: "no JSON structure in model output".to_string(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct HttpModelAdapter {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub api_version: String,
}

impl HttpModelAdapter {
    pub fn anthropic() -> ModelResult<Self> {
        dotenv().ok();
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ModelError::Authentication("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;

        Ok(Self {
            endpoint: std::env::var("ANTHROPIC_ENDPOINT")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string()),
            api_key,
            model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string()),
            max_tokens: env_parse("ANTHROPIC_MAX_TOKENS", 4096),
            temperature: env_parse("ANTHROPIC_TEMPERATURE", 0.0),
            api_version: std::env::var("ANTHROPIC_API_VERSION")
                .unwrap_or_else(|_| "2023-06-01".to_string()),
        })
    }

    pub fn ollama(model: String) -> Self {
        dotenv().ok();
        Self {
            endpoint: std::env::var("OLLAMA_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:11434/api/generate".to_string()),
            api_key: String::new(),
            model,
            max_tokens: env_parse("OLLAMA_MAX_TOKENS", 4096),
            temperature: env_parse("OLLAMA_TEMPERATURE", 0.0),
            api_version: String::new(),
        }
    }

    /// Picks a provider from `SLATE_MODEL_PROVIDER` (default "anthropic").
    pub fn from_env() -> ModelResult<Self> {
        dotenv().ok();
        match std::env::var("SLATE_MODEL_PROVIDER").as_deref() {
            Ok("ollama") => {
                let model = std::env::var("OLLAMA_MODEL")
                    .unwrap_or_else(|_| "llama3.1:8b".to_string());
                Ok(Self::ollama(model))
            }
            Ok("anthropic") | Err(_) => Self::anthropic(),
            Ok(other) => Err(ModelError::Configuration(format!(
                "Unknown model provider '{other}'"
            ))),
        }
    }

    fn get_provider(&self) -> &str {
        if self.endpoint.contains("anthropic.com") {
            "anthropic"
        } else if self.endpoint.contains("11434") || self.endpoint.contains("ollama") {
            "ollama"
        } else if self.endpoint.contains("openai.com") {
            "openai"
        } else {
            "anthropic"
        }
    }
}

#[async_trait]
impl ModelAdapter for HttpModelAdapter {
    async fn call(&self, request: ModelRequest) -> ModelResult<ModelResponse> {
        let client = &*HTTP_CLIENT;
        let provider = self.get_provider();
        let temperature = request
            .generation_config
            .temperature
            .unwrap_or(self.temperature);
        let max_tokens = request
            .generation_config
            .max_tokens
            .unwrap_or(self.max_tokens);
        let input = format!(
            "System: {}\n\nUser: {}",
            request.system_prompt, request.user_prompt
        );

        let response = match provider {
            "ollama" => {
                let payload = json!({
                    "model": self.model,
                    "prompt": input,
                    "stream": false,
                    "options": {
                        "temperature": temperature,
                        "num_predict": max_tokens
                    }
                });
                debug!(payload = ?payload, "Sending request to Ollama API");
                client
                    .post(&self.endpoint)
                    .header("content-type", "application/json")
                    .json(&payload)
                    .send()
                    .await
            }
            _ => {
                let payload = json!({
                    "model": self.model,
                    "max_tokens": max_tokens,
                    "system": request.system_prompt,
                    "messages": [{
                        "role": "user",
                        "content": request.user_prompt
                    }],
                    "temperature": temperature
                });
                debug!(payload = ?payload, "Sending request to Anthropic API");
                client
                    .post(&self.endpoint)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", &self.api_version)
                    .header("content-type", "application/json")
                    .json(&payload)
                    .send()
                    .await
            }
        }
        .map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        info!(%status, provider = %provider, "Received response from model API");

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ModelError::Provider(format!(
                "{provider} API error {status}: {error_body}"
            )));
        }

        let response_data: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Serialisation(e.to_string()))?;
        debug!(response_data = ?response_data, "Raw API response");

        let content = match provider {
            "ollama" => response_data["response"].as_str(),
            _ => response_data["content"][0]["text"].as_str(),
        }
        .ok_or_else(|| {
            ModelError::Provider(format!("No content in {provider} response"))
        })?;

        Ok(ModelResponse::new(
            request.id,
            content.to_string(),
            &self.model,
            provider,
        ))
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
