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

use serde_json::Value;
use tracing::{debug, warn};

/// Recovers a JSON value from model text: whole-text parse first, then fenced
/// code blocks, then a balanced-delimiter scan. Returns `None` when nothing
/// parses; callers treat that as a step failure rather than substituting a
/// fallback object, so no half-populated state can leak downstream.
pub fn extract_json_from_text(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        debug!("Parsed entire model output as JSON");
        return Some(value);
    }

    for (language, block) in extract_code_blocks(text) {
        if language.as_deref() == Some("json") || language.is_none() {
            if let Ok(value) = serde_json::from_str::<Value>(&block) {
                debug!("Extracted JSON from markdown code fence");
                return Some(value);
            }
        }
    }

    if let Some(candidate) = find_json_delimiters(text, '{', '}') {
        match serde_json::from_str(&candidate) {
            Ok(value) => return Some(value),
            Err(_) => warn!("JSON-like object substring failed to parse"),
        }
    }

    if let Some(candidate) = find_json_delimiters(text, '[', ']') {
        match serde_json::from_str(&candidate) {
            Ok(value) => return Some(value),
            Err(_) => warn!("JSON-like array substring failed to parse"),
        }
    }

    warn!("No valid JSON structure found in model output");
    None
}

fn find_json_delimiters(text: &str, start_char: char, end_char: char) -> Option<String> {
    let mut balance = 0;
    let mut start_index = None;

    for (i, ch) in text.char_indices() {
        if ch == start_char {
            if balance == 0 {
                start_index = Some(i);
            }
            balance += 1;
        } else if ch == end_char {
            balance -= 1;
            if balance == 0 {
                if let Some(start) = start_index {
                    return Some(text[start..=i].to_string());
                }
            }
        }
    }
    None
}

fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut code_blocks = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        if line.trim().starts_with("```") {
            let language = {
                let lang_str = line.trim().strip_prefix("```").unwrap_or("").trim();
                if lang_str.is_empty() {
                    None
                } else {
                    Some(lang_str.to_string())
                }
            };

            let mut content = String::new();
            for code_line in lines.by_ref() {
                if code_line.trim().starts_with("```") {
                    break;
                }
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(code_line);
            }
            code_blocks.push((language, content));
        }
    }
    code_blocks
}
