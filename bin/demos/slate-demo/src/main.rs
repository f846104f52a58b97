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

use anyhow::Result;
use slate::{Controller, HttpModelAdapter, RunOutcome, Session};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;

const SEED_SQL: &str = "
CREATE TABLE passengers (
    name TEXT,
    age REAL,
    fare REAL,
    pclass INTEGER,
    survived BOOLEAN
);
INSERT INTO passengers VALUES ('Allen, Miss Elisabeth', 29.0, 211.34, 1, 1);
INSERT INTO passengers VALUES ('Braund, Mr Owen', 22.0, 7.25, 3, 0);
INSERT INTO passengers VALUES ('Cumings, Mrs John', 38.0, 71.28, 1, 1);
INSERT INTO passengers VALUES ('Heikkinen, Miss Laina', 26.0, 7.92, 3, 1);
INSERT INTO passengers VALUES ('Futrelle, Mrs Jacques', 35.0, 53.1, 1, 1);
INSERT INTO passengers VALUES ('Allen, Mr William', 35.0, 8.05, 3, 0);
INSERT INTO passengers VALUES ('Moran, Mr James', 27.0, 8.46, 3, 0);
INSERT INTO passengers VALUES ('McCarthy, Mr Timothy', 54.0, 51.86, 1, 0);
";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    dotenvy::dotenv().ok();
    info!("Environment variables loaded");

    let adapter = Arc::new(HttpModelAdapter::from_env()?);
    let session = Arc::new(Session::open(adapter)?);
    session.seed(SEED_SQL).await?;
    info!("Session opened and passenger dataset seeded");

    let controller = Controller::new(session.clone());

    println!("\nSlate Interactive Demo");
    println!("═══════════════════════════════════════════════════════════════");
    println!("Ask natural-language questions about the seeded passenger data.");
    println!();
    println!("QUERY MODE: questions answered from the data");
    println!("   Examples: \"What is the average age of passengers who survived?\"");
    println!("             \"How many passengers travelled in each class?\"");
    println!();
    println!("CHART MODE: questions that ask for a visualisation");
    println!("   Examples: \"plot age vs fare\", \"bar chart of class sizes\"");
    println!();
    println!("Schema:");
    println!("{}", session.schema_text().await);
    println!("Type 'exit' to quit.");
    println!();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        match controller.run_traced(question).await {
            Ok((outcome, state)) => print_outcome(&outcome, state.attempts),
            Err(error) => println!("\n{error}\n"),
        }
    }

    println!("Goodbye.");
    Ok(())
}

fn print_outcome(outcome: &RunOutcome, attempts: u32) {
    match outcome {
        RunOutcome::Tabular { narrative, rows } => {
            println!("\n{narrative}");
            if !rows.is_empty() {
                println!("\n{}", rows.columns.join(" | "));
                for row in &rows.rows {
                    let line = row
                        .iter()
                        .map(|value| value.to_string())
                        .collect::<Vec<_>>()
                        .join(" | ");
                    println!("{line}");
                }
            }
            if attempts > 0 {
                println!("(answered after {attempts} regeneration cycle(s))");
            }
            println!();
        }
        RunOutcome::Chart {
            chart_kind,
            columns,
            rendered,
        } => {
            println!(
                "\n{} chart over columns {:?} ({} points)",
                chart_kind.as_str(),
                columns,
                rendered.points.len()
            );
            match serde_json::to_string_pretty(rendered) {
                Ok(spec) => println!("{spec}\n"),
                Err(_) => println!("(chart spec could not be serialised)\n"),
            }
        }
        RunOutcome::Irrelevant { narrative } | RunOutcome::Exhausted { narrative } => {
            println!("\n{narrative}\n");
        }
    }
}
