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

use slate::{EngineError, FieldType, SqlEngine, SqlValue};

fn seeded() -> SqlEngine {
    let mut engine = SqlEngine::in_memory().unwrap();
    engine
        .execute_batch(
            "CREATE TABLE passengers (name TEXT, age REAL, fare REAL, survived BOOLEAN);
             INSERT INTO passengers VALUES ('Allen', 29.0, 211.34, 1);
             INSERT INTO passengers VALUES ('Braund', 22.0, 7.25, 0);
             INSERT INTO passengers VALUES ('Cumings', 38.0, 71.28, 1);",
        )
        .unwrap();
    engine
}

#[test]
fn materialised_result_round_trips_by_name() {
    let mut engine = seeded();
    let rows = engine
        .execute("SELECT age, fare FROM passengers WHERE survived = 1 ORDER BY age")
        .unwrap();
    assert_eq!(rows.len(), 2);

    engine.materialise("scratch_roundtrip", &rows).unwrap();
    let reread = engine.execute("SELECT * FROM scratch_roundtrip").unwrap();

    assert_eq!(reread.columns, rows.columns);
    assert_eq!(reread.len(), rows.len());
    assert_eq!(reread.rows[0][0], SqlValue::Real(29.0));
}

#[test]
fn materialised_table_appears_in_introspection() {
    let mut engine = seeded();
    let rows = engine.execute("SELECT age, name FROM passengers").unwrap();
    engine.materialise("scratch_intro", &rows).unwrap();

    let schema = engine.introspect().unwrap();
    let table = schema.table("scratch_intro").unwrap();
    assert_eq!(table.fields["age"], FieldType::Real);
    assert_eq!(table.fields["name"], FieldType::Text);
}

#[test]
fn scratch_name_collision_is_a_defect_not_a_retry() {
    let mut engine = seeded();
    let rows = engine.execute("SELECT age FROM passengers").unwrap();
    engine.materialise("scratch_dup", &rows).unwrap();

    // a second run with the same name must fail loudly
    let error = engine.materialise("scratch_dup", &rows).unwrap_err();
    assert!(matches!(error, EngineError::QueryRejected(_)));
}

#[test]
fn syntax_and_semantic_failures_are_retryable() {
    let mut engine = seeded();
    for sql in [
        "SELEC age FROM passengers",
        "SELECT age FROM crew",
        "SELECT nonexistent FROM passengers",
    ] {
        let error = engine.execute(sql).unwrap_err();
        assert!(
            matches!(error, EngineError::QueryRejected(_)),
            "expected {sql:?} to be rejected, got {error:?}"
        );
    }
}

#[test]
fn null_heavy_columns_still_materialise() {
    let mut engine = SqlEngine::in_memory().unwrap();
    engine
        .execute_batch(
            "CREATE TABLE sparse (a INTEGER, b TEXT);
             INSERT INTO sparse VALUES (NULL, NULL);
             INSERT INTO sparse VALUES (1, 'x');",
        )
        .unwrap();
    let rows = engine.execute("SELECT a, b FROM sparse").unwrap();
    engine.materialise("scratch_sparse", &rows).unwrap();

    let reread = engine.execute("SELECT * FROM scratch_sparse").unwrap();
    assert_eq!(reread.len(), 2);
    assert_eq!(reread.rows[0][0], SqlValue::Null);
    assert_eq!(reread.rows[1][1], SqlValue::Text("x".to_string()));
}
