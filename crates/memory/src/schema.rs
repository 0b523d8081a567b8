// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Table DDL and connect-time schema verification

use crate::machine::MemoryError;
use sqlx::PgPool;

pub(crate) const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS machine_state (
        subject TEXT PRIMARY KEY,
        data JSONB NOT NULL,
        version INTEGER NOT NULL DEFAULT 1,
        execution_status TEXT NOT NULL,
        parent_subject TEXT,
        initiator TEXT,
        source TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS machine_lock (
        subject TEXT PRIMARY KEY,
        locked_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS machine_hierarchy (
        subject TEXT PRIMARY KEY,
        parent_subject TEXT,
        root_subject TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS machine_hierarchy_root_idx
        ON machine_hierarchy (root_subject)
    "#,
];

pub(crate) const DROP_TABLES: &[&str] = &[
    "DROP TABLE IF EXISTS machine_state",
    "DROP TABLE IF EXISTS machine_lock",
    "DROP TABLE IF EXISTS machine_hierarchy",
];

struct ExpectedColumn {
    table: &'static str,
    column: &'static str,
    data_type: &'static str,
    nullable: bool,
}

const EXPECTED: &[ExpectedColumn] = &[
    ExpectedColumn { table: "machine_state", column: "subject", data_type: "text", nullable: false },
    ExpectedColumn { table: "machine_state", column: "data", data_type: "jsonb", nullable: false },
    ExpectedColumn { table: "machine_state", column: "version", data_type: "integer", nullable: false },
    ExpectedColumn { table: "machine_state", column: "execution_status", data_type: "text", nullable: false },
    ExpectedColumn { table: "machine_state", column: "parent_subject", data_type: "text", nullable: true },
    ExpectedColumn { table: "machine_state", column: "initiator", data_type: "text", nullable: true },
    ExpectedColumn { table: "machine_state", column: "source", data_type: "text", nullable: false },
    ExpectedColumn { table: "machine_state", column: "created_at", data_type: "timestamp with time zone", nullable: false },
    ExpectedColumn { table: "machine_state", column: "updated_at", data_type: "timestamp with time zone", nullable: false },
    ExpectedColumn { table: "machine_lock", column: "subject", data_type: "text", nullable: false },
    ExpectedColumn { table: "machine_lock", column: "locked_at", data_type: "timestamp with time zone", nullable: false },
    ExpectedColumn { table: "machine_lock", column: "expires_at", data_type: "timestamp with time zone", nullable: false },
    ExpectedColumn { table: "machine_hierarchy", column: "subject", data_type: "text", nullable: false },
    ExpectedColumn { table: "machine_hierarchy", column: "parent_subject", data_type: "text", nullable: true },
    ExpectedColumn { table: "machine_hierarchy", column: "root_subject", data_type: "text", nullable: false },
];

#[derive(sqlx::FromRow)]
struct ColumnRow {
    table_name: String,
    column_name: String,
    data_type: String,
    is_nullable: String,
}

pub(crate) async fn create_tables(pool: &PgPool) -> Result<(), MemoryError> {
    for ddl in CREATE_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

pub(crate) async fn drop_tables(pool: &PgPool) -> Result<(), MemoryError> {
    for ddl in DROP_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

/// Compare the live tables against the expected column set and fail with a
/// message naming every deviation.
pub(crate) async fn verify(pool: &PgPool) -> Result<(), MemoryError> {
    let rows: Vec<ColumnRow> = sqlx::query_as(
        r#"
        SELECT table_name::text, column_name::text, data_type::text, is_nullable::text
        FROM information_schema.columns
        WHERE table_schema = current_schema()
          AND table_name IN ('machine_state', 'machine_lock', 'machine_hierarchy')
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut problems = Vec::new();
    for expected in EXPECTED {
        let found = rows
            .iter()
            .find(|r| r.table_name == expected.table && r.column_name == expected.column);
        match found {
            None => {
                if rows.iter().any(|r| r.table_name == expected.table) {
                    problems.push(format!(
                        "{}.{} is missing",
                        expected.table, expected.column
                    ));
                } else {
                    problems.push(format!(
                        "table {} does not exist (run with migrate=if_tables_dont_exist to create it)",
                        expected.table
                    ));
                }
            }
            Some(row) => {
                if row.data_type != expected.data_type {
                    problems.push(format!(
                        "{}.{} has type {} (expected {})",
                        expected.table, expected.column, row.data_type, expected.data_type
                    ));
                }
                let nullable = row.is_nullable == "YES";
                if nullable != expected.nullable {
                    problems.push(format!(
                        "{}.{} nullability is {} (expected {})",
                        expected.table, expected.column, row.is_nullable,
                        if expected.nullable { "YES" } else { "NO" }
                    ));
                }
            }
        }
    }
    problems.dedup();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(MemoryError::SchemaMismatch(problems.join("; ")))
    }
}
