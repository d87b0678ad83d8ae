//! Attempt log.
//!
//! Append-only SQLite record of every validation attempt in a run. Losing
//! a record is never fatal to the loop; callers log the error and move on.

use crate::validator::{ValidationOutcome, ValidationStatus};
use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::path::Path;

/// Pass/fail counts for the end-of-run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptSummary {
    pub passed: i64,
    pub failed: i64,
}

#[derive(Clone)]
pub struct AttemptLog {
    pool: Pool<Sqlite>,
}

impl AttemptLog {
    /// Open (or create) the attempt database.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {:?}", parent)
                })?;
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .with_context(|| format!("Failed to connect to database: {}", database_url))?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL,
                reason TEXT,
                exit_code INTEGER,
                test_name TEXT NOT NULL,
                test_code TEXT NOT NULL,
                new_imports TEXT NOT NULL,
                stdout TEXT NOT NULL,
                stderr TEXT NOT NULL,
                diagnostic TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create attempts table")?;

        Ok(())
    }

    /// Append one validation outcome.
    pub async fn record_attempt(&self, outcome: &ValidationOutcome) -> Result<()> {
        let status = match outcome.status {
            ValidationStatus::Pass => "PASS",
            ValidationStatus::Fail => "FAIL",
        };
        sqlx::query(
            r#"
            INSERT INTO attempts
                (status, reason, exit_code, test_name, test_code, new_imports, stdout, stderr, diagnostic)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(status)
        .bind(outcome.reason.map(|r| r.to_string()))
        .bind(outcome.exit_code)
        .bind(&outcome.candidate.test_name)
        .bind(&outcome.candidate.test_code)
        .bind(&outcome.candidate.new_imports)
        .bind(&outcome.stdout)
        .bind(&outcome.stderr)
        .bind(&outcome.diagnostic)
        .execute(&self.pool)
        .await
        .context("Failed to record attempt")?;

        Ok(())
    }

    /// Pass/fail totals across the whole log.
    pub async fn summary(&self) -> Result<AttemptSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'PASS' THEN 1 ELSE 0 END), 0) AS passed,
                COALESCE(SUM(CASE WHEN status = 'FAIL' THEN 1 ELSE 0 END), 0) AS failed
            FROM attempts
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to summarize attempts")?;

        Ok(AttemptSummary {
            passed: row.get("passed"),
            failed: row.get("failed"),
        })
    }
}
