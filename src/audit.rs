//! Read-only consistency sweep over the whole ledger.
//!
//! Hard checks cover bounds the ledger must never break. Advisory checks cover
//! drift the ledger tolerates on purpose (sub-count mismatches, deceased counts
//! driven below zero by mortality deletes, hand-edited rows).

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    Hard,
    Advisory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCheck {
    pub name: String,
    pub severity: CheckSeverity,
    pub passed: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditFinding {
    pub check: String,
    pub table: String,
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub status: AuditStatus,
    pub checks: Vec<AuditCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<AuditFinding>,
    pub app_version: String,
    pub git_commit: String,
    pub generated_at: String,
}

impl AuditReport {
    pub fn findings_for<'a>(&'a self, check: &'a str) -> impl Iterator<Item = &'a AuditFinding> {
        self.findings.iter().filter(move |f| f.check == check)
    }
}

struct CheckSpec {
    name: &'static str,
    severity: CheckSeverity,
    table: &'static str,
    /// Returns one `(id, message)` row per offender.
    sql: &'static str,
}

const CHECKS: &[CheckSpec] = &[
    CheckSpec {
        name: "flock_bounds",
        severity: CheckSeverity::Hard,
        table: "flocks",
        sql: "SELECT id, 'current count ' || current_count || ' is outside 0..=' || initial_count \
              FROM flocks WHERE current_count < 0 OR current_count > initial_count",
    },
    CheckSpec {
        name: "flock_conservation",
        severity: CheckSeverity::Advisory,
        table: "flocks",
        sql: "SELECT f.id, 'initial ' || f.initial_count || ' minus current ' || f.current_count \
                 || ' does not match ' || COALESCE(SUM(m.count), 0) || ' recorded deaths' \
              FROM flocks f LEFT JOIN mortality_records m ON m.flock_id = f.id \
              GROUP BY f.id \
              HAVING f.initial_count - f.current_count != COALESCE(SUM(m.count), 0)",
    },
    // SQLite widens an overflowing `+` to REAL, so huge sub-counts still compare.
    CheckSpec {
        name: "treatment_subcounts",
        severity: CheckSeverity::Advisory,
        table: "treatments",
        sql: "SELECT id, 'sub-counts add up to ' \
                 || (still_sick_count + recovered_count + deceased_count) \
                 || ' for ' || diseased_birds_count || ' diseased birds' \
              FROM treatments \
              WHERE still_sick_count + recovered_count + deceased_count != diseased_birds_count",
    },
    CheckSpec {
        name: "treatment_deceased_floor",
        severity: CheckSeverity::Advisory,
        table: "treatments",
        sql: "SELECT id, 'deceased count is ' || deceased_count \
              FROM treatments WHERE deceased_count < 0",
    },
    CheckSpec {
        name: "mortality_links",
        severity: CheckSeverity::Hard,
        table: "mortality_records",
        sql: "SELECT m.id, CASE WHEN t.id IS NULL \
                 THEN 'treatment ' || m.treatment_id || ' does not exist' \
                 ELSE 'treatment ' || t.id || ' belongs to flock ' || t.flock_id END \
              FROM mortality_records m LEFT JOIN treatments t ON t.id = m.treatment_id \
              WHERE m.treatment_id IS NOT NULL AND (t.id IS NULL OR t.flock_id != m.flock_id)",
    },
];

pub async fn run_audit(pool: &SqlitePool) -> Result<AuditReport> {
    let mut conn = pool
        .acquire()
        .await
        .context("acquire connection for ledger audit")?;

    let mut checks = Vec::with_capacity(CHECKS.len());
    let mut findings = Vec::new();
    for spec in CHECKS {
        let (check, mut offenders) = run_check(&mut conn, spec).await;
        checks.push(check);
        findings.append(&mut offenders);
    }

    let status = overall_status(&checks);
    let report = AuditReport {
        status,
        checks,
        findings,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        git_commit: env!("FLOCKBOOK_GIT_HASH").to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    if report.status == AuditStatus::Ok {
        info!(target: "flockbook", event = "ledger_audit", status = "ok");
    } else {
        warn!(
            target: "flockbook",
            event = "ledger_audit",
            status = ?report.status,
            findings = report.findings.len()
        );
    }
    Ok(report)
}

fn overall_status(checks: &[AuditCheck]) -> AuditStatus {
    let failed = |severity| checks.iter().any(|c| !c.passed && c.severity == severity);
    if failed(CheckSeverity::Hard) {
        AuditStatus::Error
    } else if failed(CheckSeverity::Advisory) {
        AuditStatus::Warning
    } else {
        AuditStatus::Ok
    }
}

async fn run_check(conn: &mut SqliteConnection, spec: &CheckSpec) -> (AuditCheck, Vec<AuditFinding>) {
    let start = Instant::now();
    let mut check = AuditCheck {
        name: spec.name.to_string(),
        severity: spec.severity,
        passed: true,
        duration_ms: 0,
        details: None,
    };

    let mut findings = Vec::new();
    match sqlx::query(spec.sql).fetch_all(&mut *conn).await {
        Ok(rows) => {
            for row in rows {
                let id: String = row.try_get(0).unwrap_or_default();
                let message: String = row.try_get(1).unwrap_or_default();
                findings.push(AuditFinding {
                    check: spec.name.to_string(),
                    table: spec.table.to_string(),
                    id,
                    message,
                });
            }
            if !findings.is_empty() {
                check.passed = false;
                check.details = Some(format!("{} offending row(s)", findings.len()));
            }
        }
        Err(err) => {
            check.passed = false;
            check.details = Some(format!("{} failed: {err}", spec.name));
        }
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    (check, findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn migrated_pool() -> anyhow::Result<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        apply_migrations(&pool).await?;
        Ok(pool)
    }

    async fn insert_flock(pool: &SqlitePool, id: &str, initial: i64, current: i64) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO flocks (id, name, initial_count, current_count, placed_on, created_at, updated_at) \
             VALUES (?1, ?1, ?2, ?3, '2026-09-01', 0, 0)",
        )
        .bind(id)
        .bind(initial)
        .bind(current)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn insert_treatment(
        pool: &SqlitePool,
        id: &str,
        flock_id: &str,
        counts: (i64, i64, i64, i64),
    ) -> anyhow::Result<()> {
        let (diseased, sick, recovered, deceased) = counts;
        sqlx::query(
            "INSERT INTO treatments (id, flock_id, disease, medication, dosage, frequency, duration, \
               start_date, diseased_birds_count, still_sick_count, recovered_count, deceased_count, \
               recorded_by_id, created_at, updated_at) \
             VALUES (?1, ?2, 'Coryza', 'Sulfa', '1ml', 'daily', '5 days', '2026-10-01', ?3, ?4, ?5, ?6, 'vet', 0, 0)",
        )
        .bind(id)
        .bind(flock_id)
        .bind(diseased)
        .bind(sick)
        .bind(recovered)
        .bind(deceased)
        .execute(pool)
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn empty_ledger_is_ok() -> anyhow::Result<()> {
        let pool = migrated_pool().await?;
        let report = run_audit(&pool).await?;
        assert_eq!(report.status, AuditStatus::Ok);
        assert_eq!(report.checks.len(), CHECKS.len());
        assert!(report.checks.iter().all(|c| c.passed));
        Ok(())
    }

    #[tokio::test]
    async fn advisory_drift_is_a_warning() -> anyhow::Result<()> {
        let pool = migrated_pool().await?;
        insert_flock(&pool, "f1", 10, 8).await?;
        insert_treatment(&pool, "t1", "f1", (5, 2, 2, -1)).await?;

        let report = run_audit(&pool).await?;
        assert_eq!(report.status, AuditStatus::Warning);
        assert_eq!(report.findings_for("flock_conservation").count(), 1);
        assert_eq!(report.findings_for("treatment_subcounts").count(), 1);
        let floor: Vec<_> = report.findings_for("treatment_deceased_floor").collect();
        assert_eq!(floor.len(), 1);
        assert_eq!(floor[0].id, "t1");
        assert_eq!(floor[0].message, "deceased count is -1");
        Ok(())
    }

    #[tokio::test]
    async fn huge_subcounts_are_reported_not_failed() -> anyhow::Result<()> {
        let pool = migrated_pool().await?;
        insert_flock(&pool, "f1", 20, 20).await?;
        insert_treatment(&pool, "t1", "f1", (20, i64::MAX, 1, 0)).await?;

        let report = run_audit(&pool).await?;
        assert_eq!(report.status, AuditStatus::Warning);
        let check = report
            .checks
            .iter()
            .find(|c| c.name == "treatment_subcounts")
            .expect("subcount check");
        assert_eq!(check.details.as_deref(), Some("1 offending row(s)"));
        let findings: Vec<_> = report.findings_for("treatment_subcounts").collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "t1");
        Ok(())
    }

    #[tokio::test]
    async fn cross_flock_link_is_an_error() -> anyhow::Result<()> {
        let pool = migrated_pool().await?;
        insert_flock(&pool, "f1", 10, 7).await?;
        insert_flock(&pool, "f2", 10, 10).await?;
        insert_treatment(&pool, "t2", "f2", (3, 0, 0, 3)).await?;
        sqlx::query(
            "INSERT INTO mortality_records (id, flock_id, date, count, cause, recorded_by_id, treatment_id, created_at, updated_at) \
             VALUES ('m1', 'f1', '2026-10-02', 3, 'disease', 'vet', 't2', 0, 0)",
        )
        .execute(&pool)
        .await?;

        let report = run_audit(&pool).await?;
        assert_eq!(report.status, AuditStatus::Error);
        let links: Vec<_> = report.findings_for("mortality_links").collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].table, "mortality_records");
        assert!(links[0].message.contains("belongs to flock f2"));
        Ok(())
    }
}
