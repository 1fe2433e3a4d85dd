use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use tracing::{error, info};

use crate::time::now_ms;

static ADD_COLUMN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)")
        .expect("add column pattern to compile")
});

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        let head: String = trimmed.chars().take(160).collect();
        format!("{head}…")
    } else {
        trimmed.to_string()
    }
}

pub(crate) static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202610010900_initial.sql",
        include_str!("../migrations/202610010900_initial.sql"),
    ),
    (
        "202610080900_treatment_status.sql",
        include_str!("../migrations/202610080900_treatment_status.sql"),
    ),
];

fn strip_comments(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum(cleaned: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned.as_bytes()))
}

/// Apply every embedded migration not yet recorded in `schema_migrations`.
///
/// A migration whose text changed after it was applied is refused.
pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version   TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum TEXT NOT NULL\
         )",
    )
    .await?;

    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied: HashMap<String, String> = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }

    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = strip_comments(raw_sql);
        let checksum = checksum(&cleaned);

        if let Some(stored) = applied.get(*filename) {
            if stored != &checksum {
                anyhow::bail!("migration {} edited after application", filename);
            }
            info!(target: "flockbook", event = "migration_skip_file", file = %filename);
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            let upper = s.to_ascii_uppercase();
            if upper == "BEGIN" || upper == "COMMIT" {
                continue;
            }
            if let Some((table, col)) = ADD_COLUMN_PATTERN
                .captures(s)
                .and_then(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
            {
                let exists: Option<i64> =
                    sqlx::query_scalar("SELECT 1 FROM pragma_table_info(?) WHERE name = ?")
                        .bind(table)
                        .bind(col)
                        .fetch_optional(&mut *tx)
                        .await?;
                if exists.is_some() {
                    info!(target: "flockbook", event = "migration_stmt_skip", file = %filename, sql = %preview(s));
                    continue;
                }
            }
            info!(target: "flockbook", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
                error!(target: "flockbook", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(e.into());
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)",
        )
        .bind(*filename)
        .bind(now_ms())
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(target: "flockbook", event = "migration_file_applied", file = %filename);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect sqlite::memory:")
    }

    #[test]
    fn checksum_ignores_comments_and_blank_lines() {
        let a = strip_comments("-- header\nCREATE TABLE t (id TEXT);\n\n");
        let b = strip_comments("CREATE TABLE t (id TEXT);");
        assert_eq!(checksum(&a), checksum(&b));
    }

    #[tokio::test]
    async fn applies_all_migrations_once() -> anyhow::Result<()> {
        let pool = memory_pool().await;
        apply_migrations(&pool).await?;
        apply_migrations(&pool).await?;

        let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await?;
        assert_eq!(versions, MIGRATIONS.len() as i64);

        let has_response: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM pragma_table_info('treatments') WHERE name = 'response'",
        )
        .fetch_optional(&pool)
        .await?;
        assert!(has_response.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn refuses_edited_migration() -> anyhow::Result<()> {
        let pool = memory_pool().await;
        apply_migrations(&pool).await?;
        sqlx::query("UPDATE schema_migrations SET checksum = 'tampered' WHERE version = ?")
            .bind(MIGRATIONS[0].0)
            .execute(&pool)
            .await?;

        let err = apply_migrations(&pool).await.expect_err("edited migration refused");
        assert!(err.to_string().contains("edited after application"));
        Ok(())
    }

    #[tokio::test]
    async fn add_column_is_skipped_when_present() -> anyhow::Result<()> {
        let pool = memory_pool().await;
        apply_migrations(&pool).await?;
        // Forget the second file so it is replayed against a schema that already has its columns.
        sqlx::query("DELETE FROM schema_migrations WHERE version = ?")
            .bind(MIGRATIONS[1].0)
            .execute(&pool)
            .await?;
        apply_migrations(&pool).await?;
        let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await?;
        assert_eq!(versions, MIGRATIONS.len() as i64);
        Ok(())
    }
}
