use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqlitePool, Transaction};
use tracing::{error, info, warn};

use crate::{AppError, AppResult};

pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                error!(
                    target: "flockbook",
                    error = %e,
                    event = "db_dir_create_failed",
                    path = %parent.display()
                );
                e
            })?;
        }
    }
    info!(target: "flockbook", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await
        .with_context(|| format!("open ledger database {}", db_path.display()))?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    let busy: (i64,) = sqlx::query_as("PRAGMA busy_timeout;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "flockbook",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0,
        busy_timeout_ms = %busy.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "flockbook",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Open a transaction for a ledger operation.
pub async fn begin(pool: &SqlitePool, operation: &'static str) -> AppResult<Transaction<'static, Sqlite>> {
    let tx = pool
        .begin()
        .await
        .map_err(|err| AppError::unexpected(err, operation))?;
    info!(target: "flockbook", event = "db_tx_begin", operation);
    Ok(tx)
}

/// Commit when `outcome` is `Ok`, roll back otherwise, and hand the outcome back.
pub async fn settle_tx<R, E>(tx: Transaction<'_, Sqlite>, outcome: Result<R, E>) -> Result<R, E>
where
    E: From<sqlx::Error>,
{
    match outcome {
        Ok(val) => {
            tx.commit().await.map_err(E::from)?;
            info!(target: "flockbook", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "flockbook", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "flockbook", event = "db_tx_rollback");
            }
            Err(e)
        }
    }
}

/// Run work inside a transaction. Commits on success, rolls back on error.
pub async fn run_in_tx<R, E, F>(pool: &SqlitePool, operation: &'static str, f: F) -> Result<R, E>
where
    E: From<sqlx::Error>,
    F: for<'t> FnOnce(&'t mut Transaction<'static, Sqlite>) -> BoxFuture<'t, Result<R, E>>,
{
    let mut tx = pool.begin().await.map_err(E::from)?;
    info!(target: "flockbook", event = "db_tx_begin", operation);
    let outcome = f(&mut tx).await;
    settle_tx(tx, outcome).await
}
