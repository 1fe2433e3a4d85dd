#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use flockbook_lib::{db, error::LEDGER_INSUFFICIENT_BIRDS, ledger, migrate, model::TreatmentStatusPayload};
use tempfile::tempdir;

#[path = "util.rs"]
mod util;

use util::{current_count, farmhand, mortality, seed_flock, treatment};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_debits_only_one_fits() -> Result<()> {
    let dir = tempdir()?;
    let pool = db::open_sqlite_pool(&dir.path().join("ledger.sqlite3")).await?;
    migrate::apply_migrations(&pool).await?;
    let flock = seed_flock(&pool, 100).await;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let pool = pool.clone();
            let flock_id = flock.id.clone();
            tokio::spawn(async move {
                ledger::create_mortality(&pool, &farmhand(), mortality(&flock_id, 60)).await
            })
        })
        .collect();

    let mut wins = 0;
    let mut rejections = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => wins += 1,
            Err(err) => {
                assert_eq!(err.code(), LEDGER_INSUFFICIENT_BIRDS);
                assert_eq!(err.message(), "Cannot remove 60 birds, only 40 available.");
                rejections += 1;
            }
        }
    }
    assert_eq!((wins, rejections), (1, 1));
    assert_eq!(current_count(&pool, &flock.id).await, 40);
    pool.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_writers_keep_counts_conserved() -> Result<()> {
    let dir = tempdir()?;
    let pool = db::open_sqlite_pool(&dir.path().join("ledger.sqlite3")).await?;
    migrate::apply_migrations(&pool).await?;
    let flock = seed_flock(&pool, 200).await;
    let treated = ledger::create_treatment(&pool, &farmhand(), treatment(&flock.id, 50)).await?;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let flock_id = flock.id.clone();
        tasks.push(tokio::spawn(async move {
            ledger::create_mortality(&pool, &farmhand(), mortality(&flock_id, 3))
                .await
                .map(|_| ())
        }));
    }
    for deceased in 1..=6 {
        let pool = pool.clone();
        let treatment_id = treated.id.clone();
        tasks.push(tokio::spawn(async move {
            ledger::update_treatment_status(
                &pool,
                &farmhand(),
                TreatmentStatusPayload {
                    treatment_id,
                    deceased_count: deceased,
                    recovered_count: 0,
                    still_sick_count: 50 - deceased,
                    notes: None,
                },
            )
            .await
            .map(|_| ())
        }));
    }
    for task in tasks {
        task.await??;
    }

    let recorded: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(count), 0) FROM mortality_records WHERE flock_id = ?")
            .bind(&flock.id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(200 - current_count(&pool, &flock.id).await, recorded);
    pool.close().await;
    Ok(())
}
