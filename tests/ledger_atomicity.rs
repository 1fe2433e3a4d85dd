#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use flockbook_lib::{
    error::{GENERIC_FAIL, LEDGER_INSUFFICIENT_BIRDS},
    ledger,
    model::{RecordIdPayload, TreatmentStatusPayload},
};
use sqlx::SqlitePool;

#[path = "util.rs"]
mod util;

use util::{farmhand, mortality, seed_flock, snapshot, temp_pool, treatment};

/// Makes the next statement of the given kind against `mortality_records` fail
/// after the flock or treatment row has already been written in the same
/// transaction.
async fn fail_mortality(pool: &SqlitePool, kind: &str) -> Result<()> {
    sqlx::query(&format!(
        "CREATE TRIGGER fail_mortality_{kind} BEFORE {kind} ON mortality_records \
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END"
    ))
    .execute(pool)
    .await?;
    Ok(())
}

#[tokio::test]
async fn failed_insert_leaves_flock_untouched() -> Result<()> {
    let pool = temp_pool().await;
    let flock = seed_flock(&pool, 100).await;
    fail_mortality(&pool, "INSERT").await?;

    let before = snapshot(&pool).await;
    let err = ledger::create_mortality(&pool, &farmhand(), mortality(&flock.id, 10))
        .await
        .expect_err("trigger aborts the insert");
    assert_eq!(err.code(), GENERIC_FAIL);
    assert!(err.cause().is_some());
    assert_eq!(snapshot(&pool).await, before);
    Ok(())
}

#[tokio::test]
async fn failed_spawned_record_rolls_back_status_update() -> Result<()> {
    let pool = temp_pool().await;
    let flock = seed_flock(&pool, 100).await;
    let created = ledger::create_treatment(&pool, &farmhand(), treatment(&flock.id, 20)).await?;
    fail_mortality(&pool, "INSERT").await?;

    let before = snapshot(&pool).await;
    ledger::update_treatment_status(
        &pool,
        &farmhand(),
        TreatmentStatusPayload {
            treatment_id: created.id.clone(),
            deceased_count: 5,
            recovered_count: 10,
            still_sick_count: 5,
            notes: Some("should not stick".into()),
        },
    )
    .await
    .expect_err("trigger aborts the spawned record");
    assert_eq!(snapshot(&pool).await, before);
    Ok(())
}

#[tokio::test]
async fn failed_delete_keeps_linked_treatment_count() -> Result<()> {
    let pool = temp_pool().await;
    let flock = seed_flock(&pool, 100).await;
    let created = ledger::create_treatment(&pool, &farmhand(), treatment(&flock.id, 20)).await?;
    let change = ledger::update_treatment_status(
        &pool,
        &farmhand(),
        TreatmentStatusPayload {
            treatment_id: created.id.clone(),
            deceased_count: 4,
            recovered_count: 0,
            still_sick_count: 16,
            notes: None,
        },
    )
    .await?;
    let spawned = change.mortality.expect("spawned record");
    fail_mortality(&pool, "DELETE").await?;

    let before = snapshot(&pool).await;
    ledger::delete_mortality(&pool, &farmhand(), RecordIdPayload { id: spawned.id })
        .await
        .expect_err("trigger aborts the delete");
    assert_eq!(snapshot(&pool).await, before);

    ledger::delete_treatment(&pool, &farmhand(), RecordIdPayload { id: created.id })
        .await
        .expect_err("trigger aborts the cascade");
    assert_eq!(snapshot(&pool).await, before);
    Ok(())
}

#[tokio::test]
async fn invariant_failure_writes_nothing() -> Result<()> {
    let pool = temp_pool().await;
    let flock = seed_flock(&pool, 5).await;
    let before = snapshot(&pool).await;

    let err = ledger::create_mortality(&pool, &farmhand(), mortality(&flock.id, 6))
        .await
        .expect_err("not enough birds");
    assert_eq!(err.code(), LEDGER_INSUFFICIENT_BIRDS);
    assert_eq!(snapshot(&pool).await, before);
    Ok(())
}
