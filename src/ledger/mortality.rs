use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::{
    counts::{credit, debit, rebalance},
    store::{self, MORTALITY_COLUMNS},
};
use crate::{
    auth::Caller,
    db,
    error::NOT_FOUND_MORTALITY,
    id::new_uuid_v7,
    model::{
        MortalityCreatePayload, MortalityRecord, MortalityRemoval, MortalityUpdatePayload,
        RecordIdPayload,
    },
    time::now_ms,
    AppError, AppResult,
};

/// Record birds lost from a flock and debit its head-count.
pub async fn create_mortality(
    pool: &SqlitePool,
    caller: &Caller,
    payload: MortalityCreatePayload,
) -> AppResult<MortalityRecord> {
    let mut tx = db::begin(pool, "mortality_create").await?;
    let outcome = create_in_tx(&mut tx, caller, payload).await;
    db::settle_tx(tx, outcome).await
}

async fn create_in_tx(
    conn: &mut SqliteConnection,
    caller: &Caller,
    payload: MortalityCreatePayload,
) -> AppResult<MortalityRecord> {
    let flock = store::claim_flock(conn, &payload.flock_id).await?;
    let remaining = debit(&flock, payload.count)?;

    let now = now_ms();
    let record = MortalityRecord {
        id: new_uuid_v7(),
        flock_id: flock.id.clone(),
        date: payload.date,
        count: payload.count,
        cause: payload.cause,
        cause_description: payload.cause_description,
        recorded_by_id: caller.id().to_string(),
        treatment_id: None,
        created_at: now,
        updated_at: now,
    };
    store::insert_mortality(conn, &record).await?;
    store::write_flock_count(conn, &flock.id, remaining, now).await?;

    info!(
        target: "flockbook",
        event = "mortality_created",
        mortality_id = %record.id,
        flock_id = %flock.id,
        count = record.count,
        current_count = remaining
    );
    Ok(record)
}

/// Edit a mortality record. A changed `count` moves the difference to or
/// from the flock; the linked treatment, if any, is left as it is.
pub async fn update_mortality(
    pool: &SqlitePool,
    caller: &Caller,
    payload: MortalityUpdatePayload,
) -> AppResult<MortalityRecord> {
    let mut tx = db::begin(pool, "mortality_update").await?;
    let outcome = update_in_tx(&mut tx, caller, payload).await;
    db::settle_tx(tx, outcome).await
}

async fn update_in_tx(
    conn: &mut SqliteConnection,
    caller: &Caller,
    payload: MortalityUpdatePayload,
) -> AppResult<MortalityRecord> {
    let existing = store::claim_mortality(conn, &payload.id).await?;
    let flock = store::claim_flock(conn, &existing.flock_id).await?;

    let new_count = payload.count.unwrap_or(existing.count);
    let delta = new_count - existing.count;
    let now = now_ms();

    let updated = MortalityRecord {
        date: payload.date.unwrap_or(existing.date),
        count: new_count,
        cause: payload.cause.unwrap_or(existing.cause),
        cause_description: payload
            .cause_description
            .unwrap_or_else(|| existing.cause_description.clone()),
        updated_at: now,
        ..existing.clone()
    };

    let next_count = if delta != 0 {
        Some(rebalance(&flock, existing.count, new_count)?)
    } else {
        None
    };

    sqlx::query(
        "UPDATE mortality_records \
         SET date = ?, count = ?, cause = ?, cause_description = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(updated.date.to_string())
    .bind(updated.count)
    .bind(updated.cause.as_str())
    .bind(&updated.cause_description)
    .bind(now)
    .bind(&updated.id)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::unexpected(err, "mortality_update"))?;

    if let Some(current_count) = next_count {
        store::write_flock_count(conn, &flock.id, current_count, now).await?;
    }

    info!(
        target: "flockbook",
        event = "mortality_updated",
        mortality_id = %updated.id,
        flock_id = %flock.id,
        delta,
        updated_by = %caller
    );
    Ok(updated)
}

/// Delete a mortality record, returning its birds to the flock and taking
/// them off the linked treatment's deceased count.
pub async fn delete_mortality(
    pool: &SqlitePool,
    caller: &Caller,
    payload: RecordIdPayload,
) -> AppResult<MortalityRemoval> {
    let mut tx = db::begin(pool, "mortality_delete").await?;
    let outcome = delete_in_tx(&mut tx, caller, payload).await;
    db::settle_tx(tx, outcome).await
}

async fn delete_in_tx(
    conn: &mut SqliteConnection,
    caller: &Caller,
    payload: RecordIdPayload,
) -> AppResult<MortalityRemoval> {
    let record = store::claim_mortality(conn, &payload.id).await?;
    let flock = store::claim_flock(conn, &record.flock_id).await?;
    let restored = credit(&flock, record.count)?;
    let now = now_ms();

    if let Some(treatment_id) = &record.treatment_id {
        // No floor: a treatment can go negative here and the audit reports it.
        sqlx::query(
            "UPDATE treatments SET deceased_count = deceased_count - ?, updated_at = ? WHERE id = ?",
        )
        .bind(record.count)
        .bind(now)
        .bind(treatment_id)
        .execute(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "treatment_deceased_decrement"))?;
    }

    sqlx::query("DELETE FROM mortality_records WHERE id = ?")
        .bind(&record.id)
        .execute(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "mortality_delete"))?;
    store::write_flock_count(conn, &flock.id, restored, now).await?;

    info!(
        target: "flockbook",
        event = "mortality_deleted",
        mortality_id = %record.id,
        flock_id = %flock.id,
        restored_birds = record.count,
        deleted_by = %caller
    );
    Ok(MortalityRemoval {
        mortality_id: record.id,
        flock_id: flock.id,
        restored_birds: record.count,
        treatment_id: record.treatment_id,
    })
}

pub async fn get_mortality(pool: &SqlitePool, id: &str) -> AppResult<MortalityRecord> {
    let sql = format!("SELECT {MORTALITY_COLUMNS} FROM mortality_records WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|err| AppError::unexpected(err, "mortality_get"))?;
    match row {
        Some(row) => store::mortality_from_row(&row),
        None => Err(AppError::not_found(
            NOT_FOUND_MORTALITY,
            "Mortality record",
            id,
        )),
    }
}

/// Mortality records of one flock, newest first.
pub async fn list_mortality(pool: &SqlitePool, flock_id: &str) -> AppResult<Vec<MortalityRecord>> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|err| AppError::unexpected(err, "mortality_list"))?;
    store::fetch_flock(&mut conn, flock_id).await?;

    let sql = format!(
        "SELECT {MORTALITY_COLUMNS} FROM mortality_records WHERE flock_id = ? \
         ORDER BY date DESC, created_at DESC, id DESC"
    );
    let rows = sqlx::query(&sql)
        .bind(flock_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "mortality_list"))?;
    rows.iter().map(store::mortality_from_row).collect()
}
