use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use super::{
    counts::{credit, debit},
    store::{self, TREATMENT_COLUMNS},
};
use crate::{
    auth::Caller,
    db,
    error::NOT_FOUND_TREATMENT,
    id::new_uuid_v7,
    model::{
        MortalityCause, MortalityRecord, RecordIdPayload, TreatmentChange, TreatmentCreatePayload,
        TreatmentRecord, TreatmentRemoval, TreatmentResponse, TreatmentStatusChange,
        TreatmentStatusPayload, TreatmentUpdatePayload,
    },
    time::{now_ms, today_utc},
    validation::FieldErrors,
    AppError, AppResult,
};

pub const LOWERED_DECEASED_WARNING: &str =
    "Lowering the deceased count does not return birds to the flock or remove mortality records.";

/// Open a treatment for a cohort of diseased birds. The flock's head-count
/// is not touched.
pub async fn create_treatment(
    pool: &SqlitePool,
    caller: &Caller,
    payload: TreatmentCreatePayload,
) -> AppResult<TreatmentRecord> {
    let mut tx = db::begin(pool, "treatment_create").await?;
    let outcome = create_in_tx(&mut tx, caller, payload).await;
    db::settle_tx(tx, outcome).await
}

async fn create_in_tx(
    conn: &mut SqliteConnection,
    caller: &Caller,
    payload: TreatmentCreatePayload,
) -> AppResult<TreatmentRecord> {
    let flock = store::claim_flock(conn, &payload.flock_id).await?;
    let now = now_ms();
    let record = TreatmentRecord {
        id: new_uuid_v7(),
        flock_id: flock.id,
        disease: payload.disease,
        medication: payload.medication,
        dosage: payload.dosage,
        frequency: payload.frequency,
        duration: payload.duration,
        start_date: payload.start_date,
        end_date: payload.end_date,
        diseased_birds_count: payload.diseased_birds_count,
        still_sick_count: payload.diseased_birds_count,
        recovered_count: 0,
        deceased_count: 0,
        response: None,
        notes: payload.notes,
        recorded_by_id: caller.id().to_string(),
        last_status_update: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO treatments \
         (id, flock_id, disease, medication, dosage, frequency, duration, start_date, end_date, \
          diseased_birds_count, still_sick_count, recovered_count, deceased_count, notes, \
          recorded_by_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
    )
    .bind(&record.id)
    .bind(&record.flock_id)
    .bind(&record.disease)
    .bind(&record.medication)
    .bind(&record.dosage)
    .bind(&record.frequency)
    .bind(&record.duration)
    .bind(record.start_date.to_string())
    .bind(record.end_date.map(|d| d.to_string()))
    .bind(record.diseased_birds_count)
    .bind(record.still_sick_count)
    .bind(record.recovered_count)
    .bind(record.deceased_count)
    .bind(&record.notes)
    .bind(&record.recorded_by_id)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::unexpected(err, "treatment_insert"))?;

    info!(
        target: "flockbook",
        event = "treatment_created",
        treatment_id = %record.id,
        flock_id = %record.flock_id,
        diseased_birds_count = record.diseased_birds_count
    );
    Ok(record)
}

/// Edit the descriptive fields of a treatment. Sub-counts and the flock are
/// never changed here.
pub async fn update_treatment(
    pool: &SqlitePool,
    caller: &Caller,
    payload: TreatmentUpdatePayload,
) -> AppResult<TreatmentChange> {
    let mut tx = db::begin(pool, "treatment_update").await?;
    let outcome = update_in_tx(&mut tx, caller, payload).await;
    db::settle_tx(tx, outcome).await
}

async fn update_in_tx(
    conn: &mut SqliteConnection,
    caller: &Caller,
    payload: TreatmentUpdatePayload,
) -> AppResult<TreatmentChange> {
    let existing = store::claim_treatment(conn, &payload.id).await?;
    let cohort_changed = payload
        .diseased_birds_count
        .is_some_and(|count| count != existing.diseased_birds_count);

    let updated = TreatmentRecord {
        disease: payload.disease.unwrap_or_else(|| existing.disease.clone()),
        medication: payload
            .medication
            .unwrap_or_else(|| existing.medication.clone()),
        dosage: payload.dosage.unwrap_or_else(|| existing.dosage.clone()),
        frequency: payload
            .frequency
            .unwrap_or_else(|| existing.frequency.clone()),
        duration: payload.duration.unwrap_or_else(|| existing.duration.clone()),
        start_date: payload.start_date.unwrap_or(existing.start_date),
        end_date: payload.end_date.unwrap_or(existing.end_date),
        notes: payload.notes.or_else(|| existing.notes.clone()),
        diseased_birds_count: payload
            .diseased_birds_count
            .unwrap_or(existing.diseased_birds_count),
        updated_at: now_ms(),
        ..existing.clone()
    };
    if let Some(end_date) = updated.end_date {
        if end_date < updated.start_date {
            let mut errors = FieldErrors::new();
            errors.add("end_date", "must not be before start_date");
            errors.into_result()?;
        }
    }

    sqlx::query(
        "UPDATE treatments \
         SET disease = ?, medication = ?, dosage = ?, frequency = ?, duration = ?, \
             start_date = ?, end_date = ?, notes = ?, diseased_birds_count = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&updated.disease)
    .bind(&updated.medication)
    .bind(&updated.dosage)
    .bind(&updated.frequency)
    .bind(&updated.duration)
    .bind(updated.start_date.to_string())
    .bind(updated.end_date.map(|d| d.to_string()))
    .bind(&updated.notes)
    .bind(updated.diseased_birds_count)
    .bind(updated.updated_at)
    .bind(&updated.id)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::unexpected(err, "treatment_update"))?;

    let warnings: Vec<String> = if cohort_changed {
        updated.subcount_warning().into_iter().collect()
    } else {
        Vec::new()
    };

    info!(
        target: "flockbook",
        event = "treatment_updated",
        treatment_id = %updated.id,
        cohort_changed,
        updated_by = %caller
    );
    Ok(TreatmentChange {
        treatment: updated,
        warnings,
    })
}

/// Record how a treated cohort is doing. The counts are absolute; a rise in
/// the deceased count debits the flock and spawns one mortality record for
/// the difference.
pub async fn update_treatment_status(
    pool: &SqlitePool,
    caller: &Caller,
    payload: TreatmentStatusPayload,
) -> AppResult<TreatmentStatusChange> {
    let mut tx = db::begin(pool, "treatment_status_update").await?;
    let outcome = status_in_tx(&mut tx, caller, payload).await;
    db::settle_tx(tx, outcome).await
}

async fn status_in_tx(
    conn: &mut SqliteConnection,
    caller: &Caller,
    payload: TreatmentStatusPayload,
) -> AppResult<TreatmentStatusChange> {
    let existing = store::claim_treatment(conn, &payload.treatment_id).await?;
    let Some(deceased_delta) = payload.deceased_count.checked_sub(existing.deceased_count) else {
        let mut errors = FieldErrors::new();
        errors.add(
            "deceased_count",
            format!(
                "cannot move from the recorded {} to {}",
                existing.deceased_count, payload.deceased_count
            ),
        );
        return Err(errors.into());
    };
    let now = now_ms();

    let updated = TreatmentRecord {
        still_sick_count: payload.still_sick_count,
        recovered_count: payload.recovered_count,
        deceased_count: payload.deceased_count,
        response: Some(TreatmentResponse::from_counts(
            payload.recovered_count,
            payload.still_sick_count,
        )),
        notes: payload.notes.or_else(|| existing.notes.clone()),
        last_status_update: Some(now),
        updated_at: now,
        ..existing.clone()
    };

    sqlx::query(
        "UPDATE treatments \
         SET still_sick_count = ?, recovered_count = ?, deceased_count = ?, response = ?, \
             notes = ?, last_status_update = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(updated.still_sick_count)
    .bind(updated.recovered_count)
    .bind(updated.deceased_count)
    .bind(updated.response.map(|r| r.as_str()))
    .bind(&updated.notes)
    .bind(now)
    .bind(now)
    .bind(&updated.id)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::unexpected(err, "treatment_status_update"))?;

    let mortality = if deceased_delta > 0 {
        let flock = store::claim_flock(conn, &updated.flock_id).await?;
        let remaining = debit(&flock, deceased_delta)?;
        let record = MortalityRecord {
            id: new_uuid_v7(),
            flock_id: flock.id.clone(),
            date: today_utc(),
            count: deceased_delta,
            cause: MortalityCause::Disease,
            cause_description: format!("Died during treatment for {}", updated.disease),
            recorded_by_id: caller.id().to_string(),
            treatment_id: Some(updated.id.clone()),
            created_at: now,
            updated_at: now,
        };
        store::insert_mortality(conn, &record).await?;
        store::write_flock_count(conn, &flock.id, remaining, now).await?;
        info!(
            target: "flockbook",
            event = "treatment_mortality_recorded",
            treatment_id = %updated.id,
            mortality_id = %record.id,
            flock_id = %flock.id,
            count = deceased_delta,
            current_count = remaining
        );
        Some(record)
    } else {
        None
    };

    let mut warnings: Vec<String> = updated.subcount_warning().into_iter().collect();
    if deceased_delta < 0 {
        warn!(
            target: "flockbook",
            event = "treatment_deceased_lowered",
            treatment_id = %updated.id,
            deceased_delta
        );
        warnings.push(LOWERED_DECEASED_WARNING.to_string());
    }

    info!(
        target: "flockbook",
        event = "treatment_status_updated",
        treatment_id = %updated.id,
        deceased_delta,
        response = updated.response.map(|r| r.as_str()).unwrap_or_default()
    );
    Ok(TreatmentStatusChange {
        treatment: updated,
        mortality,
        deceased_delta,
        warnings,
    })
}

/// Delete a treatment and its mortality records, returning the deceased
/// birds to the flock.
pub async fn delete_treatment(
    pool: &SqlitePool,
    caller: &Caller,
    payload: RecordIdPayload,
) -> AppResult<TreatmentRemoval> {
    let mut tx = db::begin(pool, "treatment_delete").await?;
    let outcome = delete_in_tx(&mut tx, caller, payload).await;
    db::settle_tx(tx, outcome).await
}

async fn delete_in_tx(
    conn: &mut SqliteConnection,
    caller: &Caller,
    payload: RecordIdPayload,
) -> AppResult<TreatmentRemoval> {
    let treatment = store::claim_treatment(conn, &payload.id).await?;
    let now = now_ms();

    let restored_birds = if treatment.deceased_count > 0 {
        let flock = store::claim_flock(conn, &treatment.flock_id).await?;
        let restored = credit(&flock, treatment.deceased_count)?;
        store::write_flock_count(conn, &flock.id, restored, now).await?;
        treatment.deceased_count
    } else {
        0
    };

    let removed = sqlx::query("DELETE FROM mortality_records WHERE treatment_id = ?")
        .bind(&treatment.id)
        .execute(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "treatment_mortality_delete"))?
        .rows_affected();
    sqlx::query("DELETE FROM treatments WHERE id = ?")
        .bind(&treatment.id)
        .execute(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "treatment_delete"))?;

    info!(
        target: "flockbook",
        event = "treatment_deleted",
        treatment_id = %treatment.id,
        flock_id = %treatment.flock_id,
        restored_birds,
        mortality_records_removed = removed,
        deleted_by = %caller
    );
    Ok(TreatmentRemoval {
        treatment_id: treatment.id,
        flock_id: treatment.flock_id,
        restored_birds,
        mortality_records_removed: removed,
    })
}

pub async fn get_treatment(pool: &SqlitePool, id: &str) -> AppResult<TreatmentRecord> {
    let sql = format!("SELECT {TREATMENT_COLUMNS} FROM treatments WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|err| AppError::unexpected(err, "treatment_get"))?;
    match row {
        Some(row) => store::treatment_from_row(&row),
        None => Err(AppError::not_found(NOT_FOUND_TREATMENT, "Treatment", id)),
    }
}

/// Treatments of one flock, most recently started first.
pub async fn list_treatments(
    pool: &SqlitePool,
    flock_id: &str,
) -> AppResult<Vec<TreatmentRecord>> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|err| AppError::unexpected(err, "treatment_list"))?;
    store::fetch_flock(&mut conn, flock_id).await?;

    let sql = format!(
        "SELECT {TREATMENT_COLUMNS} FROM treatments WHERE flock_id = ? \
         ORDER BY start_date DESC, created_at DESC, id DESC"
    );
    let rows = sqlx::query(&sql)
        .bind(flock_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "treatment_list"))?;
    rows.iter().map(store::treatment_from_row).collect()
}
