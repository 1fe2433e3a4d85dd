//! Row access shared by the ledger operations.
//!
//! `claim_*` helpers open with an `UPDATE ... RETURNING` that leaves the row
//! unchanged. In SQLite that statement takes the database write lock, so a
//! transaction that claims before it reads can never act on a count another
//! writer is about to change.

use chrono::NaiveDate;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{
    error::{NOT_FOUND_FLOCK, NOT_FOUND_MORTALITY, NOT_FOUND_TREATMENT},
    model::{Flock, MortalityCause, MortalityRecord, TreatmentRecord, TreatmentResponse},
    AppError, AppResult,
};

pub(crate) const STORE_DECODE_ERROR: &str = "STORE/DECODE";

pub(crate) const FLOCK_COLUMNS: &str =
    "id, name, breed, initial_count, current_count, placed_on, created_at, updated_at";
pub(crate) const MORTALITY_COLUMNS: &str = "id, flock_id, date, count, cause, cause_description, \
     recorded_by_id, treatment_id, created_at, updated_at";
pub(crate) const TREATMENT_COLUMNS: &str = "id, flock_id, disease, medication, dosage, frequency, \
     duration, start_date, end_date, diseased_birds_count, still_sick_count, recovered_count, \
     deceased_count, response, notes, recorded_by_id, last_status_update, created_at, updated_at";

fn parse_date(value: &str, field: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|err| {
        AppError::new(STORE_DECODE_ERROR, format!("Invalid date in {field}"))
            .with_context("value", value.to_string())
            .with_context("error", err.to_string())
    })
}

pub(crate) fn flock_from_row(row: &SqliteRow) -> AppResult<Flock> {
    let placed_on: String = row.try_get("placed_on")?;
    Ok(Flock {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        breed: row.try_get("breed")?,
        initial_count: row.try_get("initial_count")?,
        current_count: row.try_get("current_count")?,
        placed_on: parse_date(&placed_on, "placed_on")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn mortality_from_row(row: &SqliteRow) -> AppResult<MortalityRecord> {
    let date: String = row.try_get("date")?;
    let cause: String = row.try_get("cause")?;
    Ok(MortalityRecord {
        id: row.try_get("id")?,
        flock_id: row.try_get("flock_id")?,
        date: parse_date(&date, "date")?,
        count: row.try_get("count")?,
        cause: cause
            .parse::<MortalityCause>()
            .map_err(|err| AppError::new(STORE_DECODE_ERROR, err).with_context("column", "cause"))?,
        cause_description: row.try_get("cause_description")?,
        recorded_by_id: row.try_get("recorded_by_id")?,
        treatment_id: row.try_get("treatment_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn treatment_from_row(row: &SqliteRow) -> AppResult<TreatmentRecord> {
    let start_date: String = row.try_get("start_date")?;
    let end_date: Option<String> = row.try_get("end_date")?;
    let response: Option<String> = row.try_get("response")?;
    let response = response
        .map(|raw| raw.parse::<TreatmentResponse>())
        .transpose()
        .map_err(|err| AppError::new(STORE_DECODE_ERROR, err).with_context("column", "response"))?;

    Ok(TreatmentRecord {
        id: row.try_get("id")?,
        flock_id: row.try_get("flock_id")?,
        disease: row.try_get("disease")?,
        medication: row.try_get("medication")?,
        dosage: row.try_get("dosage")?,
        frequency: row.try_get("frequency")?,
        duration: row.try_get("duration")?,
        start_date: parse_date(&start_date, "start_date")?,
        end_date: end_date
            .as_deref()
            .map(|raw| parse_date(raw, "end_date"))
            .transpose()?,
        diseased_birds_count: row.try_get("diseased_birds_count")?,
        still_sick_count: row.try_get("still_sick_count")?,
        recovered_count: row.try_get("recovered_count")?,
        deceased_count: row.try_get("deceased_count")?,
        response,
        notes: row.try_get("notes")?,
        recorded_by_id: row.try_get("recorded_by_id")?,
        last_status_update: row.try_get("last_status_update")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) async fn claim_flock(conn: &mut SqliteConnection, id: &str) -> AppResult<Flock> {
    let sql = format!(
        "UPDATE flocks SET current_count = current_count WHERE id = ? RETURNING {FLOCK_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "flock_claim"))?;
    match row {
        Some(row) => flock_from_row(&row),
        None => Err(AppError::not_found(NOT_FOUND_FLOCK, "Flock", id)),
    }
}

pub(crate) async fn claim_mortality(
    conn: &mut SqliteConnection,
    id: &str,
) -> AppResult<MortalityRecord> {
    let sql = format!(
        "UPDATE mortality_records SET updated_at = updated_at WHERE id = ? RETURNING {MORTALITY_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "mortality_claim"))?;
    match row {
        Some(row) => mortality_from_row(&row),
        None => Err(AppError::not_found(
            NOT_FOUND_MORTALITY,
            "Mortality record",
            id,
        )),
    }
}

pub(crate) async fn claim_treatment(
    conn: &mut SqliteConnection,
    id: &str,
) -> AppResult<TreatmentRecord> {
    let sql = format!(
        "UPDATE treatments SET updated_at = updated_at WHERE id = ? RETURNING {TREATMENT_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "treatment_claim"))?;
    match row {
        Some(row) => treatment_from_row(&row),
        None => Err(AppError::not_found(NOT_FOUND_TREATMENT, "Treatment", id)),
    }
}

pub(crate) async fn write_flock_count(
    conn: &mut SqliteConnection,
    flock_id: &str,
    current_count: i64,
    now: i64,
) -> AppResult<()> {
    sqlx::query("UPDATE flocks SET current_count = ?, updated_at = ? WHERE id = ?")
        .bind(current_count)
        .bind(now)
        .bind(flock_id)
        .execute(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "flock_count_write"))?;
    Ok(())
}

pub(crate) async fn insert_mortality(
    conn: &mut SqliteConnection,
    record: &MortalityRecord,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO mortality_records \
         (id, flock_id, date, count, cause, cause_description, recorded_by_id, treatment_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(&record.id)
    .bind(&record.flock_id)
    .bind(record.date.to_string())
    .bind(record.count)
    .bind(record.cause.as_str())
    .bind(&record.cause_description)
    .bind(&record.recorded_by_id)
    .bind(&record.treatment_id)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::unexpected(err, "mortality_insert"))?;
    Ok(())
}

pub(crate) async fn fetch_flock(conn: &mut SqliteConnection, id: &str) -> AppResult<Flock> {
    let sql = format!("SELECT {FLOCK_COLUMNS} FROM flocks WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| AppError::unexpected(err, "flock_fetch"))?;
    match row {
        Some(row) => flock_from_row(&row),
        None => Err(AppError::not_found(NOT_FOUND_FLOCK, "Flock", id)),
    }
}
