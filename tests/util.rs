#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::NaiveDate;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use flockbook_lib::{
    ledger,
    migrate,
    model::{Flock, FlockCreatePayload, MortalityCause, MortalityCreatePayload, TreatmentCreatePayload},
    require_caller, Caller,
};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

pub fn farmhand() -> Caller {
    require_caller(Some("farmhand@example.farm")).expect("valid caller")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub async fn seed_flock(pool: &SqlitePool, initial_count: i64) -> Flock {
    ledger::create_flock(
        pool,
        &farmhand(),
        FlockCreatePayload {
            name: "Layers A".into(),
            breed: Some("Lohmann Brown".into()),
            initial_count,
            placed_on: date(2026, 9, 1),
        },
    )
    .await
    .expect("seed flock")
}

pub fn mortality(flock_id: &str, count: i64) -> MortalityCreatePayload {
    MortalityCreatePayload {
        flock_id: flock_id.to_string(),
        count,
        cause: MortalityCause::Environmental,
        cause_description: "heat stress".into(),
        date: date(2026, 10, 2),
    }
}

pub fn treatment(flock_id: &str, diseased_birds_count: i64) -> TreatmentCreatePayload {
    TreatmentCreatePayload {
        flock_id: flock_id.to_string(),
        diseased_birds_count,
        disease: "Coccidiosis".into(),
        medication: "Amprolium".into(),
        dosage: "1g/L".into(),
        frequency: "daily".into(),
        duration: "5 days".into(),
        start_date: date(2026, 10, 1),
        end_date: None,
        notes: None,
    }
}

pub async fn current_count(pool: &SqlitePool, flock_id: &str) -> i64 {
    sqlx::query_scalar("SELECT current_count FROM flocks WHERE id = ?")
        .bind(flock_id)
        .fetch_one(pool)
        .await
        .expect("flock count")
}

pub async fn linked_mortality_count(pool: &SqlitePool, treatment_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM mortality_records WHERE treatment_id = ?")
        .bind(treatment_id)
        .fetch_one(pool)
        .await
        .expect("linked mortality count")
}

/// Every row of the ledger tables, rendered as text, in a stable order.
pub async fn snapshot(pool: &SqlitePool) -> Vec<String> {
    let mut out = Vec::new();
    for (table, order) in [
        ("flocks", "id"),
        ("mortality_records", "id"),
        ("treatments", "id"),
    ] {
        let rows = sqlx::query(&format!("SELECT * FROM {table} ORDER BY {order}"))
            .fetch_all(pool)
            .await
            .expect("snapshot rows");
        for row in rows {
            let mut cells = vec![table.to_string()];
            for idx in 0..row.len() {
                let cell = row
                    .try_get::<Option<String>, _>(idx)
                    .ok()
                    .flatten()
                    .or_else(|| {
                        row.try_get::<Option<i64>, _>(idx)
                            .ok()
                            .flatten()
                            .map(|v| v.to_string())
                    })
                    .unwrap_or_else(|| "NULL".into());
                cells.push(cell);
            }
            out.push(cells.join("|"));
        }
    }
    out
}
