use futures::FutureExt;
use sqlx::SqlitePool;
use tracing::info;

use super::store::{self, FLOCK_COLUMNS};
use crate::{
    auth::Caller,
    db,
    id::new_uuid_v7,
    model::{Flock, FlockCreatePayload},
    time::now_ms,
    AppError, AppResult,
};

/// Register a flock at full strength: `current_count` starts at `initial_count`.
pub async fn create_flock(
    pool: &SqlitePool,
    caller: &Caller,
    payload: FlockCreatePayload,
) -> AppResult<Flock> {
    let now = now_ms();
    let flock = Flock {
        id: new_uuid_v7(),
        name: payload.name.trim().to_string(),
        breed: payload
            .breed
            .map(|breed| breed.trim().to_string())
            .filter(|breed| !breed.is_empty()),
        initial_count: payload.initial_count,
        current_count: payload.initial_count,
        placed_on: payload.placed_on,
        created_at: now,
        updated_at: now,
    };

    let row = flock.clone();
    db::run_in_tx(pool, "flock_create", move |tx| {
        async move {
            sqlx::query(
                "INSERT INTO flocks (id, name, breed, initial_count, current_count, placed_on, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&row.id)
            .bind(&row.name)
            .bind(&row.breed)
            .bind(row.initial_count)
            .bind(row.current_count)
            .bind(row.placed_on.to_string())
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(|err| AppError::unexpected(err, "flock_insert"))?;
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await?;

    info!(
        target: "flockbook",
        event = "flock_created",
        flock_id = %flock.id,
        initial_count = flock.initial_count,
        created_by = %caller
    );
    Ok(flock)
}

pub async fn get_flock(pool: &SqlitePool, id: &str) -> AppResult<Flock> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|err| AppError::unexpected(err, "flock_get"))?;
    store::fetch_flock(&mut conn, id).await
}

/// Every flock, oldest placement first.
pub async fn list_flocks(pool: &SqlitePool) -> AppResult<Vec<Flock>> {
    let sql = format!("SELECT {FLOCK_COLUMNS} FROM flocks ORDER BY placed_on, name, id");
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(|err| AppError::unexpected(err, "flock_list"))?;
    rows.iter().map(store::flock_from_row).collect()
}
