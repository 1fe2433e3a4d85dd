//! Operation boundary for the ledger.
//!
//! Every command resolves the caller first, validates the payload, runs the
//! ledger operation and folds the result into a [`CommandOutcome`]. Nothing
//! escapes as a bare error: store failures are reported under
//! `GENERIC/FAIL` with the original error kept as the cause.

use std::future::Future;

use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    auth::{require_caller, Caller},
    error::GENERIC_FAIL,
    ledger,
    model::{
        Flock, FlockCreatePayload, FlockScopePayload, MortalityCreatePayload, MortalityRecord,
        MortalityRemoval, MortalityUpdatePayload, RecordIdPayload, TreatmentChange,
        TreatmentCreatePayload, TreatmentRecord, TreatmentRemoval, TreatmentStatusChange,
        TreatmentStatusPayload, TreatmentUpdatePayload,
    },
    op_logging::LogScope,
    validation::{self, Validate},
    AppError, AppResult,
};

#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppError>,
    pub warnings: Vec<String>,
}

impl<T> CommandOutcome<T> {
    fn ok(message: impl Into<String>, data: T, warnings: Vec<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            code: None,
            data: Some(data),
            error: None,
            warnings,
        }
    }

    /// Failure outcome for errors raised before a command runs, such as an
    /// unreadable payload.
    pub fn failed(err: AppError) -> Self {
        Self {
            success: false,
            message: err.message().to_string(),
            code: Some(err.code().to_string()),
            data: None,
            error: Some(err),
            warnings: Vec::new(),
        }
    }

    /// Converts back into a plain result, dropping the message and warnings.
    #[allow(clippy::result_large_err)]
    pub fn into_result(self) -> AppResult<T> {
        match (self.data, self.error) {
            (_, Some(err)) => Err(err),
            (Some(data), None) => Ok(data),
            (None, None) => Err(AppError::new(GENERIC_FAIL, self.message)),
        }
    }
}

/// Advisory warnings a command result carries back to the caller.
pub trait CommandData {
    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }
}

impl CommandData for Flock {}
impl CommandData for MortalityRecord {}
impl CommandData for MortalityRemoval {}
impl CommandData for TreatmentRecord {}
impl CommandData for TreatmentRemoval {}
impl<T> CommandData for Vec<T> {}

impl CommandData for TreatmentChange {
    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

impl CommandData for TreatmentStatusChange {
    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

fn normalize(err: AppError, cmd: &'static str) -> AppError {
    if err.is_rejection() || err.code() == GENERIC_FAIL {
        err
    } else {
        AppError::unexpected(err, cmd)
    }
}

fn settle<T: CommandData + Serialize>(
    scope: &LogScope,
    cmd: &'static str,
    message: &str,
    result: AppResult<T>,
) -> CommandOutcome<T> {
    match result {
        Ok(data) => {
            let warnings = data.warnings();
            if warnings.is_empty() {
                scope.success(json!({ "message": message }));
            } else {
                scope.warn(json!({ "message": message, "warnings": warnings }));
            }
            CommandOutcome::ok(message, data, warnings)
        }
        Err(err) => {
            let err = normalize(err, cmd);
            scope.fail(&err);
            CommandOutcome::failed(err)
        }
    }
}

async fn run_mutation<P, T, F, Fut>(
    cmd: &'static str,
    message: &str,
    caller: Option<&str>,
    payload: P,
    op: F,
) -> CommandOutcome<T>
where
    P: Validate,
    T: CommandData + Serialize,
    F: FnOnce(Caller, P) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let caller = match require_caller(caller) {
        Ok(caller) => caller,
        Err(err) => {
            let scope = LogScope::new(cmd, None);
            scope.fail(&err);
            return CommandOutcome::failed(err);
        }
    };
    let scope = LogScope::new(cmd, Some(caller.id().to_string()));
    if let Err(err) = validation::check(&payload) {
        scope.fail(&err);
        return CommandOutcome::failed(err);
    }
    let result = op(caller, payload).await;
    settle(&scope, cmd, message, result)
}

async fn run_query<P, T, F, Fut>(
    cmd: &'static str,
    message: &str,
    payload: P,
    op: F,
) -> CommandOutcome<T>
where
    P: Validate,
    T: CommandData + Serialize,
    F: FnOnce(P) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let scope = LogScope::new(cmd, None);
    if let Err(err) = validation::check(&payload) {
        scope.fail(&err);
        return CommandOutcome::failed(err);
    }
    let result = op(payload).await;
    settle(&scope, cmd, message, result)
}

pub async fn flock_create(
    pool: &SqlitePool,
    caller: Option<&str>,
    payload: FlockCreatePayload,
) -> CommandOutcome<Flock> {
    run_mutation("flock_create", "Flock created.", caller, payload, move |caller, payload| async move {
        ledger::create_flock(pool, &caller, payload).await
    })
    .await
}

pub async fn flock_get(pool: &SqlitePool, payload: RecordIdPayload) -> CommandOutcome<Flock> {
    run_query("flock_get", "Flock loaded.", payload, move |payload| async move {
        ledger::get_flock(pool, &payload.id).await
    })
    .await
}

pub async fn flock_list(pool: &SqlitePool) -> CommandOutcome<Vec<Flock>> {
    let scope = LogScope::new("flock_list", None);
    let result = ledger::list_flocks(pool).await;
    settle(&scope, "flock_list", "Flocks loaded.", result)
}

pub async fn mortality_create(
    pool: &SqlitePool,
    caller: Option<&str>,
    payload: MortalityCreatePayload,
) -> CommandOutcome<MortalityRecord> {
    run_mutation(
        "mortality_create",
        "Mortality record created.",
        caller,
        payload,
        move |caller, payload| async move { ledger::create_mortality(pool, &caller, payload).await },
    )
    .await
}

pub async fn mortality_update(
    pool: &SqlitePool,
    caller: Option<&str>,
    payload: MortalityUpdatePayload,
) -> CommandOutcome<MortalityRecord> {
    run_mutation(
        "mortality_update",
        "Mortality record updated.",
        caller,
        payload,
        move |caller, payload| async move { ledger::update_mortality(pool, &caller, payload).await },
    )
    .await
}

pub async fn mortality_delete(
    pool: &SqlitePool,
    caller: Option<&str>,
    payload: RecordIdPayload,
) -> CommandOutcome<MortalityRemoval> {
    run_mutation(
        "mortality_delete",
        "Mortality record deleted.",
        caller,
        payload,
        move |caller, payload| async move { ledger::delete_mortality(pool, &caller, payload).await },
    )
    .await
}

pub async fn mortality_get(
    pool: &SqlitePool,
    payload: RecordIdPayload,
) -> CommandOutcome<MortalityRecord> {
    run_query(
        "mortality_get",
        "Mortality record loaded.",
        payload,
        move |payload| async move { ledger::get_mortality(pool, &payload.id).await },
    )
    .await
}

pub async fn mortality_list(
    pool: &SqlitePool,
    payload: FlockScopePayload,
) -> CommandOutcome<Vec<MortalityRecord>> {
    run_query(
        "mortality_list",
        "Mortality records loaded.",
        payload,
        move |payload| async move { ledger::list_mortality(pool, &payload.flock_id).await },
    )
    .await
}

pub async fn treatment_create(
    pool: &SqlitePool,
    caller: Option<&str>,
    payload: TreatmentCreatePayload,
) -> CommandOutcome<TreatmentRecord> {
    run_mutation(
        "treatment_create",
        "Treatment created.",
        caller,
        payload,
        move |caller, payload| async move { ledger::create_treatment(pool, &caller, payload).await },
    )
    .await
}

pub async fn treatment_update(
    pool: &SqlitePool,
    caller: Option<&str>,
    payload: TreatmentUpdatePayload,
) -> CommandOutcome<TreatmentChange> {
    run_mutation(
        "treatment_update",
        "Treatment updated.",
        caller,
        payload,
        move |caller, payload| async move { ledger::update_treatment(pool, &caller, payload).await },
    )
    .await
}

pub async fn treatment_status_update(
    pool: &SqlitePool,
    caller: Option<&str>,
    payload: TreatmentStatusPayload,
) -> CommandOutcome<TreatmentStatusChange> {
    run_mutation(
        "treatment_status_update",
        "Treatment status updated.",
        caller,
        payload,
        move |caller, payload| async move {
            ledger::update_treatment_status(pool, &caller, payload).await
        },
    )
    .await
}

pub async fn treatment_delete(
    pool: &SqlitePool,
    caller: Option<&str>,
    payload: RecordIdPayload,
) -> CommandOutcome<TreatmentRemoval> {
    run_mutation(
        "treatment_delete",
        "Treatment deleted.",
        caller,
        payload,
        move |caller, payload| async move { ledger::delete_treatment(pool, &caller, payload).await },
    )
    .await
}

pub async fn treatment_get(
    pool: &SqlitePool,
    payload: RecordIdPayload,
) -> CommandOutcome<TreatmentRecord> {
    run_query(
        "treatment_get",
        "Treatment loaded.",
        payload,
        move |payload| async move { ledger::get_treatment(pool, &payload.id).await },
    )
    .await
}

pub async fn treatment_list(
    pool: &SqlitePool,
    payload: FlockScopePayload,
) -> CommandOutcome<Vec<TreatmentRecord>> {
    run_query(
        "treatment_list",
        "Treatments loaded.",
        payload,
        move |payload| async move { ledger::list_treatments(pool, &payload.flock_id).await },
    )
    .await
}
