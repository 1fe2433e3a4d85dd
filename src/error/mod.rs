use std::collections::BTreeMap;
use std::fmt;
use std::io::Error as IoError;

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;

pub const VALIDATION_INVALID_INPUT: &str = "VALIDATION/INVALID_INPUT";
pub const NOT_FOUND_FLOCK: &str = "NOT_FOUND/FLOCK";
pub const NOT_FOUND_MORTALITY: &str = "NOT_FOUND/MORTALITY";
pub const NOT_FOUND_TREATMENT: &str = "NOT_FOUND/TREATMENT";
pub const LEDGER_INSUFFICIENT_BIRDS: &str = "LEDGER/INSUFFICIENT_BIRDS";
pub const LEDGER_NEGATIVE_COUNT: &str = "LEDGER/NEGATIVE_COUNT";
pub const LEDGER_EXCEEDS_INITIAL: &str = "LEDGER/EXCEEDS_INITIAL";
pub const AUTH_UNAUTHENTICATED: &str = "AUTH/UNAUTHENTICATED";
pub const GENERIC_FAIL: &str = "GENERIC/FAIL";
pub const GENERIC_FAIL_MESSAGE: &str = "Something went wrong, please try again.";

/// Code families a caller can fix by changing the request.
const REJECTION_FAMILIES: &[&str] = &["VALIDATION", "LEDGER", "NOT_FOUND", "AUTH"];

/// Error returned by every ledger operation and carried in command outcomes.
///
/// `code` is stable and machine readable (`FAMILY/DETAIL`); `message` is meant
/// for people. `context` holds the values the message talks about, and `cause`
/// keeps the lower-level error a `GENERIC/FAIL` was raised for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            cause: None,
        }
    }

    /// Not-found error for the named entity kind, carrying the looked-up id.
    pub fn not_found(code: &'static str, entity: &str, id: &str) -> Self {
        AppError::new(code, format!("{entity} not found."))
            .with_context("entity", entity.to_ascii_lowercase())
            .with_context("id", id)
    }

    /// Hides a store or plumbing failure behind the generic message; the
    /// original error stays reachable as the cause.
    pub fn unexpected(err: impl Into<AppError>, operation: &'static str) -> Self {
        AppError::new(GENERIC_FAIL, GENERIC_FAIL_MESSAGE)
            .with_context("operation", operation)
            .with_cause(err)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// The part of the code before the first `/`.
    pub fn family(&self) -> &str {
        self.code.split('/').next().unwrap_or_default()
    }

    /// Validation, ledger bound, not-found and auth errors: the request was
    /// refused, nothing failed.
    pub fn is_rejection(&self) -> bool {
        REJECTION_FAMILIES.contains(&self.family())
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_contexts<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.context
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        for (key, value) in &self.context {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let app_error = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        match error.raw_os_error() {
            Some(os_code) => app_error.with_context("os_code", os_code.to_string()),
            None => app_error,
        }
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        use serde_json::error::Category;

        let code = match error.classify() {
            Category::Syntax => "JSON/SYNTAX",
            Category::Data => "JSON/DATA",
            Category::Eof => "JSON/EOF",
            Category::Io => "JSON/IO",
        };
        AppError::new(code, error.to_string())
            .with_context("line", error.line().to_string())
            .with_context("column", error.column().to_string())
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out waiting for a ledger database connection",
            ),
            SqlxError::PoolClosed => {
                AppError::new("SQLX/POOL_CLOSED", "The ledger database is closed")
            }
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                // SQLite extended result codes: 275 CHECK, 787 FOREIGN KEY, 1555/2067 UNIQUE.
                let code = match db.code().as_deref() {
                    Some("275") => "SQLX/CHECK_VIOLATION".to_string(),
                    Some("787") => "SQLX/FOREIGN_KEY_VIOLATION".to_string(),
                    Some("1555") | Some("2067") => "SQLX/UNIQUE_VIOLATION".to_string(),
                    Some("5") | Some("517") => "SQLX/BUSY".to_string(),
                    Some(other) => format!("SQLITE/{other}"),
                    None => "SQLX/DATABASE".to_string(),
                };
                let app_error = AppError::new(code, db.message().to_string());
                match db.constraint() {
                    Some(constraint) => app_error.with_context("constraint", constraint),
                    None => app_error,
                }
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("SQLX/COLUMN_DECODE", source.to_string())
                    .with_context("column", index)
            }
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}
