use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::AppError;

fn context_to_json(context: &BTreeMap<String, String>) -> Option<Value> {
    if context.is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(context.len());
        for (key, value) in context {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

fn wrap_details(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

fn error_details(err: &AppError) -> Value {
    let mut map = Map::new();
    map.insert("code".into(), Value::String(err.code().to_string()));
    map.insert("message".into(), Value::String(err.message().to_string()));
    if let Some(context) = context_to_json(err.context()) {
        map.insert("context".into(), context);
    }
    if let Some(cause) = err.cause() {
        map.insert("cause".into(), Value::String(cause.message().to_string()));
    }
    Value::Object(map)
}

/// Structured log lines for one ledger command: enter, then exactly one of
/// success, warn or fail, each carrying the elapsed time.
pub struct LogScope {
    cmd: &'static str,
    caller_id: Option<String>,
    start: Instant,
}

impl LogScope {
    pub fn new(cmd: &'static str, caller_id: Option<String>) -> Self {
        let scope = Self {
            cmd,
            caller_id,
            start: Instant::now(),
        };
        debug!(
            target: "flockbook",
            area = "ledger",
            event = "command_enter",
            cmd = scope.cmd,
            caller_id = scope.caller_id.as_deref()
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, details: Value) {
        info!(
            target: "flockbook",
            area = "ledger",
            event = "command_success",
            cmd = self.cmd,
            caller_id = self.caller_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    pub fn warn(&self, details: Value) {
        warn!(
            target: "flockbook",
            area = "ledger",
            event = "command_warning",
            cmd = self.cmd,
            caller_id = self.caller_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    /// Rejections (validation, auth, not found, ledger bounds) log at warn;
    /// anything else is an error.
    pub fn fail(&self, err: &AppError) {
        let details = error_details(err);
        if err.is_rejection() {
            warn!(
                target: "flockbook",
                area = "ledger",
                event = "command_rejected",
                cmd = self.cmd,
                caller_id = self.caller_id.as_deref(),
                duration_ms = self.elapsed_ms(),
                details = %details
            );
            return;
        }
        error!(
            target: "flockbook",
            area = "ledger",
            event = "command_failed",
            cmd = self.cmd,
            caller_id = self.caller_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }
}
