//! Shape validation for ledger payloads.
//!
//! Every payload implements [`Validate`]; the checks are pure and run before any
//! transaction is opened. Failures collect every offending field instead of
//! stopping at the first one.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    error::VALIDATION_INVALID_INPUT,
    model::{
        FlockCreatePayload, FlockScopePayload, MortalityCreatePayload, MortalityUpdatePayload,
        RecordIdPayload, TreatmentCreatePayload, TreatmentStatusPayload, TreatmentUpdatePayload,
    },
    AppError,
};

const NAME_MAX_CHARS: usize = 120;
const DESCRIPTION_MAX_CHARS: usize = 500;
const NOTES_MAX_CHARS: usize = 2000;
/// Upper bound for any bird count a caller submits.
pub const MAX_BIRDS: i64 = 10_000_000;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FieldErrors {
    errors: BTreeMap<String, String>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the first problem seen for `field`.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    fn require_id(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add(field, "is required");
        }
    }

    fn require_text(&mut self, field: &str, value: &str, max: usize) {
        if value.trim().is_empty() {
            self.add(field, "is required");
        } else {
            self.limit_text(field, value, max);
        }
    }

    fn optional_text(&mut self, field: &str, value: Option<&str>, max: usize) {
        if let Some(value) = value {
            self.require_text(field, value, max);
        }
    }

    fn limit_text(&mut self, field: &str, value: &str, max: usize) {
        let length = value.chars().count();
        if length > max {
            self.add(field, format!("must be at most {max} characters (got {length})"));
        }
    }

    fn bird_count(&mut self, field: &str, value: i64, min: i64) {
        if value < min {
            self.add(field, format!("must be at least {min}"));
        } else if value > MAX_BIRDS {
            self.add(field, format!("must be at most {MAX_BIRDS}"));
        }
    }

    fn date_order(&mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) {
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                self.add("end_date", "must not be before start_date");
            }
        }
    }
}

impl From<FieldErrors> for AppError {
    fn from(errors: FieldErrors) -> Self {
        let fields = errors.fields().collect::<Vec<_>>().join(", ");
        let message = format!("Some fields need attention: {fields}.");
        AppError::new(VALIDATION_INVALID_INPUT, message)
            .with_context("fields", fields)
            .with_contexts(
                errors
                    .errors
                    .into_iter()
                    .map(|(field, message)| (format!("field.{field}"), message)),
            )
    }
}

pub trait Validate {
    fn validate(&self) -> Result<(), FieldErrors>;
}

/// Runs [`Validate::validate`] and lifts the field errors into an [`AppError`].
#[allow(clippy::result_large_err)]
pub fn check<T: Validate>(payload: &T) -> Result<(), AppError> {
    payload.validate().map_err(AppError::from)
}

impl Validate for FlockCreatePayload {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require_text("name", &self.name, NAME_MAX_CHARS);
        errors.optional_text("breed", self.breed.as_deref(), NAME_MAX_CHARS);
        errors.bird_count("initial_count", self.initial_count, 1);
        errors.into_result()
    }
}

impl Validate for MortalityCreatePayload {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require_id("flock_id", &self.flock_id);
        errors.bird_count("count", self.count, 1);
        errors.limit_text(
            "cause_description",
            &self.cause_description,
            DESCRIPTION_MAX_CHARS,
        );
        errors.into_result()
    }
}

impl Validate for MortalityUpdatePayload {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require_id("id", &self.id);
        if let Some(count) = self.count {
            errors.bird_count("count", count, 1);
        }
        if let Some(description) = &self.cause_description {
            errors.limit_text("cause_description", description, DESCRIPTION_MAX_CHARS);
        }
        errors.into_result()
    }
}

impl Validate for RecordIdPayload {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require_id("id", &self.id);
        errors.into_result()
    }
}

impl Validate for FlockScopePayload {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require_id("flock_id", &self.flock_id);
        errors.into_result()
    }
}

impl Validate for TreatmentCreatePayload {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require_id("flock_id", &self.flock_id);
        errors.bird_count("diseased_birds_count", self.diseased_birds_count, 1);
        errors.require_text("disease", &self.disease, NAME_MAX_CHARS);
        errors.require_text("medication", &self.medication, NAME_MAX_CHARS);
        errors.require_text("dosage", &self.dosage, NAME_MAX_CHARS);
        errors.require_text("frequency", &self.frequency, NAME_MAX_CHARS);
        errors.require_text("duration", &self.duration, NAME_MAX_CHARS);
        errors.date_order(Some(self.start_date), self.end_date);
        if let Some(notes) = &self.notes {
            errors.limit_text("notes", notes, NOTES_MAX_CHARS);
        }
        errors.into_result()
    }
}

impl Validate for TreatmentUpdatePayload {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require_id("id", &self.id);
        errors.optional_text("disease", self.disease.as_deref(), NAME_MAX_CHARS);
        errors.optional_text("medication", self.medication.as_deref(), NAME_MAX_CHARS);
        errors.optional_text("dosage", self.dosage.as_deref(), NAME_MAX_CHARS);
        errors.optional_text("frequency", self.frequency.as_deref(), NAME_MAX_CHARS);
        errors.optional_text("duration", self.duration.as_deref(), NAME_MAX_CHARS);
        if let Some(count) = self.diseased_birds_count {
            errors.bird_count("diseased_birds_count", count, 1);
        }
        errors.date_order(self.start_date, self.end_date.flatten());
        if let Some(notes) = &self.notes {
            errors.limit_text("notes", notes, NOTES_MAX_CHARS);
        }
        errors.into_result()
    }
}

impl Validate for TreatmentStatusPayload {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require_id("treatment_id", &self.treatment_id);
        errors.bird_count("deceased_count", self.deceased_count, 0);
        errors.bird_count("recovered_count", self.recovered_count, 0);
        errors.bird_count("still_sick_count", self.still_sick_count, 0);
        if let Some(notes) = &self.notes {
            errors.limit_text("notes", notes, NOTES_MAX_CHARS);
        }
        errors.into_result()
    }
}
