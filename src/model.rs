use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

pub const MORTALITY_CAUSES: &[&str] = &["disease", "injury", "environmental", "unknown"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MortalityCause {
    Disease,
    Injury,
    Environmental,
    Unknown,
}

impl MortalityCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            MortalityCause::Disease => "disease",
            MortalityCause::Injury => "injury",
            MortalityCause::Environmental => "environmental",
            MortalityCause::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MortalityCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MortalityCause {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "disease" => Ok(MortalityCause::Disease),
            "injury" => Ok(MortalityCause::Injury),
            "environmental" => Ok(MortalityCause::Environmental),
            "unknown" => Ok(MortalityCause::Unknown),
            other => Err(format!("unknown mortality cause: {other}")),
        }
    }
}

/// Outcome label recomputed on every status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentResponse {
    Improved,
    NoChange,
}

impl TreatmentResponse {
    pub fn from_counts(recovered_count: i64, still_sick_count: i64) -> Self {
        if recovered_count > 0 || still_sick_count == 0 {
            TreatmentResponse::Improved
        } else {
            TreatmentResponse::NoChange
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentResponse::Improved => "improved",
            TreatmentResponse::NoChange => "no_change",
        }
    }
}

impl FromStr for TreatmentResponse {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "improved" => Ok(TreatmentResponse::Improved),
            "no_change" => Ok(TreatmentResponse::NoChange),
            other => Err(format!("unknown treatment response: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Flock {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    pub initial_count: i64,
    pub current_count: i64,
    pub placed_on: NaiveDate,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MortalityRecord {
    pub id: String,
    pub flock_id: String,
    pub date: NaiveDate,
    pub count: i64,
    pub cause: MortalityCause,
    pub cause_description: String,
    pub recorded_by_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TreatmentRecord {
    pub id: String,
    pub flock_id: String,
    pub disease: String,
    pub medication: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub start_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub diseased_birds_count: i64,
    pub still_sick_count: i64,
    pub recovered_count: i64,
    pub deceased_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<TreatmentResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub recorded_by_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_update: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TreatmentRecord {
    /// Widened so stored counts of any size add up without overflowing.
    pub fn subcount_total(&self) -> i128 {
        i128::from(self.still_sick_count)
            + i128::from(self.recovered_count)
            + i128::from(self.deceased_count)
    }

    /// Advisory only: the sub-counts are allowed to drift from the cohort size.
    pub fn subcount_warning(&self) -> Option<String> {
        let total = self.subcount_total();
        if total == i128::from(self.diseased_birds_count) {
            None
        } else {
            Some(format!(
                "Still sick ({}), recovered ({}) and deceased ({}) add up to {}, but {} birds were diagnosed.",
                self.still_sick_count,
                self.recovered_count,
                self.deceased_count,
                total,
                self.diseased_birds_count
            ))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlockCreatePayload {
    pub name: String,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(alias = "initialCount")]
    pub initial_count: i64,
    #[serde(alias = "placedOn")]
    pub placed_on: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MortalityCreatePayload {
    #[serde(alias = "flockId")]
    pub flock_id: String,
    pub count: i64,
    pub cause: MortalityCause,
    #[serde(default, alias = "causeDescription")]
    pub cause_description: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MortalityUpdatePayload {
    pub id: String,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub cause: Option<MortalityCause>,
    #[serde(default, alias = "causeDescription")]
    pub cause_description: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordIdPayload {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlockScopePayload {
    #[serde(alias = "flockId")]
    pub flock_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreatmentCreatePayload {
    #[serde(alias = "flockId")]
    pub flock_id: String,
    #[serde(alias = "diseasedBirdsCount")]
    pub diseased_birds_count: i64,
    pub disease: String,
    pub medication: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    #[serde(alias = "startDate")]
    pub start_date: NaiveDate,
    #[serde(default, alias = "endDate")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TreatmentUpdatePayload {
    pub id: String,
    #[serde(default)]
    pub disease: Option<String>,
    #[serde(default)]
    pub medication: Option<String>,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default, alias = "startDate")]
    pub start_date: Option<NaiveDate>,
    /// Absent keeps the stored end date; `null` clears it.
    #[serde(default, alias = "endDate", deserialize_with = "present")]
    pub end_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "diseasedBirdsCount")]
    pub diseased_birds_count: Option<i64>,
}

/// Wraps any value that is present, `null` included, in `Some`; a missing key
/// falls back to `#[serde(default)]`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Absolute sub-counts, not deltas.
#[derive(Debug, Clone, Deserialize)]
pub struct TreatmentStatusPayload {
    #[serde(alias = "treatmentId")]
    pub treatment_id: String,
    #[serde(alias = "deceasedCount")]
    pub deceased_count: i64,
    #[serde(alias = "recoveredCount")]
    pub recovered_count: i64,
    #[serde(alias = "stillSickCount")]
    pub still_sick_count: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TreatmentChange {
    pub treatment: TreatmentRecord,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TreatmentStatusChange {
    pub treatment: TreatmentRecord,
    /// Record spawned when the deceased count went up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mortality: Option<MortalityRecord>,
    pub deceased_delta: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TreatmentRemoval {
    pub treatment_id: String,
    pub flock_id: String,
    pub restored_birds: i64,
    pub mortality_records_removed: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MortalityRemoval {
    pub mortality_id: String,
    pub flock_id: String,
    pub restored_birds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn treatment(diseased: i64, sick: i64, recovered: i64, deceased: i64) -> TreatmentRecord {
        TreatmentRecord {
            id: "t1".into(),
            flock_id: "f1".into(),
            disease: "Coccidiosis".into(),
            medication: "Amprolium".into(),
            dosage: "1g/L".into(),
            frequency: "daily".into(),
            duration: "5 days".into(),
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1).expect("date"),
            end_date: None,
            diseased_birds_count: diseased,
            still_sick_count: sick,
            recovered_count: recovered,
            deceased_count: deceased,
            response: None,
            notes: None,
            recorded_by_id: "vet".into(),
            last_status_update: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn response_is_improved_when_any_recovered_or_none_sick() {
        assert_eq!(TreatmentResponse::from_counts(1, 5), TreatmentResponse::Improved);
        assert_eq!(TreatmentResponse::from_counts(0, 0), TreatmentResponse::Improved);
        assert_eq!(TreatmentResponse::from_counts(0, 3), TreatmentResponse::NoChange);
    }

    #[test]
    fn cause_round_trips_through_str() {
        for raw in MORTALITY_CAUSES {
            let cause: MortalityCause = raw.parse().expect("known cause");
            assert_eq!(cause.as_str(), *raw);
        }
        assert!("predator".parse::<MortalityCause>().is_err());
    }

    #[test]
    fn subcount_warning_only_on_mismatch() {
        assert!(treatment(20, 5, 10, 5).subcount_warning().is_none());
        let warning = treatment(20, 5, 10, 3).subcount_warning().expect("mismatch");
        assert!(warning.contains("add up to 18"));
        assert!(warning.contains("20 birds"));
    }

    #[test]
    fn subcount_total_does_not_overflow() {
        let record = treatment(20, i64::MAX, 1, i64::MAX);
        assert_eq!(record.subcount_total(), 2 * i128::from(i64::MAX) + 1);
        let warning = record.subcount_warning().expect("mismatch");
        assert!(warning.contains("add up to 18446744073709551615"));
    }

    #[test]
    fn payloads_accept_camel_case_aliases() {
        let payload: TreatmentStatusPayload = serde_json::from_value(json!({
            "treatmentId": "t1",
            "deceasedCount": 5,
            "recoveredCount": 10,
            "stillSickCount": 5
        }))
        .expect("camelCase payload");
        assert_eq!(payload.treatment_id, "t1");
        assert_eq!(payload.deceased_count, 5);
        assert!(payload.notes.is_none());

        let payload: MortalityCreatePayload = serde_json::from_value(json!({
            "flock_id": "f1",
            "count": 3,
            "cause": "environmental",
            "date": "2026-10-02"
        }))
        .expect("snake_case payload");
        assert_eq!(payload.cause, MortalityCause::Environmental);
        assert_eq!(payload.cause_description, "");
    }

    #[test]
    fn update_end_date_distinguishes_null_from_missing() {
        let cleared: TreatmentUpdatePayload =
            serde_json::from_value(json!({ "id": "t1", "endDate": null })).expect("null");
        assert_eq!(cleared.end_date, Some(None));

        let kept: TreatmentUpdatePayload =
            serde_json::from_value(json!({ "id": "t1" })).expect("missing");
        assert_eq!(kept.end_date, None);

        let set: TreatmentUpdatePayload =
            serde_json::from_value(json!({ "id": "t1", "end_date": "2026-10-09" })).expect("set");
        assert_eq!(set.end_date, Some(NaiveDate::from_ymd_opt(2026, 10, 9)));
    }
}
