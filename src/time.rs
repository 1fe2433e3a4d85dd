use chrono::{NaiveDate, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Calendar date used for records the ledger writes on its own behalf.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}
