/// Job identifiers are the project ids used in the progress endpoint path.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
