/// Locally assigned identifiers are monotonically increasing integers, so
/// ordering by id is ordering by creation.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
