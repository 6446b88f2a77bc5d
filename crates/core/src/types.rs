/// Engine-issued job identifier (the ComfyUI `prompt_id`).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
