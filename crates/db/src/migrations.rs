/// Inline SQL migrations for the recording metadata schema.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: recordings table
    r#"
CREATE TABLE IF NOT EXISTS recordings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    stream_name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    is_complete INTEGER NOT NULL DEFAULT 0
);
"#,
    // Migration 2: recordings indexes
    r#"
CREATE INDEX IF NOT EXISTS idx_recordings_stream_start ON recordings(stream_name, start_time);
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_recordings_start ON recordings(start_time);
"#,
    // Migration 3: detections (only consulted by the has-detection filter)
    r#"
CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    stream_name TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    label TEXT NOT NULL DEFAULT ''
);
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_detections_stream_ts ON detections(stream_name, timestamp);
"#,
];
