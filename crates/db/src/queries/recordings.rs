// crates/db/src/queries/recordings.rs
// Recording lookups, filtered counts, keyset pages and deletes.

use sqlx::{QueryBuilder, Row, Sqlite};

use crate::{Database, DbResult};

/// A recording row as stored in the `recordings` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRow {
    pub id: i64,
    pub stream_name: String,
    pub file_path: String,
    /// Unix seconds.
    pub start_time: i64,
    /// Unix seconds; `None` while the segment is still being written.
    pub end_time: Option<i64>,
    pub size_bytes: i64,
    pub is_complete: bool,
}

impl RecordingRow {
    /// Recorded duration in seconds, if the recording has finished.
    pub fn duration_secs(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for RecordingRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            stream_name: row.try_get("stream_name")?,
            file_path: row.try_get("file_path")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            size_bytes: row.try_get("size_bytes")?,
            is_complete: row.try_get::<i64, _>("is_complete")? != 0,
        })
    }
}

/// Insert payload for a recording.
#[derive(Debug, Clone)]
pub struct NewRecording {
    pub stream_name: String,
    pub file_path: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub size_bytes: i64,
    pub is_complete: bool,
}

impl NewRecording {
    /// A finished recording spanning `start_time..end_time`.
    pub fn complete(
        stream_name: impl Into<String>,
        file_path: impl Into<String>,
        start_time: i64,
        end_time: i64,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            file_path: file_path.into(),
            start_time,
            end_time: Some(end_time),
            size_bytes: 0,
            is_complete: true,
        }
    }
}

/// Selection criteria for bulk operations.
///
/// Only complete recordings are ever matched. Both time bounds apply to the
/// recording's start time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingFilter {
    /// Inclusive lower bound on `start_time` (unix seconds).
    pub start: Option<i64>,
    /// Inclusive upper bound on `start_time` (unix seconds).
    pub end: Option<i64>,
    pub stream_name: Option<String>,
    /// Require at least one detection on the same stream inside the
    /// recording window.
    pub has_detection: bool,
}

impl RecordingFilter {
    fn push_conditions<'a>(&'a self, qb: &mut QueryBuilder<'a, Sqlite>) {
        qb.push(" WHERE r.is_complete = 1 AND r.end_time IS NOT NULL");
        if self.has_detection {
            qb.push(
                " AND EXISTS (SELECT 1 FROM detections d \
                 WHERE d.stream_name = r.stream_name \
                 AND d.timestamp BETWEEN r.start_time AND r.end_time)",
            );
        }
        if let Some(start) = self.start {
            qb.push(" AND r.start_time >= ").push_bind(start);
        }
        if let Some(end) = self.end {
            qb.push(" AND r.start_time <= ").push_bind(end);
        }
        if let Some(stream) = self.stream_name.as_deref() {
            qb.push(" AND r.stream_name = ").push_bind(stream);
        }
    }
}

const RECORDING_COLUMNS: &str =
    "r.id, r.stream_name, r.file_path, r.start_time, r.end_time, r.size_bytes, r.is_complete";

impl Database {
    /// Insert a recording and return its id.
    pub async fn insert_recording(&self, rec: &NewRecording) -> DbResult<i64> {
        let result = sqlx::query(
            "INSERT INTO recordings (stream_name, file_path, start_time, end_time, size_bytes, is_complete) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&rec.stream_name)
        .bind(&rec.file_path)
        .bind(rec.start_time)
        .bind(rec.end_time)
        .bind(rec.size_bytes)
        .bind(rec.is_complete as i64)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Record a detection event on a stream.
    pub async fn insert_detection(&self, stream_name: &str, timestamp: i64, label: &str) -> DbResult<i64> {
        let result =
            sqlx::query("INSERT INTO detections (stream_name, timestamp, label) VALUES (?, ?, ?)")
                .bind(stream_name)
                .bind(timestamp)
                .bind(label)
                .execute(self.pool())
                .await?;
        Ok(result.last_insert_rowid())
    }

    /// Look up a single recording by id.
    pub async fn get_recording(&self, id: i64) -> DbResult<Option<RecordingRow>> {
        let row = sqlx::query_as::<_, RecordingRow>(&format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings r WHERE r.id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Delete a recording row. Returns `false` if no row had that id.
    ///
    /// Only the metadata row is removed; unlinking the backing file is the
    /// caller's job.
    pub async fn delete_recording(&self, id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM recordings WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count recordings matching a filter.
    pub async fn count_recordings(&self, filter: &RecordingFilter) -> DbResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM recordings r");
        filter.push_conditions(&mut qb);
        let count: i64 = qb.build_query_scalar().fetch_one(self.pool()).await?;
        Ok(count.max(0) as u64)
    }

    /// One keyset page of matching recordings with `id > after_id`, in
    /// ascending id order.
    pub async fn list_recordings_after(
        &self,
        filter: &RecordingFilter,
        after_id: i64,
        limit: u32,
    ) -> DbResult<Vec<RecordingRow>> {
        let columns = format!("SELECT {RECORDING_COLUMNS} FROM recordings r");
        let mut qb = QueryBuilder::<Sqlite>::new(columns);
        filter.push_conditions(&mut qb);
        qb.push(" AND r.id > ").push_bind(after_id);
        qb.push(" ORDER BY r.id ASC LIMIT ").push_bind(i64::from(limit));
        let rows = qb
            .build_query_as::<RecordingRow>()
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }
}
