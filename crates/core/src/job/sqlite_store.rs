//! SQLite-backed job record store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{JobError, JobFilter, JobRecord, JobState, JobStore, NewJob};

const COLUMNS: &str = "run_id, job_id, processor, data, state, attempt, created_at, not_before, \
     started_at, finished_at, progress, progress_updated_at, result, error_code, error_message";

/// SQLite-backed job record store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

/// Fixed-width timestamps so that text comparison matches time order.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn db_err(e: rusqlite::Error) -> JobError {
    JobError::Database(e.to_string())
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_runs (
                run_id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                processor TEXT NOT NULL,
                data TEXT NOT NULL,
                state TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                not_before TEXT,
                started_at TEXT,
                finished_at TEXT,
                progress INTEGER,
                progress_updated_at TEXT,
                result TEXT,
                error_code TEXT,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_job_runs_job_id ON job_runs(job_id);
            CREATE INDEX IF NOT EXISTS idx_job_runs_processor_state ON job_runs(processor, state);
            "#,
        )
        .map_err(db_err)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let data_json: String = row.get(3)?;
        let state_str: String = row.get(4)?;
        let created_at_str: String = row.get(6)?;
        let result_json: Option<String> = row.get(12)?;

        let state = JobState::parse(&state_str).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(4, "state".to_string(), rusqlite::types::Type::Text)
        })?;

        let data = serde_json::from_str(&data_json).unwrap_or(serde_json::Value::Null);

        Ok(JobRecord {
            run_id: row.get(0)?,
            job_id: row.get(1)?,
            processor: row.get(2)?,
            data,
            state,
            attempt: row.get(5)?,
            created_at: parse_timestamp(Some(created_at_str)).unwrap_or_else(Utc::now),
            not_before: parse_timestamp(row.get(7)?),
            started_at: parse_timestamp(row.get(8)?),
            finished_at: parse_timestamp(row.get(9)?),
            progress: row.get(10)?,
            progress_updated_at: parse_timestamp(row.get(11)?),
            result: result_json.and_then(|json| serde_json::from_str(&json).ok()),
            error_code: row.get(13)?,
            error_message: row.get(14)?,
        })
    }

    fn fetch(conn: &Connection, run_id: &str) -> Result<Option<JobRecord>, JobError> {
        conn.query_row(
            &format!("SELECT {} FROM job_runs WHERE run_id = ?", COLUMNS),
            params![run_id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    fn fetch_latest(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>, JobError> {
        conn.query_row(
            &format!(
                "SELECT {} FROM job_runs WHERE job_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
                COLUMNS
            ),
            params![job_id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    fn query_many(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<JobRecord>, JobError> {
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, Self::row_to_job).map_err(db_err)?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result.map_err(db_err)?);
        }
        Ok(jobs)
    }

    /// Runs an UPDATE guarded on the current state and reports why nothing
    /// changed when the guard did not match.
    fn guarded_update(
        conn: &Connection,
        run_id: &str,
        operation: &str,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<JobRecord, JobError> {
        let changed = conn.execute(sql, params).map_err(db_err)?;
        match Self::fetch(conn, run_id)? {
            None => Err(JobError::NotFound(run_id.to_string())),
            Some(current) if changed == 0 => Err(JobError::InvalidState {
                run_id: run_id.to_string(),
                current_state: current.state,
                operation: operation.to_string(),
            }),
            Some(updated) => Ok(updated),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn add(&self, job: NewJob) -> Result<JobRecord, JobError> {
        let conn = self.conn.lock().unwrap();

        let record = JobRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            job_id: job
                .job_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            processor: job.processor,
            data: job.data,
            state: job.state,
            attempt: job.attempt,
            created_at: Utc::now(),
            not_before: job.not_before,
            started_at: None,
            finished_at: None,
            progress: None,
            progress_updated_at: None,
            result: None,
            error_code: None,
            error_message: None,
        };

        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| JobError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO job_runs (run_id, job_id, processor, data, state, attempt, created_at, not_before) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.run_id,
                record.job_id,
                record.processor,
                data_json,
                record.state.as_str(),
                record.attempt,
                timestamp(record.created_at),
                record.not_before.map(timestamp),
            ],
        )
        .map_err(db_err)?;

        Ok(record)
    }

    fn get(&self, run_id: &str) -> Result<Option<JobRecord>, JobError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch(&conn, run_id)
    }

    fn attempts(&self, job_id: &str) -> Result<Vec<JobRecord>, JobError> {
        let conn = self.conn.lock().unwrap();
        Self::query_many(
            &conn,
            &format!(
                "SELECT {} FROM job_runs WHERE job_id = ? ORDER BY created_at ASC, rowid ASC",
                COLUMNS
            ),
            params![job_id],
        )
    }

    fn latest(&self, job_id: &str) -> Result<Option<JobRecord>, JobError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch_latest(&conn, job_id)
    }

    fn latest_for_jobs(&self, job_ids: &[String]) -> Result<Vec<JobRecord>, JobError> {
        let conn = self.conn.lock().unwrap();
        let mut jobs = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some(job) = Self::fetch_latest(&conn, job_id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    fn by_processor(&self, processor: &str) -> Result<Vec<JobRecord>, JobError> {
        let conn = self.conn.lock().unwrap();
        Self::query_many(
            &conn,
            &format!(
                "SELECT {} FROM job_runs WHERE processor = ? ORDER BY created_at ASC, rowid ASC",
                COLUMNS
            ),
            params![processor],
        )
    }

    fn by_states(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, JobError> {
        let conn = self.conn.lock().unwrap();

        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.states.is_empty() {
            let placeholders = vec!["?"; filter.states.len()].join(", ");
            conditions.push(format!("state IN ({})", placeholders));
            for state in &filter.states {
                values.push(Box::new(state.as_str()));
            }
        }

        if let Some(ref processor) = filter.processor {
            conditions.push("processor = ?".to_string());
            values.push(Box::new(processor.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // SQLite treats a negative LIMIT as "no limit"
        values.push(Box::new(filter.limit.unwrap_or(-1)));

        let sql = format!(
            "SELECT {} FROM job_runs {} ORDER BY created_at ASC, rowid ASC LIMIT ?",
            COLUMNS, where_clause
        );
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();

        Self::query_many(&conn, &sql, param_refs.as_slice())
    }

    fn claim_next(&self, processor: &str) -> Result<Option<JobRecord>, JobError> {
        let conn = self.conn.lock().unwrap();
        let now = timestamp(Utc::now());

        // Single statement: select-and-claim cannot interleave with another claimer
        conn.query_row(
            &format!(
                "UPDATE job_runs SET state = 'running', started_at = ?1 \
                 WHERE state = 'runnable' AND run_id = ( \
                     SELECT run_id FROM job_runs \
                     WHERE processor = ?2 AND state = 'runnable' \
                       AND (not_before IS NULL OR not_before <= ?1) \
                     ORDER BY created_at ASC, rowid ASC LIMIT 1 \
                 ) RETURNING {}",
                COLUMNS
            ),
            params![now, processor],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    fn unblock(&self, run_id: &str) -> Result<JobRecord, JobError> {
        let conn = self.conn.lock().unwrap();
        Self::guarded_update(
            &conn,
            run_id,
            "unblock",
            "UPDATE job_runs SET state = 'runnable' WHERE run_id = ? AND state = 'gated'",
            params![run_id],
        )
    }

    fn update_progress(&self, run_id: &str, progress: u8) -> Result<(), JobError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_runs SET progress = ?, progress_updated_at = ? WHERE run_id = ? AND state = 'running'",
            params![progress.min(100), timestamp(Utc::now()), run_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn complete(&self, run_id: &str, result: serde_json::Value) -> Result<JobRecord, JobError> {
        let conn = self.conn.lock().unwrap();
        let now = timestamp(Utc::now());
        let result_json =
            serde_json::to_string(&result).map_err(|e| JobError::Serialization(e.to_string()))?;

        Self::guarded_update(
            &conn,
            run_id,
            "complete",
            "UPDATE job_runs SET state = 'succeeded', finished_at = ?1, progress = 100, \
             progress_updated_at = ?1, result = ?2 WHERE run_id = ?3 AND state = 'running'",
            params![now, result_json, run_id],
        )
    }

    fn fail(&self, run_id: &str, code: &str, message: &str) -> Result<JobRecord, JobError> {
        let conn = self.conn.lock().unwrap();
        Self::guarded_update(
            &conn,
            run_id,
            "fail",
            "UPDATE job_runs SET state = 'failed', finished_at = ?, error_code = ?, error_message = ? \
             WHERE run_id = ? AND state = 'running'",
            params![timestamp(Utc::now()), code, message, run_id],
        )
    }

    fn cancel(&self, run_id: &str) -> Result<JobRecord, JobError> {
        let conn = self.conn.lock().unwrap();
        Self::guarded_update(
            &conn,
            run_id,
            "cancel",
            "UPDATE job_runs SET state = 'cancelled', finished_at = ? \
             WHERE run_id = ? AND state IN ('gated', 'runnable', 'running')",
            params![timestamp(Utc::now()), run_id],
        )
    }

    fn requeue_running(&self, processor: &str) -> Result<usize, JobError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_runs SET state = 'runnable', started_at = NULL WHERE processor = ? AND state = 'running'",
            params![processor],
        )
        .map_err(db_err)
    }

    fn job_ids_by_data(&self, field: &str, value: &str) -> Result<Vec<String>, JobError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT job_id FROM job_runs WHERE json_extract(data, ?1) = ?2 ORDER BY job_id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![format!("$.{}", field), value], |row| row.get(0))
            .map_err(db_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(db_err)
    }

    fn purge(&self, job_ids: &[String]) -> Result<usize, JobError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        let mut deleted = 0;
        for job_id in job_ids {
            deleted += tx
                .execute("DELETE FROM job_runs WHERE job_id = ?", params![job_id])
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(deleted)
    }
}
