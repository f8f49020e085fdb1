use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_naive, parse_optional_datetime, parse_termination, NAIVE_FORMAT},
    models::{EnrollmentRun, Termination},
};

fn row_to_run(row: &Row) -> Result<EnrollmentRun> {
    let deadline: String = row.get("deadline")?;
    let armed_at: String = row.get("armed_at")?;
    let finished_at: Option<String> = row.get("finished_at")?;
    let termination: Option<String> = row.get("termination")?;

    Ok(EnrollmentRun {
        id: row.get("id")?,
        term: row.get("term")?,
        courses: row.get("courses")?,
        deadline: parse_naive(&deadline, "deadline")?,
        armed_at: parse_datetime(&armed_at, "armed_at")?,
        finished_at: parse_optional_datetime(finished_at, "finished_at")?,
        termination: termination.as_deref().map(parse_termination).transpose()?,
        detail: row.get("detail")?,
    })
}

impl Database {
    pub async fn insert_enrollment_run(&self, run: &EnrollmentRun) -> Result<()> {
        let record = run.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO enrollment_runs (id, term, courses, deadline, armed_at, finished_at, termination, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.term,
                    record.courses,
                    record.deadline.format(NAIVE_FORMAT).to_string(),
                    record.armed_at.to_rfc3339(),
                    record.finished_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.termination.map(|t| t.as_str()),
                    record.detail,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn finish_enrollment_run(
        &self,
        run_id: &str,
        termination: Termination,
        detail: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE enrollment_runs
                 SET termination = ?1,
                     detail = ?2,
                     finished_at = ?3
                 WHERE id = ?4",
                params![termination.as_str(), detail, finished_at.to_rfc3339(), run_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_enrollment_runs(&self, limit: usize) -> Result<Vec<EnrollmentRun>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, term, courses, deadline, armed_at, finished_at, termination, detail
                 FROM enrollment_runs
                 ORDER BY armed_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit as i64])?;
            let mut runs = Vec::new();
            while let Some(row) = rows.next()? {
                runs.push(row_to_run(row)?);
            }
            Ok(runs)
        })
        .await
    }

    /// Close runs left open by a previous process that exited mid-countdown.
    pub async fn mark_unfinished_runs_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE enrollment_runs
                 SET termination = ?1,
                     detail = COALESCE(detail, 'process exited before the run finished'),
                     finished_at = ?2
                 WHERE finished_at IS NULL",
                params![Termination::ForcedEnd.as_str(), now.to_rfc3339()],
            )?;
            Ok(updated)
        })
        .await
    }
}
