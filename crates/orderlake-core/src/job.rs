//! Job lifecycle: a run is begun once and committed once, on the success path only.
//! Dropping an uncommitted run leaves no trace, so a failed run stays incomplete.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use orderlake_bucket::{BucketStore, ObjectLocation};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{EtlError, Result};
use crate::options::ResolvedOptions;
use crate::transform::TransformStats;
use crate::writer::WrittenFile;

pub const JOB_RUNS_DIR: &str = "_job_runs";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub source: String,
    pub destination: String,
    pub rows_read: usize,
    pub malformed_rows: usize,
    pub transform: TransformStats,
    pub rows_written: usize,
    pub partitions: Vec<Option<String>>,
    pub files: Vec<WrittenFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitRecord {
    pub job_name: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub arguments: BTreeMap<String, String>,
    pub summary: JobSummary,
}

#[derive(Debug, Clone)]
pub struct CommittedRun {
    pub record: CommitRecord,
    /// Where the commit record was written, if record keeping is enabled.
    pub record_location: Option<String>,
}

#[derive(Debug)]
pub struct JobRun {
    run_id: Uuid,
    job_name: String,
    options: ResolvedOptions,
    started_at: DateTime<Utc>,
}

impl JobRun {
    pub fn begin(job_name: impl Into<String>, options: ResolvedOptions) -> Self {
        let run = Self {
            run_id: Uuid::new_v4(),
            job_name: job_name.into(),
            options,
            started_at: Utc::now(),
        };
        info!(job_name = %run.job_name, run_id = %run.run_id, "job run started");
        run
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Mark the run complete. With `records_root` set, the commit record is
    /// persisted under `<records_root>/_job_runs/<job_name>/<run_id>.json`; a
    /// failure to persist it fails the commit.
    pub async fn commit(
        self,
        store: &dyn BucketStore,
        records_root: Option<&ObjectLocation>,
        summary: JobSummary,
    ) -> Result<CommittedRun> {
        let record = CommitRecord {
            job_name: self.job_name,
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            arguments: self
                .options
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            summary,
        };

        let record_location = match records_root {
            Some(root) => {
                let location = commit_record_location(root, &record.job_name, record.run_id);
                let payload = serde_json::to_vec_pretty(&record)?;
                store
                    .put_object(&location, Bytes::from(payload), "application/json")
                    .await
                    .map_err(|err| EtlError::DestinationUnwritable {
                        location: location.to_string(),
                        reason: err.to_string(),
                    })?;
                Some(location.to_string())
            }
            None => None,
        };

        info!(
            job_name = %record.job_name,
            run_id = %record.run_id,
            rows_written = record.summary.rows_written,
            partitions = record.summary.partitions.len(),
            record = ?record_location,
            "job run committed"
        );

        Ok(CommittedRun {
            record,
            record_location,
        })
    }
}

pub fn commit_record_location(root: &ObjectLocation, job_name: &str, run_id: Uuid) -> ObjectLocation {
    root.join(JOB_RUNS_DIR)
        .join(&crate::writer::escape_path_name(job_name))
        .join(&format!("{run_id}.json"))
}
