use orderlake_bucket::BucketStore;
use tracing::info;

use crate::config::EtlConfig;
use crate::error::Result;
use crate::job::{CommittedRun, JobRun, JobSummary};
use crate::options::JobArguments;
use crate::reader::read_csv;
use crate::transform::transform;
use crate::writer::{retract, write_partitioned, WriteTarget};

/// Resolve invocation parameters, then run the job. Argument errors surface
/// before any storage call.
pub async fn run_from_args<I, S>(
    store: &dyn BucketStore,
    config: &EtlConfig,
    args: I,
) -> Result<CommittedRun>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let arguments = JobArguments::from_args(args)?;
    run_job(store, config, &arguments).await
}

/// Read -> transform -> write -> commit. Any error returns before the commit, and
/// a commit that cannot be recorded takes the run's data files back out.
pub async fn run_job(
    store: &dyn BucketStore,
    config: &EtlConfig,
    arguments: &JobArguments,
) -> Result<CommittedRun> {
    let csv_options = config.csv_options()?;
    let destination = config.destination_location()?;
    let source = arguments.source_location(&config.source_scheme)?;

    let run = JobRun::begin(arguments.job_name.clone(), arguments.options.clone());
    info!(source = %source, destination = %destination, "starting order ingestion");

    let read = read_csv(store, &source, &csv_options).await?;
    let transformed = transform(&read.frame, config.cast_null_policy)?;

    let target = WriteTarget {
        root: destination.clone(),
        partition_column: config.partition_column.clone(),
        mode: config.write_mode,
        codec: config.compression,
        run_id: run.run_id(),
    };
    let written = write_partitioned(store, &transformed.frame, &target).await?;

    let files = written.files.clone();
    let summary = JobSummary {
        source: source.to_string(),
        destination: destination.to_string(),
        rows_read: read.rows_read,
        malformed_rows: read.malformed_rows,
        transform: transformed.stats,
        rows_written: written.rows_written(),
        partitions: written.partitions(),
        files: written.files,
    };

    let records_root = config.commit_records.then_some(&destination);
    match run.commit(store, records_root, summary).await {
        Ok(committed) => Ok(committed),
        Err(err) => {
            retract(store, &files).await;
            Err(err)
        }
    }
}
