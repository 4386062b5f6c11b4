use std::io::Cursor;

use bytes::Bytes;
use orderlake_bucket::{BucketError, BucketStore, ObjectLocation};
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ParquetCodec, WriteMode};
use crate::error::{EtlError, Result};
use crate::job::JOB_RUNS_DIR;
use crate::transform::require_columns;

/// Run-scoped upload area beneath the destination root.
pub const STAGING_DIR: &str = "_temporary";

/// Directory value used when the partition column is null.
pub const DEFAULT_PARTITION_VALUE: &str = "__HIVE_DEFAULT_PARTITION__";

const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

#[derive(Debug, Clone)]
pub struct WriteTarget {
    pub root: ObjectLocation,
    pub partition_column: String,
    pub mode: WriteMode,
    pub codec: ParquetCodec,
    /// Embedded in every file name so appends never collide.
    pub run_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenFile {
    pub partition_value: Option<String>,
    pub location: String,
    pub rows: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub files: Vec<WrittenFile>,
}

impl WriteOutcome {
    pub fn rows_written(&self) -> usize {
        self.files.iter().map(|file| file.rows).sum()
    }

    pub fn partitions(&self) -> Vec<Option<String>> {
        let mut values: Vec<Option<String>> = self
            .files
            .iter()
            .map(|file| file.partition_value.clone())
            .collect();
        values.dedup();
        values
    }
}

/// Write one parquet file per distinct partition value under
/// `<root>/<column>=<value>/`. Existing objects are never listed over or replaced
/// in append mode.
///
/// Files are first uploaded beneath `<root>/_temporary/<run_id>/` and only copied
/// into the partition directories once every upload succeeded. On failure the
/// run's staged and already published files are deleted again, so readers of the
/// lake never see rows from an aborted run.
pub async fn write_partitioned(
    store: &dyn BucketStore,
    df: &DataFrame,
    target: &WriteTarget,
) -> Result<WriteOutcome> {
    require_columns(df, "partitioned write", &[target.partition_column.as_str()])?;

    if target.mode == WriteMode::ErrorIfExists {
        ensure_destination_empty(store, &target.root).await?;
    }

    let partitions = partition_frames(df, &target.partition_column)?;
    let staging = staging_location(&target.root, target.run_id);

    let mut staged = Vec::with_capacity(partitions.len());
    if let Err(err) = stage_files(store, partitions, target, &staging, &mut staged).await {
        discard(store, staged.iter().map(|file| &file.staged)).await;
        return Err(err);
    }

    let mut published: Vec<&ObjectLocation> = Vec::with_capacity(staged.len());
    for file in &staged {
        if let Err(err) = store.copy_object(&file.staged, &file.published).await {
            discard(
                store,
                published
                    .iter()
                    .copied()
                    .chain(staged.iter().map(|file| &file.staged)),
            )
            .await;
            return Err(unwritable(&file.published, err));
        }
        published.push(&file.published);
    }
    discard(store, staged.iter().map(|file| &file.staged)).await;

    let outcome = WriteOutcome {
        files: staged.into_iter().map(|file| file.file).collect(),
    };
    info!(
        destination = %target.root,
        partitions = outcome.files.len(),
        rows = outcome.rows_written(),
        mode = %target.mode,
        "wrote partitioned parquet"
    );
    Ok(outcome)
}

/// Delete files a write already published. Used when the run fails after
/// `write_partitioned` returned.
pub async fn retract(store: &dyn BucketStore, files: &[WrittenFile]) {
    let locations: Vec<ObjectLocation> = files
        .iter()
        .filter_map(|file| ObjectLocation::parse(&file.location).ok())
        .collect();
    discard(store, locations.iter()).await;
}

pub fn staging_location(root: &ObjectLocation, run_id: Uuid) -> ObjectLocation {
    root.join(STAGING_DIR).join(&run_id.to_string())
}

struct StagedFile {
    staged: ObjectLocation,
    published: ObjectLocation,
    file: WrittenFile,
}

async fn stage_files(
    store: &dyn BucketStore,
    partitions: Vec<(Option<String>, DataFrame)>,
    target: &WriteTarget,
    staging: &ObjectLocation,
    staged: &mut Vec<StagedFile>,
) -> Result<()> {
    for (seq, (value, frame)) in partitions.into_iter().enumerate() {
        let mut data = frame.drop(&target.partition_column)?;
        let bytes = encode_parquet(&mut data, target.codec)?;
        let relative = format!(
            "{}/{}",
            partition_directory(&target.partition_column, value.as_deref()),
            part_file_name(seq, target.run_id, target.codec)
        );
        let staged_location = staging.join(&relative);
        let published = target.root.join(&relative);

        let size = bytes.len();
        store
            .put_object(&staged_location, Bytes::from(bytes), PARQUET_CONTENT_TYPE)
            .await
            .map_err(|err| unwritable(&published, err))?;
        debug!(location = %staged_location, rows = frame.height(), size, "staged partition file");

        staged.push(StagedFile {
            file: WrittenFile {
                partition_value: value,
                location: published.to_string(),
                rows: frame.height(),
                bytes: size,
            },
            staged: staged_location,
            published,
        });
    }
    Ok(())
}

async fn discard<'a>(store: &dyn BucketStore, locations: impl Iterator<Item = &'a ObjectLocation>) {
    for location in locations {
        if let Err(err) = store.delete_object(location).await {
            warn!(location = %location, error = %err, "failed to remove run output");
        }
    }
}

fn unwritable(location: &ObjectLocation, err: BucketError) -> EtlError {
    EtlError::DestinationUnwritable {
        location: location.to_string(),
        reason: err.to_string(),
    }
}

async fn ensure_destination_empty(store: &dyn BucketStore, root: &ObjectLocation) -> Result<()> {
    let prefix = root.as_prefix();
    let reserved = [
        prefix.join(JOB_RUNS_DIR).as_prefix(),
        prefix.join(STAGING_DIR).as_prefix(),
    ];
    let existing = store
        .list_prefix(&prefix)
        .await
        .map_err(|err| unwritable(root, err))?;

    if let Some(key) = existing
        .iter()
        .find(|key| !reserved.iter().any(|dir| key.starts_with(dir.key())))
    {
        return Err(EtlError::DestinationUnwritable {
            location: root.to_string(),
            reason: format!("destination already contains data (found {key})"),
        });
    }
    Ok(())
}

/// Split `df` into one frame per distinct value of `column`, ordered by value
/// with the null partition first. Row order inside a partition is preserved.
pub fn partition_frames(df: &DataFrame, column: &str) -> Result<Vec<(Option<String>, DataFrame)>> {
    require_columns(df, "partitioning", &[column])?;
    if df.height() == 0 {
        return Ok(Vec::new());
    }

    let mut groups = Vec::new();
    for frame in df.partition_by_stable([column], true)? {
        if frame.height() == 0 {
            continue;
        }
        let values = frame.column(column)?.cast(&DataType::String)?;
        let value = values.str()?.get(0).map(str::to_string);
        groups.push((value, frame));
    }
    groups.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(groups)
}

pub fn partition_directory(column: &str, value: Option<&str>) -> String {
    let value = match value {
        Some(value) if !value.is_empty() => escape_path_name(value),
        _ => DEFAULT_PARTITION_VALUE.to_string(),
    };
    format!("{}={}", escape_path_name(column), value)
}

/// Percent-encode characters that cannot appear verbatim in a partition directory.
pub fn escape_path_name(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if needs_escape(c) {
            escaped.push_str(&format!("%{:02X}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

fn needs_escape(c: char) -> bool {
    matches!(
        c,
        '\u{01}'..='\u{1F}'
            | '"'
            | '#'
            | '%'
            | '\''
            | '*'
            | '/'
            | ':'
            | '='
            | '?'
            | '\\'
            | '\u{7F}'
            | '{'
            | '['
            | ']'
            | '^'
    )
}

fn part_file_name(seq: usize, run_id: Uuid, codec: ParquetCodec) -> String {
    match codec {
        ParquetCodec::Uncompressed => format!("part-{seq:05}-{run_id}.c000.parquet"),
        codec => format!("part-{seq:05}-{run_id}.c000.{codec}.parquet"),
    }
}

pub fn encode_parquet(df: &mut DataFrame, codec: ParquetCodec) -> Result<Vec<u8>> {
    let compression = match codec {
        ParquetCodec::Snappy => ParquetCompression::Snappy,
        ParquetCodec::Zstd => ParquetCompression::Zstd(None),
        ParquetCodec::Uncompressed => ParquetCompression::Uncompressed,
    };

    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        ParquetWriter::new(&mut cursor)
            .with_compression(compression)
            .with_statistics(StatisticsOptions::default())
            .finish(df)?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(escape_path_name("2024-01-01"), "2024-01-01");
        assert_eq!(escape_path_name("2024/01/01"), "2024%2F01%2F01");
        assert_eq!(escape_path_name("a=b:c"), "a%3Db%3Ac");
        assert_eq!(escape_path_name("100%"), "100%25");
        assert_eq!(escape_path_name("tab\there"), "tab%09here");
    }

    #[test]
    fn null_and_empty_values_use_default_partition() {
        assert_eq!(
            partition_directory("order_date", None),
            "order_date=__HIVE_DEFAULT_PARTITION__"
        );
        assert_eq!(
            partition_directory("order_date", Some("")),
            "order_date=__HIVE_DEFAULT_PARTITION__"
        );
        assert_eq!(
            partition_directory("order_date", Some("2024-01-01")),
            "order_date=2024-01-01"
        );
    }

    #[test]
    fn file_names_carry_codec_and_run_id() {
        let run_id = Uuid::nil();
        assert_eq!(
            part_file_name(3, run_id, ParquetCodec::Snappy),
            format!("part-00003-{run_id}.c000.snappy.parquet")
        );
        assert_eq!(
            part_file_name(0, run_id, ParquetCodec::Uncompressed),
            format!("part-00000-{run_id}.c000.parquet")
        );
    }
}
