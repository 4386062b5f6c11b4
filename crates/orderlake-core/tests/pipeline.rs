use std::io::Cursor;

use anyhow::Result;
use orderlake_bucket::{BucketStore, MemoryBucketStore, ObjectLocation};
use orderlake_core::{run_from_args, CastNullPolicy, EtlConfig, EtlError};
use polars::prelude::*;

const SOURCE: &str = "s3://sales-raw/incoming/2024/orders.csv";
const ORDERS_CSV: &[u8] = b"order_date,quantity,price,customer\n\
2024-01-01,5,10.0,acme\n\
2024-01-02,,10.0,globex\n\
2024-01-03,abc,10.0,initech\n\
2024-01-01,2,1.5,umbrella\n";

fn job_args() -> Vec<&'static str> {
    vec![
        "--JOB_NAME",
        "orders-etl",
        "--S3_BUCKET",
        "sales-raw",
        "--S3_KEY",
        "incoming/2024/orders.csv",
    ]
}

fn seeded_store() -> Result<MemoryBucketStore> {
    let store = MemoryBucketStore::new();
    store.insert(&ObjectLocation::parse(SOURCE)?, ORDERS_CSV);
    Ok(store)
}

async fn read_partition(store: &MemoryBucketStore, date: &str) -> Result<DataFrame> {
    let mut frames = Vec::new();
    for key in store.keys("sales-datalake-processed-etl") {
        if !key.starts_with(&format!("sales/orders/order_date={date}/")) {
            continue;
        }
        let location = ObjectLocation::new("s3", "sales-datalake-processed-etl", key)?;
        let bytes = store.get_object(&location).await?;
        frames.push(ParquetReader::new(Cursor::new(bytes.to_vec())).finish()?);
    }
    let mut frames = frames.into_iter();
    let mut combined = frames.next().expect("partition should exist");
    for frame in frames {
        combined.vstack_mut(&frame)?;
    }
    Ok(combined)
}

#[tokio::test]
async fn end_to_end_run_writes_partitions_and_commits() -> Result<()> {
    let store = seeded_store()?;
    let config = EtlConfig::default();

    let committed = run_from_args(&store, &config, job_args()).await?;
    let summary = &committed.record.summary;

    assert_eq!(summary.source, SOURCE);
    assert_eq!(summary.rows_read, 4);
    assert_eq!(summary.transform.dropped_null_rows, 1);
    assert_eq!(summary.transform.nulled_by_cast, 1);
    assert_eq!(summary.rows_written, 3);
    assert_eq!(
        summary.partitions,
        vec![Some("2024-01-01".to_string()), Some("2024-01-03".to_string())]
    );

    let jan_first = read_partition(&store, "2024-01-01").await?;
    let quantity: Vec<Option<i32>> = jan_first.column("quantity")?.i32()?.into_iter().collect();
    let price: Vec<Option<f64>> = jan_first.column("price")?.f64()?.into_iter().collect();
    let total: Vec<Option<f64>> = jan_first.column("total_amount")?.f64()?.into_iter().collect();
    assert_eq!(quantity, vec![Some(5), Some(2)]);
    assert_eq!(price, vec![Some(10.0), Some(1.5)]);
    assert_eq!(total, vec![Some(50.0), Some(3.0)]);

    // Unparseable quantity passes through as null under the default policy.
    let jan_third = read_partition(&store, "2024-01-03").await?;
    assert_eq!(jan_third.height(), 1);
    assert_eq!(jan_third.column("quantity")?.null_count(), 1);
    assert_eq!(jan_third.column("total_amount")?.null_count(), 1);

    // The row with a missing quantity never reaches the output.
    assert!(store
        .keys("sales-datalake-processed-etl")
        .iter()
        .all(|key| !key.contains("order_date=2024-01-02")));

    let record_location = committed.record_location.expect("commit record written");
    assert!(record_location.starts_with(
        "s3://sales-datalake-processed-etl/sales/orders/_job_runs/orders-etl/"
    ));
    let record_bytes = store
        .get_object(&ObjectLocation::parse(&record_location)?)
        .await?;
    let record: serde_json::Value = serde_json::from_slice(&record_bytes)?;
    assert_eq!(record["job_name"], "orders-etl");
    assert_eq!(record["arguments"]["S3_BUCKET"], "sales-raw");
    assert_eq!(record["summary"]["rows_written"], 3);
    Ok(())
}

#[tokio::test]
async fn drop_policy_filters_unparseable_rows() -> Result<()> {
    let store = seeded_store()?;
    let config = EtlConfig {
        cast_null_policy: CastNullPolicy::Drop,
        ..EtlConfig::default()
    };

    let committed = run_from_args(&store, &config, job_args()).await?;
    assert_eq!(committed.record.summary.rows_written, 2);
    assert_eq!(committed.record.summary.transform.dropped_after_cast, 1);
    assert!(store
        .keys("sales-datalake-processed-etl")
        .iter()
        .all(|key| !key.contains("order_date=2024-01-03")));
    Ok(())
}

#[tokio::test]
async fn rerunning_doubles_partition_rows() -> Result<()> {
    let store = seeded_store()?;
    let config = EtlConfig::default();

    run_from_args(&store, &config, job_args()).await?;
    assert_eq!(read_partition(&store, "2024-01-01").await?.height(), 2);

    run_from_args(&store, &config, job_args()).await?;
    assert_eq!(read_partition(&store, "2024-01-01").await?.height(), 4);
    assert_eq!(read_partition(&store, "2024-01-03").await?.height(), 2);
    Ok(())
}

#[tokio::test]
async fn missing_bucket_argument_fails_before_any_io() -> Result<()> {
    let store = seeded_store()?;
    let err = run_from_args(
        &store,
        &EtlConfig::default(),
        ["--JOB_NAME", "orders-etl", "--S3_KEY", "incoming/2024/orders.csv"],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EtlError::MissingArgument(ref keys) if keys == &["S3_BUCKET"]));
    assert_eq!(store.operations(), 0);
    Ok(())
}

#[tokio::test]
async fn missing_source_does_not_commit() -> Result<()> {
    let store = MemoryBucketStore::new();
    let err = run_from_args(&store, &EtlConfig::default(), job_args())
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::SourceNotFound { .. }));
    assert!(store.keys("sales-datalake-processed-etl").is_empty());
    Ok(())
}

#[tokio::test]
async fn unwritable_destination_leaves_run_uncommitted() -> Result<()> {
    let store = seeded_store()?.deny_writes_to("sales-datalake-processed-etl");
    let err = run_from_args(&store, &EtlConfig::default(), job_args())
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::DestinationUnwritable { .. }));
    assert!(store.keys("sales-datalake-processed-etl").is_empty());
    Ok(())
}

#[tokio::test]
async fn source_without_partition_column_is_schema_error() -> Result<()> {
    let store = MemoryBucketStore::new();
    store.insert(
        &ObjectLocation::parse(SOURCE)?,
        &b"quantity,price\n5,10.0\n"[..],
    );

    let err = run_from_args(&store, &EtlConfig::default(), job_args())
        .await
        .unwrap_err();
    assert!(matches!(err, EtlError::Schema(_)));
    assert!(store.keys("sales-datalake-processed-etl").is_empty());
    Ok(())
}

#[tokio::test]
async fn commit_records_can_be_disabled() -> Result<()> {
    let store = seeded_store()?;
    let config = EtlConfig {
        commit_records: false,
        ..EtlConfig::default()
    };

    let committed = run_from_args(&store, &config, job_args()).await?;
    assert!(committed.record_location.is_none());
    assert!(store
        .keys("sales-datalake-processed-etl")
        .iter()
        .all(|key| !key.contains("_job_runs")));
    Ok(())
}

#[tokio::test]
async fn partial_destination_write_exposes_nothing() -> Result<()> {
    let store = seeded_store()?.fail_writes_after(1);
    let err = run_from_args(&store, &EtlConfig::default(), job_args())
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::DestinationUnwritable { .. }));
    assert!(store.keys("sales-datalake-processed-etl").is_empty());
    Ok(())
}

#[tokio::test]
async fn unrecorded_commit_retracts_data_files() -> Result<()> {
    // Two partitions: two staged uploads and two copies, then the commit record fails.
    let store = seeded_store()?.fail_writes_after(4);
    let err = run_from_args(&store, &EtlConfig::default(), job_args())
        .await
        .unwrap_err();

    match err {
        EtlError::DestinationUnwritable { location, .. } => assert!(location.contains("_job_runs")),
        other => panic!("expected DestinationUnwritable, got {other:?}"),
    }
    assert!(store.keys("sales-datalake-processed-etl").is_empty());
    Ok(())
}
