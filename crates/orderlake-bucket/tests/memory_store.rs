use anyhow::Result;
use bytes::Bytes;
use orderlake_bucket::{BucketStore, MemoryBucketStore, ObjectLocation};

#[tokio::test]
async fn memory_store_round_trips_and_lists() -> Result<()> {
    let store = MemoryBucketStore::new();
    let a = ObjectLocation::parse("s3://lake/sales/orders/order_date=2024-01-01/part-0.parquet")?;
    let b = ObjectLocation::parse("s3://lake/sales/orders/order_date=2024-01-02/part-0.parquet")?;
    let other = ObjectLocation::parse("s3://lake/returns/part-0.parquet")?;

    store.put_object(&a, Bytes::from_static(b"a"), "application/octet-stream").await?;
    store.put_object(&b, Bytes::from_static(b"b"), "application/octet-stream").await?;
    store.put_object(&other, Bytes::from_static(b"c"), "application/octet-stream").await?;

    assert_eq!(store.get_object(&a).await?, Bytes::from_static(b"a"));

    let listed = store
        .list_prefix(&ObjectLocation::parse("s3://lake/sales/orders/")?)
        .await?;
    assert_eq!(listed, vec![a.key().to_string(), b.key().to_string()]);
    assert_eq!(store.operations(), 5);
    Ok(())
}

#[tokio::test]
async fn memory_store_reports_missing_objects() -> Result<()> {
    let store = MemoryBucketStore::new();
    let missing = ObjectLocation::parse("s3://raw/incoming/orders.csv")?;
    let err = store.get_object(&missing).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn denied_bucket_rejects_writes_only_for_that_bucket() -> Result<()> {
    let store = MemoryBucketStore::new().deny_writes_to("lake");
    let denied = ObjectLocation::parse("s3://lake/sales/part.parquet")?;
    let allowed = ObjectLocation::parse("s3://scratch/sales/part.parquet")?;

    assert!(store
        .put_object(&denied, Bytes::from_static(b"x"), "application/octet-stream")
        .await
        .is_err());
    store
        .put_object(&allowed, Bytes::from_static(b"x"), "application/octet-stream")
        .await?;
    assert!(store.keys("lake").is_empty());
    assert_eq!(store.keys("scratch"), vec!["sales/part.parquet".to_string()]);
    Ok(())
}

#[tokio::test]
async fn copy_and_delete_move_objects() -> Result<()> {
    let store = MemoryBucketStore::new();
    let staged = ObjectLocation::parse("s3://lake/_temporary/run/part-0.parquet")?;
    let published = ObjectLocation::parse("s3://lake/sales/part-0.parquet")?;
    store.insert(&staged, &b"rows"[..]);

    store.copy_object(&staged, &published).await?;
    store.delete_object(&staged).await?;
    store.delete_object(&staged).await?;

    assert_eq!(store.keys("lake"), vec!["sales/part-0.parquet".to_string()]);
    assert_eq!(store.get_object(&published).await?, Bytes::from_static(b"rows"));

    let err = store.copy_object(&staged, &published).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn write_budget_fails_later_puts_and_copies() -> Result<()> {
    let store = MemoryBucketStore::new().fail_writes_after(2);
    let a = ObjectLocation::parse("s3://lake/a")?;
    let b = ObjectLocation::parse("s3://lake/b")?;
    let c = ObjectLocation::parse("s3://lake/c")?;

    store.put_object(&a, Bytes::from_static(b"a"), "text/plain").await?;
    store.copy_object(&a, &b).await?;
    assert!(store.put_object(&c, Bytes::from_static(b"c"), "text/plain").await.is_err());
    assert!(store.copy_object(&a, &c).await.is_err());

    // Deletes are never refused.
    store.delete_object(&b).await?;
    assert_eq!(store.keys("lake"), vec!["a".to_string()]);
    Ok(())
}
