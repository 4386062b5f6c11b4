use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use orderlake_bucket::{BucketStore, LocalBucketStore, ObjectLocation, S3BucketStore, S3Config};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EtlError, Result};

pub const DEFAULT_DESTINATION: &str = "s3://sales-datalake-processed-etl/sales/orders/";
pub const DEFAULT_PARTITION_COLUMN: &str = "order_date";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Add new files; never touch existing ones.
    #[default]
    Append,
    /// Refuse to write when the destination already holds data files.
    ErrorIfExists,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParquetCodec {
    #[default]
    Snappy,
    Zstd,
    Uncompressed,
}

/// What to do with rows whose `quantity` or `price` text did not parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastNullPolicy {
    /// Keep the row with null numeric fields (and a null `total_amount`).
    #[default]
    Retain,
    /// Run a second elimination pass after the cast.
    Drop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    S3,
    Local,
}

macro_rules! impl_config_enum {
    ($ty:ty, $label:literal, { $($text:literal => $variant:path),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = EtlError;

            fn from_str(value: &str) -> Result<Self> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(EtlError::Config(format!(
                        "unknown {} '{}' (expected one of: {})",
                        $label,
                        other,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = match self {
                    $($variant => $text,)+
                };
                f.write_str(text)
            }
        }
    };
}

impl_config_enum!(WriteMode, "write mode", {
    "append" => WriteMode::Append,
    "error_if_exists" => WriteMode::ErrorIfExists,
});
impl_config_enum!(ParquetCodec, "parquet compression", {
    "snappy" => ParquetCodec::Snappy,
    "zstd" => ParquetCodec::Zstd,
    "uncompressed" => ParquetCodec::Uncompressed,
});
impl_config_enum!(CastNullPolicy, "cast null policy", {
    "retain" => CastNullPolicy::Retain,
    "drop" => CastNullPolicy::Drop,
});
impl_config_enum!(StoreKind, "object store kind", {
    "s3" => StoreKind::S3,
    "local" => StoreKind::Local,
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub kind: StoreKind,
    pub region: String,
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
    pub force_path_style: bool,
    /// Directory that stands in for the bucket namespace when `kind = "local"`.
    pub local_root: Option<PathBuf>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::S3,
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            force_path_style: false,
            local_root: None,
        }
    }
}

impl ObjectStoreConfig {
    pub async fn connect(&self) -> Result<Arc<dyn BucketStore>> {
        match self.kind {
            StoreKind::S3 => {
                let store = S3BucketStore::new(S3Config {
                    region: self.region.clone(),
                    endpoint: self.endpoint.clone(),
                    access_key_id: self.access_key_id.clone(),
                    secret_access_key: self.secret_access_key.clone(),
                    session_token: self.session_token.clone(),
                    force_path_style: self.force_path_style,
                })
                .await?;
                info!(region = %self.region, endpoint = ?self.endpoint, "using S3 object store");
                Ok(Arc::new(store))
            }
            StoreKind::Local => {
                let root = self.local_root.clone().ok_or_else(|| {
                    EtlError::Config("store.local_root must be set for a local object store".into())
                })?;
                info!(root = %root.display(), "using local object store");
                Ok(Arc::new(LocalBucketStore::new(root)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub destination: String,
    pub source_scheme: String,
    pub partition_column: String,
    pub write_mode: WriteMode,
    pub compression: ParquetCodec,
    pub cast_null_policy: CastNullPolicy,
    pub delimiter: char,
    pub quote: char,
    /// Write a commit record under `<destination>/_job_runs/` on success.
    pub commit_records: bool,
    pub store: ObjectStoreConfig,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            destination: DEFAULT_DESTINATION.to_string(),
            source_scheme: "s3".to_string(),
            partition_column: DEFAULT_PARTITION_COLUMN.to_string(),
            write_mode: WriteMode::Append,
            compression: ParquetCodec::Snappy,
            cast_null_policy: CastNullPolicy::Retain,
            delimiter: ',',
            quote: '"',
            commit_records: true,
            store: ObjectStoreConfig::default(),
        }
    }
}

impl EtlConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| EtlError::Config(err.to_string()))
    }

    /// File (if any), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|err| {
                    EtlError::Config(format!("failed to read {}: {err}", path.display()))
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("ORDERLAKE_DESTINATION") {
            self.destination = value;
        }
        if let Some(value) = get("ORDERLAKE_SOURCE_SCHEME") {
            self.source_scheme = value;
        }
        if let Some(value) = get("ORDERLAKE_PARTITION_COLUMN") {
            self.partition_column = value;
        }
        if let Some(value) = get("ORDERLAKE_WRITE_MODE") {
            self.write_mode = value.parse()?;
        }
        if let Some(value) = get("ORDERLAKE_COMPRESSION") {
            self.compression = value.parse()?;
        }
        if let Some(value) = get("ORDERLAKE_CAST_NULL_POLICY") {
            self.cast_null_policy = value.parse()?;
        }
        if let Some(value) = get("ORDERLAKE_COMMIT_RECORDS") {
            self.commit_records = parse_bool("ORDERLAKE_COMMIT_RECORDS", &value)?;
        }
        if let Some(value) = get("ORDERLAKE_OBJECT_STORE_KIND") {
            self.store.kind = value.parse()?;
        }
        if let Some(value) = get("ORDERLAKE_LOCAL_ROOT") {
            self.store.local_root = Some(PathBuf::from(value));
        }
        if let Some(value) = get("S3_REGION") {
            self.store.region = value;
        }
        if let Some(value) = get("S3_ENDPOINT_URL") {
            self.store.endpoint = Some(value);
        }
        if let Some(value) = get("S3_ACCESS_KEY_ID") {
            self.store.access_key_id = Some(value);
        }
        if let Some(value) = get("S3_SECRET_ACCESS_KEY") {
            self.store.secret_access_key = Some(value);
        }
        if let Some(value) = get("S3_SESSION_TOKEN") {
            self.store.session_token = Some(value);
        }
        if let Some(value) = get("S3_FORCE_PATH_STYLE") {
            self.store.force_path_style = parse_bool("S3_FORCE_PATH_STYLE", &value)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.destination_location()?;
        if self.partition_column.trim().is_empty() {
            return Err(EtlError::Config("partition_column cannot be empty".into()));
        }
        if self.source_scheme.trim().is_empty() {
            return Err(EtlError::Config("source_scheme cannot be empty".into()));
        }
        csv_byte("delimiter", self.delimiter)?;
        csv_byte("quote", self.quote)?;
        if self.delimiter == self.quote {
            return Err(EtlError::Config(
                "delimiter and quote must be different characters".into(),
            ));
        }
        if self.store.kind == StoreKind::Local && self.store.local_root.is_none() {
            return Err(EtlError::Config(
                "store.local_root must be set for a local object store".into(),
            ));
        }
        Ok(())
    }

    pub fn destination_location(&self) -> Result<ObjectLocation> {
        ObjectLocation::parse(&self.destination)
            .map_err(|err| EtlError::Config(format!("invalid destination: {err}")))
    }

    pub fn csv_options(&self) -> Result<crate::reader::CsvOptions> {
        Ok(crate::reader::CsvOptions {
            delimiter: csv_byte("delimiter", self.delimiter)?,
            quote: csv_byte("quote", self.quote)?,
        })
    }
}

fn csv_byte(field: &str, value: char) -> Result<u8> {
    if (value.is_ascii() && !value.is_ascii_control()) || value == '\t' {
        Ok(value as u8)
    } else {
        Err(EtlError::Config(format!(
            "{field} must be a single printable ASCII character or a tab, got {value:?}"
        )))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(EtlError::Config(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}
