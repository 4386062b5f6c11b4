pub mod config;
pub mod error;
pub mod job;
pub mod options;
pub mod pipeline;
pub mod reader;
pub mod transform;
pub mod writer;

pub use config::{CastNullPolicy, EtlConfig, ObjectStoreConfig, ParquetCodec, WriteMode};
pub use error::{EtlError, Result};
pub use job::{CommitRecord, CommittedRun, JobRun, JobSummary};
pub use options::{resolve_options, JobArguments, ResolvedOptions};
pub use pipeline::{run_from_args, run_job};
