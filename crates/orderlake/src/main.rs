use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use orderlake_core::{pipeline, EtlConfig, JobArguments};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sales order ingestion into the data lake", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ingestion job; job parameters follow as --JOB_NAME, --S3_BUCKET, --S3_KEY
    Run(RunArgs),
    /// Load and print the resolved configuration without touching storage
    ValidateConfig(ConfigArgs),
}

#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// TOML configuration file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Job parameters passed through from the launcher
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    job_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run(args) => handle_run(args).await,
        Command::ValidateConfig(args) => handle_validate_config(args),
    }
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn handle_run(args: RunArgs) -> Result<()> {
    // Argument errors surface before the config file or any credential source is read.
    let arguments =
        JobArguments::from_args(&args.job_args).context("invalid job parameters")?;

    let config = EtlConfig::load(args.config.config.as_deref())
        .context("failed to load job configuration")?;
    let store = config
        .store
        .connect()
        .await
        .context("failed to configure object store")?;

    let committed = pipeline::run_job(store.as_ref(), &config, &arguments)
        .await
        .context("order ingestion job failed")?;

    info!(
        run_id = %committed.record.run_id,
        rows_written = committed.record.summary.rows_written,
        "order ingestion job succeeded"
    );
    Ok(())
}

fn handle_validate_config(args: ConfigArgs) -> Result<()> {
    let config =
        EtlConfig::load(args.config.as_deref()).context("failed to load job configuration")?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
