//! Command-line front end for ncmconv.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use ncmconv::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ncmconv")]
#[command(about = "Convert NCM containers to MP3 through a remote decoding service")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// JSON config file
    #[arg(long, global = true, env = "NCMCONV_CONFIG")]
    config: Option<PathBuf>,

    /// Staging directory (overrides config)
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one or more local .ncm files
    Convert {
        /// Files to convert
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Conversion endpoint (overrides config)
        #[arg(long)]
        endpoint: Option<String>,
        /// Request timeout in seconds (overrides config)
        #[arg(long)]
        timeout: Option<f64>,
        /// Maximum conversions in flight
        #[arg(long, default_value_t = 4)]
        jobs: usize,
    },
    /// Remove staged sources and partial outputs left by failed conversions
    Sweep {
        /// Minimum age in seconds (default: stale_after_seconds from config)
        #[arg(long)]
        older_than: Option<u64>,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.global.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(&cli.global.log_level, format).context("failed to initialise logging")?;

    let config = load_config(&cli.global)?;

    match cli.command {
        Commands::Convert {
            files,
            endpoint,
            timeout,
            jobs,
        } => {
            let mut config = config;
            if let Some(endpoint) = endpoint {
                config = config.with_endpoint(endpoint);
            }
            if let Some(timeout) = timeout {
                config = config.with_timeout(timeout);
            }
            convert(&config, files, jobs).await
        }
        Commands::Sweep { older_than } => sweep(config, older_than).await,
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(args: &GlobalArgs) -> Result<ConverterConfig> {
    let config = match &args.config {
        Some(path) => ConverterConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ConverterConfig::new(),
    };
    let mut config = config
        .apply_env()
        .context("invalid NCMCONV_* environment override")?;
    if let Some(dir) = &args.staging_dir {
        config = config.with_staging_dir(dir.clone());
    }
    Ok(config)
}

async fn convert(config: &ConverterConfig, files: Vec<PathBuf>, jobs: usize) -> Result<()> {
    let service = Arc::new(ConversionService::from_config(config).context("invalid configuration")?);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, abandoning in-flight conversions");
            on_interrupt.cancel("interrupted");
        }
    });

    let total = files.len();
    let reports: Vec<(PathBuf, ConversionReport)> = stream::iter(files)
        .map(|path| {
            let service = Arc::clone(&service);
            let cancel = cancel.clone();
            async move {
                let report = service.convert_file_with_cancel(&path, &cancel).await;
                (path, report)
            }
        })
        .buffer_unordered(jobs.max(1))
        .collect()
        .await;

    let mut failed = 0;
    for (path, report) in &reports {
        if report.success {
            let location = report
                .file_name
                .as_ref()
                .map(|name| service.staging().dir().join(name));
            match location {
                Some(location) => println!("ok    {} -> {}", path.display(), location.display()),
                None => println!("ok    {}", path.display()),
            }
        } else {
            failed += 1;
            println!("fail  {}: {}", path.display(), report.message);
        }
    }

    if failed > 0 {
        bail!("{failed} of {total} conversions failed");
    }
    Ok(())
}

async fn sweep(config: ConverterConfig, older_than: Option<u64>) -> Result<()> {
    let max_age = older_than.map_or_else(|| config.stale_after(), Duration::from_secs);
    let staging = StagingArea::new(&config);
    let removed = staging
        .sweep_stale(max_age)
        .await
        .with_context(|| format!("failed to sweep {}", staging.dir().display()))?;
    println!("removed {removed} stale file(s) from {}", staging.dir().display());
    Ok(())
}
