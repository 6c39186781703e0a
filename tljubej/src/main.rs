use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tljubej_brc::{Config, Pipeline};
use tokio::{fs::File, io::stdout};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Computes min/mean/max per station of a `station;value` file.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Measurements file, one `station;value` record per line.
    input: PathBuf,

    /// Where to write the result; `-` for stdout.
    #[arg(short, long, default_value = "output.txt")]
    output: PathBuf,

    /// Bytes read per chunk.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Lines per batch handed to a worker.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batches queued before the reader waits.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Aggregation workers [default: available cores].
    #[arg(short, long)]
    workers: Option<usize>,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(workers) = self.workers {
            config = config.with_workers_and_queue(workers);
        }
        if let Some(chunk_size) = self.chunk_size {
            config = config.with_chunk_size(chunk_size);
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(queue_capacity) = self.queue_capacity {
            config = config.with_queue_capacity(queue_capacity);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let pipeline = Pipeline::new(args.config())?.with_cancellation(cancel);
    let aggregation = pipeline
        .run_path(&args.input)
        .await
        .with_context(|| format!("failed to aggregate {}", args.input.display()))?;

    if args.output.as_os_str() == "-" {
        aggregation.report().write_to(&mut stdout()).await?;
    } else {
        let mut file = File::create(&args.output)
            .await
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        aggregation
            .report()
            .write_to(&mut file)
            .await
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Wrote to file '{}'.", args.output.display());
    }

    Ok(())
}
