//! Streaming aggregation of `station;value` measurement files.
//!
//! The input is read in fixed-size chunks, cut back into lines, grouped into
//! batches and handed through a bounded queue to a fixed pool of workers.
//! Each worker keeps private per-station statistics that are merged once the
//! input is drained, then rendered as `{station=min/mean/max, ...}`.
//!
//! ```no_run
//! # async fn demo() -> Result<(), tljubej_brc::PipelineError> {
//! use tljubej_brc::{Config, Pipeline};
//!
//! let aggregation = Pipeline::new(Config::default())?
//!     .run_path("measurements.txt")
//!     .await?;
//! println!("{}", aggregation.report());
//! # Ok(())
//! # }
//! ```

mod observability;

pub mod chunk;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod reassembler;
pub mod stats;
pub mod worker;

pub use chunk::ChunkSource;
pub use config::Config;
pub use dispatch::{Batch, BatchDispatcher};
pub use error::{ConfigError, PipelineError};
pub use format::{render, Report};
pub use pipeline::{Aggregation, Pipeline, RunReport};
pub use reassembler::{LineBlock, LineReassembler};
pub use stats::{FrozenStore, RunningStat, StatsStore};
pub use worker::{parse_line, AggregationWorker, ParsedRecord};
