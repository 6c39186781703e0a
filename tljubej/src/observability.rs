//! Structured logging for the aggregation pipeline.
//!
//! All events go through `tracing` with target `"brc"` and carry a
//! `component` and an `event` field. The library never installs a
//! subscriber; the binary does.
//!
//! - `component`: pipeline stage (`chunk`, `dispatch`, `worker`, `pipeline`)
//! - `event`: snake_case event name
//! - Per-line events are never logged.

/// Target for all pipeline log events.
pub(crate) const BRC_TARGET: &str = "brc";

/// Info-level event.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "pipeline",
///     event = "run_started",
///     workers = config.workers,
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::BRC_TARGET, $($field)*)
    };
}

macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::BRC_TARGET, $($field)*)
    };
}

macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::BRC_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_warn;
