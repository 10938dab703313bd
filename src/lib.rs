//! Stream Remap Library
//!
//! Per-message JSON reshaping engine for streaming-connector pipelines.
//!
//! # Features
//!
//! - **Path Engine**: field/index/wildcard/filter navigation with array
//!   broadcasting over an in-memory JSON tree
//! - **Template Interpreter**: declarative per-topic output templates
//!   with multi-value normalization and array-of-object construction
//! - **Transform Pipeline**: string coercion, multi-format date
//!   reformatting, authenticated field encryption, pattern masking
//! - **Hot Reload**: mapping documents polled from a file or an
//!   S3-compatible object store, validated before adoption, swapped
//!   atomically with last-known-good semantics
//!
//! The per-record path is CPU-bound and never blocks on reloads; all
//! network I/O lives on the Reload Controller's background task.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod path;
pub mod reload;
pub mod retry;
pub mod source;
pub mod stats;
pub mod template;
pub mod transform;

pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}

/// Clear every process-wide cache (compiled paths, date patterns,
/// ciphers). Intended for host teardown.
pub fn clear_process_caches() {
    path::clear_path_cache();
    transform::date::clear_date_pattern_cache();
    transform::crypto::clear_cipher_cache();
}
