//! Stream Remap - per-message JSON reshaping engine
//!
//! Reads newline-delimited JSON records on stdin, applies the mapping
//! for the given topic/connector, writes transformed records to stdout.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use stream_remap::cli::Cli;
use stream_remap::config::{Config, MappingSourceKind};
use stream_remap::engine::{Engine, Framing, Outcome, RecordContext};
use stream_remap::mapping::{CompiledRules, MappingStore};
use stream_remap::reload::{ReloadController, ReloadHandle};
use stream_remap::retry::{with_retry, RetryPolicy};
use stream_remap::source::{FileSource, HttpObjectSource, MappingSource};
use stream_remap::stats::EngineStats;
use stream_remap::setup_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(ref location) = cli.mapping {
                config.mapping.location = location.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mapping = %config.mapping.location,
        hot_reload = config.mapping.hot_reload.enabled,
        "Starting stream-remap"
    );

    if let Err(e) = run(&cli, config).await {
        error!("Engine error: {e:#}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

fn build_source(config: &Config) -> stream_remap::Result<Arc<dyn MappingSource>> {
    match config.mapping.source {
        MappingSourceKind::File => Ok(Arc::new(FileSource::new(&config.mapping.location))),
        MappingSourceKind::S3 => Ok(Arc::new(HttpObjectSource::new(
            &config.mapping.remote,
            &config.mapping.location,
            config.mapping.fetch.attempt_timeout,
        )?)),
    }
}

async fn run(cli: &Cli, config: Config) -> anyhow::Result<()> {
    let source = build_source(&config)?;
    let retry = RetryPolicy::new(&config.mapping.fetch.retry);

    let body = tokio::time::timeout(
        config.mapping.fetch.call_timeout,
        with_retry(&retry, "initial-load", || source.fetch_body()),
    )
    .await
    .context("initial mapping load timed out")?
    .context("initial mapping load failed")?;
    let rules = CompiledRules::parse(&body)?;
    info!(
        source = %source.describe(),
        version = ?rules.version(),
        mappings = rules.mapping_count(),
        "Mapping loaded"
    );

    let store = Arc::new(MappingStore::new(rules));
    let stats = Arc::new(EngineStats::new());

    let reload_handle = if config.mapping.hot_reload.enabled {
        let controller = Arc::new(ReloadController::new(
            Arc::clone(&store),
            Arc::clone(&source),
            Arc::clone(&stats),
            retry.clone(),
            config.mapping.fetch.call_timeout,
        ));
        let etag = source.fetch_metadata().await.ok().and_then(|m| m.etag);
        controller.seed(etag, &body);
        Some(ReloadHandle::spawn(
            controller,
            config.mapping.hot_reload.interval,
        ))
    } else {
        None
    };

    let engine = Engine::new(store, stats, config.behavior.clone());
    let framing = if cli.flat {
        Framing::Flat
    } else {
        Framing::Wrapped
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let record = RecordContext {
                        payload: line.as_bytes(),
                        topic: &cli.topic,
                        connector: &cli.connector,
                        partition: 0,
                    };
                    match engine.process(&record, framing) {
                        Ok(Outcome::Transformed(value) | Outcome::PassThrough(value)) => {
                            stdout.write_all(value.to_string().as_bytes()).await?;
                            stdout.write_all(b"\n").await?;
                        }
                        Err(e) => warn!(error = %e, "Record failed, skipping"),
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    stdout.flush().await?;

    if let Some(handle) = reload_handle {
        handle.stop().await;
    }

    let snapshot = engine.stats().snapshot();
    info!(
        transformed = snapshot.records_transformed,
        passed_through = snapshot.records_passed_through,
        parse_failures = snapshot.parse_failures,
        "Stream drained"
    );

    stream_remap::clear_process_caches();
    Ok(())
}
