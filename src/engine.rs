//! Record orchestration.
//!
//! Thin glue over the core: parse the payload, look the mapping up by
//! connector name (topic as fallback), drive the template interpreter,
//! frame the output, and account for everything that happened. One
//! rules snapshot is taken per record and used throughout.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::config::BehaviorConfig;
use crate::mapping::MappingStore;
use crate::stats::EngineStats;
use crate::transform::{FieldEvent, FieldEventKind};
use crate::{Error, Result};

/// Key of the metadata side-channel in wrapped framing.
const METADATA_KEY: &str = "metadata";
/// Key of the raw-payload side-channel in wrapped framing.
const RAW_PAYLOAD_KEY: &str = "rawPayload";

// ============================================================================
// Inputs and outputs
// ============================================================================

/// Per-record context handed in by the host.
#[derive(Debug, Clone, Copy)]
pub struct RecordContext<'a> {
    /// Raw payload bytes.
    pub payload: &'a [u8],
    /// Source topic.
    pub topic: &'a str,
    /// Connector name; empty when unknown.
    pub connector: &'a str,
    /// Source partition.
    pub partition: i32,
}

/// How the projected object is framed at the top level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Place the projection under the mapping's `root` key, with
    /// optional metadata and raw-payload side-channels.
    #[default]
    Wrapped,
    /// Emit the projection directly; side-channels suppressed.
    Flat,
}

/// Outcome of processing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The record was projected through a mapping.
    Transformed(Value),
    /// No mapping matched; the parsed input is returned unchanged.
    PassThrough(Value),
}

// ============================================================================
// Engine
// ============================================================================

/// The per-record orchestrator.
pub struct Engine {
    store: Arc<MappingStore>,
    stats: Arc<EngineStats>,
    behavior: BehaviorConfig,
}

impl Engine {
    /// Create an engine over a mapping store.
    #[must_use]
    pub fn new(store: Arc<MappingStore>, stats: Arc<EngineStats>, behavior: BehaviorConfig) -> Self {
        Self {
            store,
            stats,
            behavior,
        }
    }

    /// Shared statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Process one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordParse`] when the payload is not valid
    /// JSON; the host may route such records to a dead-letter sink.
    /// Mapping misses are not errors — they pass through.
    pub fn process(&self, ctx: &RecordContext<'_>, framing: Framing) -> Result<Outcome> {
        let input: Value = serde_json::from_slice(ctx.payload).map_err(|e| {
            self.stats.record_parse_failure();
            Error::RecordParse(e.to_string())
        })?;

        // One snapshot per record; later swaps do not affect us.
        let rules = self.store.snapshot();
        let Some(mapping) = rules.lookup(ctx.connector, ctx.topic) else {
            self.stats.record_mapping_miss(ctx.topic);
            if self.behavior.fail_on_missing_mapping {
                error!(
                    topic = ctx.topic,
                    connector = ctx.connector,
                    "No mapping found, passing record through"
                );
            } else {
                debug!(
                    topic = ctx.topic,
                    connector = ctx.connector,
                    "No mapping found, passing record through"
                );
            }
            return Ok(Outcome::PassThrough(input));
        };

        let mut events = Vec::new();
        let projected = mapping.template.project(&input, &mut events);
        self.account_events(ctx, &events);

        let output = match framing {
            Framing::Flat => projected,
            Framing::Wrapped => {
                let mut out = serde_json::Map::new();
                out.insert(mapping.root.clone(), projected);
                if self.behavior.attach_source_metadata {
                    out.insert(
                        METADATA_KEY.to_string(),
                        json!({"topic": ctx.topic, "partition": ctx.partition}),
                    );
                }
                if self.behavior.store_raw_payload {
                    out.insert(RAW_PAYLOAD_KEY.to_string(), input);
                }
                Value::Object(out)
            }
        };

        self.stats.record_transformed();
        Ok(Outcome::Transformed(output))
    }

    fn account_events(&self, ctx: &RecordContext<'_>, events: &[FieldEvent]) {
        for event in events {
            match event.kind {
                FieldEventKind::RequiredMissing => self.stats.record_required_miss(),
                _ => self.stats.record_transform_failure(),
            }
            if event.kind.is_error() {
                error!(
                    topic = ctx.topic,
                    field = %event.field,
                    detail = %event.detail,
                    "Field transform failed"
                );
            } else {
                warn!(
                    topic = ctx.topic,
                    field = %event.field,
                    detail = %event.detail,
                    "Field produced a degraded value"
                );
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
