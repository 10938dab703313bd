//! Mapping rules: parse, validate, hold, and atomically swap.
//!
//! A mapping document declares topic mappings keyed by topic name
//! and/or connector name. Adoption is all-or-nothing: the document is
//! parsed and every template fully compiled before the store swaps; any
//! defect leaves the current rules untouched.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use crate::template::CompiledTemplate;
use crate::{Error, Result};

// ============================================================================
// Raw document shape
// ============================================================================

#[derive(Deserialize)]
struct RawRules {
    #[serde(default)]
    version: Option<i64>,
    #[serde(default)]
    topics: serde_json::Map<String, Value>,
    #[serde(default)]
    connectors: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct RawTopicMapping {
    root: String,
    output: Value,
}

// ============================================================================
// Compiled rules
// ============================================================================

/// One validated topic mapping: wrapper key plus compiled template.
#[derive(Debug)]
pub struct CompiledMapping {
    /// Key the projected object is wrapped under.
    pub root: String,
    /// Compiled output template.
    pub template: CompiledTemplate,
}

/// A fully validated, immutable set of mapping rules.
#[derive(Debug)]
pub struct CompiledRules {
    version: Option<i64>,
    topics: HashMap<String, Arc<CompiledMapping>>,
    connectors: HashMap<String, Arc<CompiledMapping>>,
}

impl CompiledRules {
    /// Parse and validate a mapping document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] naming the offending section, topic or
    /// connector, and field when any invariant is violated.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawRules = serde_json::from_str(text)
            .map_err(|e| Error::Mapping(format!("mapping document is not valid JSON: {e}")))?;

        if raw.topics.is_empty() && raw.connectors.is_empty() {
            return Err(Error::Mapping(
                "mapping document must declare at least one topic or connector".to_string(),
            ));
        }

        Ok(Self {
            version: raw.version,
            topics: compile_section(&raw.topics, "topics")?,
            connectors: compile_section(&raw.connectors, "connectors")?,
        })
    }

    /// Declared document version, if any.
    #[must_use]
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Number of declared topic plus connector mappings.
    #[must_use]
    pub fn mapping_count(&self) -> usize {
        self.topics.len() + self.connectors.len()
    }

    /// Look up the mapping for a record.
    ///
    /// Precedence: a non-empty connector name in `connectors`, then the
    /// topic in `topics`, then miss.
    #[must_use]
    pub fn lookup(&self, connector: &str, topic: &str) -> Option<Arc<CompiledMapping>> {
        if !connector.is_empty() {
            if let Some(mapping) = self.connectors.get(connector) {
                return Some(Arc::clone(mapping));
            }
        }
        self.topics.get(topic).map(Arc::clone)
    }
}

fn compile_section(
    section: &serde_json::Map<String, Value>,
    section_name: &str,
) -> Result<HashMap<String, Arc<CompiledMapping>>> {
    let mut compiled = HashMap::with_capacity(section.len());
    for (name, raw) in section {
        let at = format!("{section_name}.{name}");
        let mapping: RawTopicMapping = serde_json::from_value(raw.clone())
            .map_err(|e| Error::Mapping(format!("{at}: {e}")))?;
        if mapping.root.trim().is_empty() {
            return Err(Error::Mapping(format!("{at}: root must be non-empty")));
        }
        let template = CompiledTemplate::compile(&mapping.output)
            .map_err(|e| Error::Mapping(format!("{at}: {e}")))?;
        compiled.insert(
            name.clone(),
            Arc::new(CompiledMapping {
                root: mapping.root,
                template,
            }),
        );
    }
    Ok(compiled)
}

// ============================================================================
// Store
// ============================================================================

/// Holds the current rules behind an atomically swappable reference.
///
/// Readers take a snapshot (`Arc` clone under a read lock) once per
/// record; the Reload Controller is the single writer and swaps the
/// whole `Arc` under a write lock, so readers are never blocked for
/// more than a pointer swap.
pub struct MappingStore {
    inner: RwLock<Arc<CompiledRules>>,
}

impl MappingStore {
    /// Create a store seeded with validated rules.
    #[must_use]
    pub fn new(rules: CompiledRules) -> Self {
        Self {
            inner: RwLock::new(Arc::new(rules)),
        }
    }

    /// Snapshot the current rules. Use one snapshot per record.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CompiledRules> {
        Arc::clone(&self.inner.read())
    }

    /// Parse, validate, and atomically adopt a mapping document.
    ///
    /// On any failure the current rules are unchanged; no intermediate
    /// state is ever visible to readers.
    pub fn try_adopt(&self, text: &str) -> Result<Arc<CompiledRules>> {
        let rules = Arc::new(CompiledRules::parse(text)?);
        *self.inner.write() = Arc::clone(&rules);
        Ok(rules)
    }
}

// ============================================================================
// Tests
// ============================================================================
