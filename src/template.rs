//! Output-template compilation and interpretation.
//!
//! A template is a recursive value from the mapping document. Its shape
//! is resolved once, at adoption time, into a tagged sum — plain
//! object, `$array` form, or field-specification leaf — so the
//! per-record walk never re-inspects shapes. Compilation is also where
//! every structural rule is enforced: unparseable paths, numeric
//! indices, empty `paths` lists, unknown `multi` values, and defective
//! transform descriptors all fail adoption.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::path::CompiledPath;
use crate::transform::{FieldEvent, FieldEventKind, TransformChain, TransformSpec};
use crate::{Error, Result};

const ARRAY_KEY: &str = "$array";
const PATHS_KEY: &str = "paths";

// ============================================================================
// Compiled forms
// ============================================================================

/// Multi-value normalization mode of a field specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multi {
    /// Take the first element of an array extract (default).
    #[default]
    First,
    /// Always emit an array; scalars are wrapped.
    Array,
}

/// A compiled field-specification leaf.
#[derive(Debug)]
pub struct FieldSpec {
    paths: Vec<Arc<CompiledPath>>,
    required: bool,
    multi: Multi,
    transforms: TransformChain,
}

/// A compiled output template.
#[derive(Debug)]
pub enum CompiledTemplate {
    /// Nested object: project each entry in declared order.
    Object(Vec<(String, CompiledTemplate)>),
    /// `$array` form: an array of objects built from an array-typed path.
    Array {
        /// Path to the source array.
        path: Arc<CompiledPath>,
        /// Template projected over each element.
        item: Box<CompiledTemplate>,
    },
    /// Field-specification leaf.
    Field(FieldSpec),
}

/// Raw serde shape of a field-specification leaf.
#[derive(Deserialize)]
struct RawFieldSpec {
    paths: Vec<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    multi: Option<String>,
    #[serde(default)]
    transforms: Vec<TransformSpec>,
}

/// Raw serde shape of the `$array` descriptor.
#[derive(Deserialize)]
struct RawArraySpec {
    path: String,
    item: Value,
}

impl CompiledTemplate {
    /// Compile and fully validate a raw template value.
    pub fn compile(template: &Value) -> Result<Self> {
        Self::compile_at(template, "output")
    }

    fn compile_at(template: &Value, at: &str) -> Result<Self> {
        let Value::Object(map) = template else {
            return Err(Error::Mapping(format!(
                "{at}: template nodes must be objects"
            )));
        };

        if map.len() == 1 && map.contains_key(ARRAY_KEY) {
            let raw: RawArraySpec = serde_json::from_value(map[ARRAY_KEY].clone())
                .map_err(|e| Error::Mapping(format!("{at}.$array: {e}")))?;
            let path = compile_template_path(&raw.path, at)?;
            let item = Self::compile_at(&raw.item, &format!("{at}.$array.item"))?;
            return Ok(Self::Array {
                path,
                item: Box::new(item),
            });
        }

        if map.contains_key(PATHS_KEY) {
            return compile_field_spec(template, at).map(Self::Field);
        }

        let mut entries = Vec::with_capacity(map.len());
        for (key, child) in map {
            let child_at = format!("{at}.{key}");
            entries.push((key.clone(), Self::compile_at(child, &child_at)?));
        }
        Ok(Self::Object(entries))
    }

    /// Project an input tree into a fresh output value.
    ///
    /// Deterministic for a fixed `(root, template)` pair apart from the
    /// encrypt transform's nonce. Soft failures land in `events`.
    #[must_use]
    pub fn project(&self, root: &Value, events: &mut Vec<FieldEvent>) -> Value {
        self.project_at(root, "", events)
    }

    fn project_at(&self, root: &Value, at: &str, events: &mut Vec<FieldEvent>) -> Value {
        match self {
            Self::Object(entries) => {
                let mut out = serde_json::Map::with_capacity(entries.len());
                for (key, child) in entries {
                    let child_at = join_path(at, key);
                    out.insert(key.clone(), child.project_at(root, &child_at, events));
                }
                Value::Object(out)
            }
            Self::Array { path, item } => match path.evaluate(root) {
                None | Some(Value::Null) => Value::Array(Vec::new()),
                Some(Value::Array(elements)) => Value::Array(
                    elements
                        .iter()
                        .map(|element| item.project_at(element, at, events))
                        .collect(),
                ),
                // A single object projects as a singleton array.
                Some(single) => Value::Array(vec![item.project_at(&single, at, events)]),
            },
            Self::Field(spec) => spec.resolve(root, at, events),
        }
    }
}

fn join_path(at: &str, key: &str) -> String {
    if at.is_empty() {
        key.to_string()
    } else {
        format!("{at}.{key}")
    }
}

// ============================================================================
// Field-spec compilation
// ============================================================================

fn compile_field_spec(template: &Value, at: &str) -> Result<FieldSpec> {
    let raw: RawFieldSpec = serde_json::from_value(template.clone())
        .map_err(|e| Error::Mapping(format!("{at}: {e}")))?;

    if raw.paths.is_empty() {
        return Err(Error::Mapping(format!(
            "{at}: field specification requires at least one path"
        )));
    }

    let paths = raw
        .paths
        .iter()
        .map(|p| compile_template_path(p, at))
        .collect::<Result<Vec<_>>>()?;

    let multi = match raw.multi.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("first") => Multi::First,
        Some("array") => Multi::Array,
        Some(other) => {
            return Err(Error::Mapping(format!(
                "{at}: multi must be 'first' or 'array', got '{other}'"
            )));
        }
    };

    let transforms = TransformChain::compile(&raw.transforms)
        .map_err(|e| Error::Mapping(format!("{at}: {e}")))?;

    Ok(FieldSpec {
        paths,
        required: raw.required,
        multi,
        transforms,
    })
}

/// Compile a template-declared path and reject positional indices.
fn compile_template_path(text: &str, at: &str) -> Result<Arc<CompiledPath>> {
    let path = CompiledPath::compile(text).map_err(|e| Error::Mapping(format!("{at}: {e}")))?;
    if path.has_numeric_index() {
        return Err(Error::Mapping(format!(
            "{at}: numeric indices are not allowed in mapping paths ('{text}')"
        )));
    }
    Ok(path)
}

// ============================================================================
// Field-spec resolution
// ============================================================================

impl FieldSpec {
    fn resolve(&self, root: &Value, at: &str, events: &mut Vec<FieldEvent>) -> Value {
        // First non-missing, non-null candidate wins.
        let extracted = self.paths.iter().find_map(|path| {
            path.evaluate(root).filter(|v| !v.is_null())
        });

        let normalized = match extracted {
            None => {
                self.report_missing(at, "no candidate path matched", events);
                Value::Null
            }
            Some(value) => self.normalize(value, at, events),
        };

        self.transforms.apply(normalized, at, events)
    }

    fn normalize(&self, value: Value, at: &str, events: &mut Vec<FieldEvent>) -> Value {
        match self.multi {
            Multi::Array => {
                if value.is_array() {
                    value
                } else {
                    Value::Array(vec![value])
                }
            }
            Multi::First => match value {
                Value::Array(items) => match items.into_iter().next() {
                    Some(first) => first,
                    None => {
                        self.report_missing(at, "path matched an empty array", events);
                        Value::Null
                    }
                },
                other => other,
            },
        }
    }

    fn report_missing(&self, at: &str, detail: &str, events: &mut Vec<FieldEvent>) {
        if self.required {
            events.push(FieldEvent::new(at, FieldEventKind::RequiredMissing, detail));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
