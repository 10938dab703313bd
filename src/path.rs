//! Path expressions over JSON trees.
//!
//! A path is an ordered sequence of segments: object fields, array
//! indices, the `[*]` wildcard, and `[?(@.field == literal)]` equality
//! filters. Evaluation never fails on absent data — absence is the
//! distinguished *missing* value, `None`, which is not the same thing
//! as an explicit JSON null.
//!
//! Compiled paths are cached process-wide keyed by the original path
//! text; the cache grows monotonically (bounded in practice by the
//! number of distinct paths in the mapping corpus) and is cleared via
//! [`clear_path_cache`] at host teardown.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde_json::Value;

use crate::{Error, Result};

// ============================================================================
// Segment model
// ============================================================================

/// A single segment in a parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key: `foo`.
    Field(String),
    /// Array index: `[0]`.
    Index(usize),
    /// Array wildcard: `[*]`.
    Wildcard,
    /// Predicate filter: `[?(@.a == 'x' && @.b == 'y')]`.
    Filter(Vec<Predicate>),
}

/// One equality predicate inside a filter segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    /// Field name on each array element.
    pub field: String,
    /// Literal to compare against, quotes already stripped.
    pub literal: String,
}

impl Predicate {
    /// Returns `true` when the element's field equals the literal.
    ///
    /// Comparison is stringified equality: `true`/`false` literals
    /// (case-insensitive) compare against booleans, numbers compare via
    /// their canonical decimal rendering, so `age == 42` matches a
    /// numeric 42. No numeric semantics are inferred beyond that.
    #[must_use]
    pub fn matches(&self, element: &Value) -> bool {
        let Some(actual) = element.get(&self.field) else {
            return false;
        };
        literal_eq(actual, &self.literal)
    }
}

fn literal_eq(value: &Value, literal: &str) -> bool {
    match value {
        Value::Bool(b) => literal.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
        Value::String(s) => {
            if literal.eq_ignore_ascii_case("true") || literal.eq_ignore_ascii_case("false") {
                s.eq_ignore_ascii_case(literal)
            } else {
                s == literal
            }
        }
        Value::Number(n) => n.to_string() == literal,
        _ => false,
    }
}

// ============================================================================
// Compiled path
// ============================================================================

/// A parsed, reusable path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPath {
    text: String,
    segments: Vec<Segment>,
}

static PATH_CACHE: OnceLock<DashMap<String, Arc<CompiledPath>>> = OnceLock::new();

fn cache() -> &'static DashMap<String, Arc<CompiledPath>> {
    PATH_CACHE.get_or_init(DashMap::new)
}

/// Drop every cached compiled path. Intended for host teardown.
pub fn clear_path_cache() {
    cache().clear();
}

impl CompiledPath {
    /// Compile a path through the process-wide cache.
    ///
    /// Duplicate concurrent compilations are harmless (last writer
    /// wins); both produce equal values.
    pub fn compile(text: &str) -> Result<Arc<Self>> {
        if let Some(hit) = cache().get(text) {
            return Ok(Arc::clone(&hit));
        }
        let compiled = Arc::new(Self::parse(text)?);
        cache().insert(text.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Parse a path expression without touching the cache.
    ///
    /// The optional `$.` root marker is stripped. Numeric indices are
    /// accepted here; the mapping validator rejects them separately.
    pub fn parse(text: &str) -> Result<Self> {
        let body = text.strip_prefix("$.").unwrap_or(text);
        let segments = parse_segments(text, body)?;
        if segments.is_empty() {
            return Err(Error::path(text, "path has no segments"));
        }
        Ok(Self {
            text: text.to_string(),
            segments,
        })
    }

    /// The original path text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The parsed segments in order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns `true` when any segment is a positional index.
    #[must_use]
    pub fn has_numeric_index(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Index(_)))
    }

    /// Evaluate the path against a tree. `None` means *missing*.
    #[must_use]
    pub fn evaluate(&self, root: &Value) -> Option<Value> {
        eval(root, &self.segments)
    }
}

// ============================================================================
// Parser
// ============================================================================

fn parse_segments(original: &str, body: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => i += 1,
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ']')
                    .map(|p| i + 1 + p)
                    .ok_or_else(|| Error::path(original, "unterminated '['"))?;
                let inner: String = chars[i + 1..close].iter().collect();
                segments.push(parse_bracket(original, &inner)?);
                i = close + 1;
            }
            c if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                segments.push(Segment::Field(chars[start..i].iter().collect()));
            }
            c => {
                return Err(Error::path(original, format!("unexpected character '{c}'")));
            }
        }
    }

    Ok(segments)
}

fn parse_bracket(original: &str, inner: &str) -> Result<Segment> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Some(predicate_body) = inner.strip_prefix("?(").and_then(|s| s.strip_suffix(')')) {
        return parse_predicates(original, predicate_body);
    }
    inner
        .parse::<usize>()
        .map(Segment::Index)
        .map_err(|_| Error::path(original, format!("invalid bracket segment '[{inner}]'")))
}

fn parse_predicates(original: &str, body: &str) -> Result<Segment> {
    let clauses: Vec<&str> = body.split("&&").collect();
    if clauses.len() > 2 {
        return Err(Error::path(original, "filters allow at most two predicates"));
    }

    let mut predicates = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let clause = clause.trim();
        let (lhs, rhs) = clause
            .split_once("==")
            .ok_or_else(|| Error::path(original, format!("predicate '{clause}' is not an equality")))?;
        let field = lhs
            .trim()
            .strip_prefix("@.")
            .ok_or_else(|| Error::path(original, format!("predicate '{clause}' must start with '@.'")))?
            .trim();
        if field.is_empty() || !field.chars().all(is_word_char) {
            return Err(Error::path(original, format!("invalid predicate field '{field}'")));
        }
        let literal = unquote(rhs.trim());
        predicates.push(Predicate {
            field: field.to_string(),
            literal: literal.to_string(),
        });
    }

    Ok(Segment::Filter(predicates))
}

fn unquote(literal: &str) -> &str {
    literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(literal)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ============================================================================
// Evaluation
// ============================================================================

fn eval(node: &Value, segments: &[Segment]) -> Option<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(node.clone());
    };

    // Implicit projection: a field segment applied to an array
    // broadcasts the full remainder (field included) over each element.
    if matches!(segment, Segment::Field(_)) {
        if let Value::Array(items) = node {
            return Some(collect(items, segments));
        }
    }

    match segment {
        Segment::Field(name) => match node {
            Value::Object(map) => map.get(name).and_then(|child| eval(child, rest)),
            _ => None,
        },
        Segment::Index(idx) => match node {
            Value::Array(items) => items.get(*idx).and_then(|child| eval(child, rest)),
            _ => None,
        },
        Segment::Wildcard => match node {
            Value::Array(items) => Some(collect(items, rest)),
            _ => None,
        },
        Segment::Filter(predicates) => match node {
            Value::Array(items) => {
                let retained: Vec<Value> = items
                    .iter()
                    .filter(|el| predicates.iter().all(|p| p.matches(el)))
                    .cloned()
                    .collect();
                eval(&Value::Array(retained), rest)
            }
            _ => None,
        },
    }
}

/// Per-element collection: skip missing and explicit null, flatten one
/// level when the per-element result is itself an array. Exactly one
/// level — broadcast plus wildcard must not nest, and no deeper
/// flattening is performed.
fn collect(items: &[Value], segments: &[Segment]) -> Value {
    let mut out = Vec::new();
    for item in items {
        match eval(item, segments) {
            None | Some(Value::Null) => {}
            Some(Value::Array(inner)) => out.extend(inner),
            Some(v) => out.push(v),
        }
    }
    Value::Array(out)
}

// ============================================================================
// Tests
// ============================================================================
