//! Transform chain compilation and execution.

use serde_json::Value;

use crate::{Error, Result};

use super::crypto::FieldEncryptor;
use super::date::DateConverter;
use super::mask::MaskRule;
use super::TransformSpec;

// ============================================================================
// Field events
// ============================================================================

/// What went wrong (softly) while producing a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEventKind {
    /// A `required` field matched none of its candidate paths.
    RequiredMissing,
    /// No input format matched a `dateFormat` value.
    DateUnparseable,
    /// An `encrypt` transform has no key reference configured.
    EncryptKeyMissing,
    /// The `${VAR}` key reference named an unset environment variable,
    /// or the key material was not 32 bytes of base64.
    EncryptKeyUnresolved,
    /// The cipher itself failed.
    EncryptFailed,
}

impl FieldEventKind {
    /// Whether the orchestrator should log this at error level.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, Self::EncryptKeyUnresolved | Self::EncryptFailed)
    }
}

/// A structured per-field event collected during projection.
///
/// Events are never fatal: the record still produces a value. The
/// orchestrator logs each event and bumps the matching counter.
#[derive(Debug, Clone)]
pub struct FieldEvent {
    /// Dotted output-field path the event belongs to.
    pub field: String,
    /// Event classification.
    pub kind: FieldEventKind,
    /// Human-readable detail.
    pub detail: String,
}

impl FieldEvent {
    pub(crate) fn new(field: &str, kind: FieldEventKind, detail: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            kind,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// Compiled chain
// ============================================================================

/// One validated, executable transform step.
#[derive(Debug)]
enum CompiledTransform {
    ToString,
    DateFormat(DateConverter),
    Encrypt(FieldEncryptor),
    Mask(MaskRule),
}

/// An ordered, compiled transform chain for one field specification.
///
/// Construct via [`TransformChain::compile`]; apply left-to-right with
/// [`TransformChain::apply`].
#[derive(Debug, Default)]
pub struct TransformChain {
    steps: Vec<CompiledTransform>,
}

impl TransformChain {
    /// Compile and validate a list of descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] when a descriptor violates its
    /// invariants (e.g. `dateFormat` without input or output formats).
    pub fn compile(specs: &[TransformSpec]) -> Result<Self> {
        let mut steps = Vec::with_capacity(specs.len());
        for spec in specs {
            steps.push(compile_one(spec)?);
        }
        Ok(Self { steps })
    }

    /// Returns `true` when the chain has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the chain over a field value. `field` names the output field
    /// for event attribution.
    #[must_use]
    pub fn apply(&self, value: Value, field: &str, events: &mut Vec<FieldEvent>) -> Value {
        let mut current = value;
        for step in &self.steps {
            current = match step {
                CompiledTransform::ToString => to_string_value(current),
                CompiledTransform::DateFormat(converter) => converter.apply(current, field, events),
                CompiledTransform::Encrypt(encryptor) => encryptor.apply(current, field, events),
                CompiledTransform::Mask(rule) => rule.apply(current),
            };
        }
        current
    }
}

fn compile_one(spec: &TransformSpec) -> Result<CompiledTransform> {
    match spec {
        TransformSpec::ToString => Ok(CompiledTransform::ToString),
        TransformSpec::DateFormat {
            input_formats,
            output_format,
            timezone,
        } => {
            if input_formats.is_empty() || input_formats.iter().any(String::is_empty) {
                return Err(Error::Mapping(
                    "dateFormat requires non-empty inputFormats".to_string(),
                ));
            }
            if output_format.is_empty() {
                return Err(Error::Mapping(
                    "dateFormat requires a non-empty outputFormat".to_string(),
                ));
            }
            DateConverter::compile(input_formats, output_format, timezone.as_deref())
                .map(CompiledTransform::DateFormat)
        }
        TransformSpec::Encrypt { key } => {
            Ok(CompiledTransform::Encrypt(FieldEncryptor::new(key.clone())))
        }
        TransformSpec::Mask {
            pattern,
            custom_pattern,
        } => MaskRule::compile(pattern.as_deref(), custom_pattern.as_deref())
            .map(CompiledTransform::Mask),
    }
}

// ============================================================================
// toString
// ============================================================================

/// Canonical text coercion.
///
/// Null stays null, arrays recurse element-wise, text is identity,
/// numbers and booleans render in canonical form, anything else is
/// serialized JSON. Idempotent by construction.
#[must_use]
pub fn to_string_value(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Array(items) => Value::Array(items.into_iter().map(to_string_value).collect()),
        Value::String(s) => Value::String(s),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Number(n) => Value::String(n.to_string()),
        other => Value::String(other.to_string()),
    }
}

/// Text form of a scalar for transforms that operate on text
/// (encrypt, mask). Strings pass through unquoted.
#[must_use]
pub(crate) fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
