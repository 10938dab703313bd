//! Per-field value transforms.
//!
//! A field specification may carry an ordered list of transform
//! descriptors; the output of each step feeds the next. Descriptors are
//! deserialized from the mapping document, validated, and compiled into
//! a [`TransformChain`] before any record is interpreted.
//!
//! Four kinds: `toString`, `dateFormat`, `encrypt`, `mask`. Every kind
//! maps null to null and recurses element-wise into arrays. Failures
//! degrade to null or to the pre-transform value with a field event;
//! they never abort the record.

use serde::{Deserialize, Serialize};

pub mod crypto;
pub mod date;
pub mod mask;
pub mod pipeline;

pub use pipeline::{FieldEvent, FieldEventKind, TransformChain};

/// Transform descriptor as declared in the mapping document.
///
/// Tagged on `type`; unknown types are rejected at deserialization,
/// which makes them adoption-time failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransformSpec {
    /// Coerce the value to its canonical text form.
    #[serde(rename = "toString")]
    ToString,

    /// Reparse and reformat a date/time value.
    #[serde(rename = "dateFormat", rename_all = "camelCase")]
    DateFormat {
        /// Input patterns tried in declaration order.
        #[serde(default)]
        input_formats: Vec<String>,
        /// Output pattern.
        #[serde(default)]
        output_format: String,
        /// IANA zone name; `UTC` when absent.
        #[serde(default)]
        timezone: Option<String>,
    },

    /// Authenticated encryption of the stringified value.
    #[serde(rename = "encrypt")]
    Encrypt {
        /// Key reference: base64 literal or `${ENV_VAR}` placeholder.
        #[serde(default)]
        key: Option<String>,
    },

    /// Pattern-based masking of the stringified value.
    #[serde(rename = "mask", rename_all = "camelCase")]
    Mask {
        /// One of ssn, creditcard, email, phone, name, full, partial, custom.
        #[serde(default)]
        pattern: Option<String>,
        /// `regex|replacement` for `pattern: custom`.
        #[serde(default)]
        custom_pattern: Option<String>,
    },
}
