//! Pattern-based masking of sensitive field values.
//!
//! Pattern names are matched case-insensitively. Numeric patterns
//! (ssn, creditcard, phone) operate on the digits of the input; the
//! original separators are discarded. `custom` carries a
//! `regex|replacement` pair and falls back to `partial` on any defect
//! in its configuration.

use regex::Regex;
use serde_json::Value;

use crate::{Error, Result};

use super::pipeline::coerce_text;

/// A compiled mask transform.
#[derive(Debug, Clone)]
pub enum MaskRule {
    /// `***-**-LAST4`.
    Ssn,
    /// `****-****-****-LAST4`.
    CreditCard,
    /// `F***@DOMAIN`.
    Email,
    /// `***-***-LAST4`.
    Phone,
    /// Initial of each whitespace-separated token.
    Name,
    /// All stars, capped at 16.
    Full,
    /// First and last character kept.
    Partial,
    /// Regex replacement.
    Custom {
        /// Compiled match pattern.
        regex: Regex,
        /// Replacement text.
        replacement: String,
    },
}

impl MaskRule {
    /// Compile a mask descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] for a missing or unknown pattern
    /// name. A defective `custom` configuration (no `|`, invalid
    /// regex, missing pattern text) is not an error: it degrades to
    /// [`MaskRule::Partial`].
    pub fn compile(pattern: Option<&str>, custom_pattern: Option<&str>) -> Result<Self> {
        let Some(pattern) = pattern else {
            return Err(Error::Mapping("mask requires a pattern".to_string()));
        };
        match pattern.to_ascii_lowercase().as_str() {
            "ssn" => Ok(Self::Ssn),
            "creditcard" => Ok(Self::CreditCard),
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            "name" => Ok(Self::Name),
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            "custom" => Ok(compile_custom(custom_pattern)),
            other => Err(Error::Mapping(format!("unknown mask pattern '{other}'"))),
        }
    }

    /// Mask a field value. Null stays null; arrays recurse.
    #[must_use]
    pub fn apply(&self, value: Value) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.apply(v)).collect())
            }
            other => Value::String(self.mask_text(&coerce_text(&other))),
        }
    }

    fn mask_text(&self, text: &str) -> String {
        match self {
            Self::Ssn => mask_ssn(text),
            Self::CreditCard => mask_credit_card(text),
            Self::Email => mask_email(text),
            Self::Phone => mask_phone(text),
            Self::Name => mask_name(text),
            Self::Full => mask_full(text),
            Self::Partial => mask_partial(text),
            Self::Custom { regex, replacement } => {
                regex.replace_all(text, replacement.as_str()).into_owned()
            }
        }
    }
}

fn compile_custom(custom_pattern: Option<&str>) -> MaskRule {
    let Some(raw) = custom_pattern else {
        return MaskRule::Partial;
    };
    let Some((pattern, replacement)) = raw.split_once('|') else {
        return MaskRule::Partial;
    };
    match Regex::new(pattern) {
        Ok(regex) => MaskRule::Custom {
            regex,
            replacement: replacement.to_string(),
        },
        Err(_) => MaskRule::Partial,
    }
}

// ============================================================================
// Pattern rules
// ============================================================================

fn digits(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

fn last4(digits: &str) -> &str {
    &digits[digits.len() - 4..]
}

fn mask_ssn(text: &str) -> String {
    let digits = digits(text);
    if digits.len() >= 4 {
        format!("***-**-{}", last4(&digits))
    } else {
        "****".to_string()
    }
}

fn mask_credit_card(text: &str) -> String {
    let digits = digits(text);
    if digits.len() >= 12 {
        format!("****-****-****-{}", last4(&digits))
    } else if digits.len() >= 4 {
        format!("****-{}", last4(&digits))
    } else {
        "****".to_string()
    }
}

fn mask_email(text: &str) -> String {
    let Some(at) = text.find('@') else {
        return "****@****.***".to_string();
    };
    let (local, rest) = text.split_at(at);
    let mut chars = local.chars();
    match chars.next() {
        Some(first) if chars.next().is_some() => format!("{first}***{rest}"),
        _ => format!("*{rest}"),
    }
}

fn mask_phone(text: &str) -> String {
    let digits = digits(text);
    if digits.len() >= 10 {
        format!("***-***-{}", last4(&digits))
    } else if digits.len() >= 4 {
        format!("***-{}", last4(&digits))
    } else {
        "****".to_string()
    }
}

fn mask_name(text: &str) -> String {
    text.split_whitespace()
        .filter_map(|token| token.chars().next().map(|initial| format!("{initial}***")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn mask_full(text: &str) -> String {
    "*".repeat(text.chars().count().min(16))
}

fn mask_partial(text: &str) -> String {
    let count = text.chars().count();
    if count < 3 {
        return "*".repeat(count);
    }
    let mut chars = text.chars();
    let first = chars.next().unwrap_or('*');
    let last = chars.next_back().unwrap_or('*');
    format!("{first}{}{last}", "*".repeat(count - 2))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rule(pattern: &str) -> MaskRule {
        MaskRule::compile(Some(pattern), None).expect("rule should compile")
    }

    fn mask(pattern: &str, input: &str) -> Value {
        rule(pattern).apply(json!(input))
    }

    // ── ssn ─────────────────────────────────────────────────────────────

    #[test]
    fn ssn_keeps_last_four() {
        assert_eq!(mask("ssn", "123-45-6789"), json!("***-**-6789"));
        assert_eq!(mask("ssn", "123456789"), json!("***-**-6789"));
    }

    #[test]
    fn ssn_too_short_is_fully_starred() {
        assert_eq!(mask("ssn", "123"), json!("****"));
        assert_eq!(mask("ssn", "no digits"), json!("****"));
    }

    #[test]
    fn ssn_pattern_name_is_case_insensitive() {
        assert_eq!(mask("SSN", "123-45-6789"), json!("***-**-6789"));
    }

    // ── creditcard ──────────────────────────────────────────────────────

    #[test]
    fn credit_card_full_number() {
        assert_eq!(
            mask("creditcard", "4111 1111 1111 1234"),
            json!("****-****-****-1234")
        );
    }

    #[test]
    fn credit_card_short_number() {
        assert_eq!(mask("creditcard", "12345678"), json!("****-5678"));
        assert_eq!(mask("creditcard", "12"), json!("****"));
    }

    // ── email ───────────────────────────────────────────────────────────

    #[test]
    fn email_keeps_first_local_char_and_domain() {
        assert_eq!(mask("email", "alice@example.com"), json!("a***@example.com"));
    }

    #[test]
    fn email_single_char_local() {
        assert_eq!(mask("email", "a@example.com"), json!("*@example.com"));
    }

    #[test]
    fn email_without_at_sign() {
        assert_eq!(mask("email", "not-an-email"), json!("****@****.***"));
    }

    // ── phone ───────────────────────────────────────────────────────────

    #[test]
    fn phone_ten_digits() {
        assert_eq!(mask("phone", "(555) 123-4567"), json!("***-***-4567"));
    }

    #[test]
    fn phone_short_number() {
        assert_eq!(mask("phone", "4567"), json!("***-4567"));
        assert_eq!(mask("phone", "12"), json!("****"));
    }

    // ── name ────────────────────────────────────────────────────────────

    #[test]
    fn name_masks_each_token() {
        assert_eq!(mask("name", "Jane Q Doe"), json!("J*** Q*** D***"));
    }

    #[test]
    fn name_empty_input() {
        assert_eq!(mask("name", ""), json!(""));
    }

    // ── full / partial ──────────────────────────────────────────────────

    #[test]
    fn full_stars_are_capped_at_sixteen() {
        assert_eq!(mask("full", "abcd"), json!("****"));
        assert_eq!(
            mask("full", "a very long secret value here"),
            json!("****************")
        );
    }

    #[test]
    fn partial_keeps_ends() {
        assert_eq!(mask("partial", "sensitive"), json!("s*******e"));
    }

    #[test]
    fn partial_short_tokens_fully_starred() {
        assert_eq!(mask("partial", "ab"), json!("**"));
        assert_eq!(mask("partial", "a"), json!("*"));
    }

    // ── custom ──────────────────────────────────────────────────────────

    #[test]
    fn custom_applies_regex_replacement() {
        let rule = MaskRule::compile(Some("custom"), Some(r"\d|#")).unwrap();
        assert_eq!(rule.apply(json!("a1b2c3")), json!("a#b#c#"));
    }

    #[test]
    fn custom_without_separator_falls_back_to_partial() {
        let rule = MaskRule::compile(Some("custom"), Some("no-separator")).unwrap();
        assert_eq!(rule.apply(json!("sensitive")), json!("s*******e"));
    }

    #[test]
    fn custom_invalid_regex_falls_back_to_partial() {
        let rule = MaskRule::compile(Some("custom"), Some("[oops|x")).unwrap();
        assert_eq!(rule.apply(json!("sensitive")), json!("s*******e"));
    }

    #[test]
    fn custom_missing_pattern_falls_back_to_partial() {
        let rule = MaskRule::compile(Some("custom"), None).unwrap();
        assert_eq!(rule.apply(json!("sensitive")), json!("s*******e"));
    }

    // ── validation ──────────────────────────────────────────────────────

    #[test]
    fn unknown_pattern_is_rejected() {
        assert!(MaskRule::compile(Some("rot13"), None).is_err());
    }

    #[test]
    fn missing_pattern_is_rejected() {
        assert!(MaskRule::compile(None, None).is_err());
    }

    // ── value shapes ────────────────────────────────────────────────────

    #[test]
    fn null_passes_through() {
        assert_eq!(rule("ssn").apply(Value::Null), Value::Null);
    }

    #[test]
    fn arrays_mask_element_wise() {
        assert_eq!(
            rule("ssn").apply(json!(["123-45-6789", "987-65-4321"])),
            json!(["***-**-6789", "***-**-4321"])
        );
    }

    #[test]
    fn non_string_scalars_are_coerced_then_masked() {
        assert_eq!(rule("phone").apply(json!(5551234567_u64)), json!("***-***-4567"));
    }
}
