//! Date reformatting.
//!
//! Mapping documents describe dates in the pattern token language of
//! the wider connector corpus (`yyyy-MM-dd'T'HH:mm:ssXXX` and friends).
//! Patterns are compiled once into chrono format items plus dedicated
//! ISO-offset pieces (chrono cannot render `Z` for a zero offset), and
//! cached process-wide keyed by the pattern text.
//!
//! Parsing tries each input format in order. Per format the value is
//! first parsed as an instant and only then as a calendar date at
//! midnight; the order matters for date-only patterns like
//! `yyyy-MM-dd`, which succeed only on the calendar path.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Offset, TimeZone};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde_json::Value;

use crate::{Error, Result};

use super::pipeline::{FieldEvent, FieldEventKind};

// ============================================================================
// Pattern compilation
// ============================================================================

/// A formatting piece: either a chrono format chunk or an ISO offset
/// rendered by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Chrono(String),
    /// `XXX` (`+02:00`, `Z`) or `X`/`XX` (`+0200`, `Z`).
    IsoOffset { colon: bool },
    /// `Z`: RFC-822 offset, `+0000` even for UTC.
    Rfc822Offset,
}

/// A compiled date pattern, usable for both parsing and formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    text: String,
    pieces: Vec<Piece>,
    parse_format: String,
    has_offset: bool,
    /// Replacement for a trailing `Z` before instant parsing; only the
    /// ISO `X` tokens accept zulu input.
    zulu_substitute: Option<&'static str>,
}

static PATTERN_CACHE: OnceLock<DashMap<String, Arc<DatePattern>>> = OnceLock::new();

fn pattern_cache() -> &'static DashMap<String, Arc<DatePattern>> {
    PATTERN_CACHE.get_or_init(DashMap::new)
}

/// Drop every cached compiled date pattern. Intended for host teardown.
pub fn clear_date_pattern_cache() {
    pattern_cache().clear();
}

impl DatePattern {
    /// Compile a pattern through the process-wide cache.
    pub fn compile(text: &str) -> Result<Arc<Self>> {
        if let Some(hit) = pattern_cache().get(text) {
            return Ok(Arc::clone(&hit));
        }
        let compiled = Arc::new(Self::parse_pattern(text)?);
        pattern_cache().insert(text.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    fn parse_pattern(text: &str) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut chunk = String::new();
        let mut parse_format = String::new();
        let mut has_offset = false;
        let mut zulu_substitute = None;

        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            match c {
                '\'' => {
                    // Quoted literal; '' inside quotes is an escaped quote.
                    i += 1;
                    loop {
                        match chars.get(i) {
                            Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                                push_literal(&mut chunk, &mut parse_format, '\'');
                                i += 2;
                            }
                            Some('\'') => {
                                i += 1;
                                break;
                            }
                            Some(&lit) => {
                                push_literal(&mut chunk, &mut parse_format, lit);
                                i += 1;
                            }
                            None => {
                                return Err(Error::Mapping(format!(
                                    "date pattern '{text}': unterminated quote"
                                )));
                            }
                        }
                    }
                }
                c if c.is_ascii_alphabetic() => {
                    let run_start = i;
                    while i < chars.len() && chars[i] == c {
                        i += 1;
                    }
                    let run = i - run_start;
                    match c {
                        'y' => push_spec(&mut chunk, &mut parse_format, if run == 2 { "%y" } else { "%Y" }),
                        'M' => push_spec(&mut chunk, &mut parse_format, "%m"),
                        'd' => push_spec(&mut chunk, &mut parse_format, "%d"),
                        'H' => push_spec(&mut chunk, &mut parse_format, "%H"),
                        'h' => push_spec(&mut chunk, &mut parse_format, "%I"),
                        'm' => push_spec(&mut chunk, &mut parse_format, "%M"),
                        's' => push_spec(&mut chunk, &mut parse_format, "%S"),
                        'S' => push_spec(&mut chunk, &mut parse_format, "%3f"),
                        'a' => push_spec(&mut chunk, &mut parse_format, "%p"),
                        'X' => {
                            has_offset = true;
                            let colon = run >= 3;
                            zulu_substitute = Some(if colon { "+00:00" } else { "+0000" });
                            parse_format.push_str(if colon { "%:z" } else { "%z" });
                            flush_chunk(&mut pieces, &mut chunk);
                            pieces.push(Piece::IsoOffset { colon });
                        }
                        'Z' => {
                            has_offset = true;
                            parse_format.push_str("%z");
                            flush_chunk(&mut pieces, &mut chunk);
                            pieces.push(Piece::Rfc822Offset);
                        }
                        other => {
                            return Err(Error::Mapping(format!(
                                "date pattern '{text}': unsupported token '{other}'"
                            )));
                        }
                    }
                }
                other => {
                    push_literal(&mut chunk, &mut parse_format, other);
                    i += 1;
                }
            }
        }
        flush_chunk(&mut pieces, &mut chunk);

        Ok(Self {
            text: text.to_string(),
            pieces,
            parse_format,
            has_offset,
            zulu_substitute,
        })
    }

    /// The original pattern text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parse `text` in `zone`: instant first, calendar date second.
    fn parse_in(&self, text: &str, zone: Tz) -> Option<DateTime<Tz>> {
        if self.has_offset {
            let normalized = self.normalize_zulu(text);
            if let Ok(dt) = DateTime::parse_from_str(&normalized, &self.parse_format) {
                return Some(dt.with_timezone(&zone));
            }
        } else if let Ok(naive) = NaiveDateTime::parse_from_str(text, &self.parse_format) {
            return zone.from_local_datetime(&naive).earliest();
        }

        let date = NaiveDate::parse_from_str(text, &self.parse_format).ok()?;
        zone.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).earliest()
    }

    fn normalize_zulu<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        match (self.zulu_substitute, text.strip_suffix('Z')) {
            (Some(substitute), Some(head)) => format!("{head}{substitute}").into(),
            _ => text.into(),
        }
    }

    /// Render an instant with this pattern.
    fn render(&self, dt: &DateTime<Tz>) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Chrono(chunk) => out.push_str(&dt.format(chunk).to_string()),
                Piece::IsoOffset { colon } => {
                    let seconds = dt.offset().fix().local_minus_utc();
                    if seconds == 0 {
                        out.push('Z');
                    } else {
                        out.push_str(&render_offset(seconds, *colon));
                    }
                }
                Piece::Rfc822Offset => {
                    out.push_str(&render_offset(dt.offset().fix().local_minus_utc(), false));
                }
            }
        }
        out
    }
}

fn push_spec(chunk: &mut String, parse_format: &mut String, spec: &str) {
    chunk.push_str(spec);
    parse_format.push_str(spec);
}

fn push_literal(chunk: &mut String, parse_format: &mut String, c: char) {
    if c == '%' {
        chunk.push_str("%%");
        parse_format.push_str("%%");
    } else {
        chunk.push(c);
        parse_format.push(c);
    }
}

fn flush_chunk(pieces: &mut Vec<Piece>, chunk: &mut String) {
    if !chunk.is_empty() {
        pieces.push(Piece::Chrono(std::mem::take(chunk)));
    }
}

fn render_offset(seconds: i32, colon: bool) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let abs = seconds.unsigned_abs();
    let hours = abs / 3600;
    let minutes = (abs % 3600) / 60;
    if colon {
        format!("{sign}{hours:02}:{minutes:02}")
    } else {
        format!("{sign}{hours:02}{minutes:02}")
    }
}

// ============================================================================
// Converter
// ============================================================================

/// A compiled `dateFormat` transform.
#[derive(Debug)]
pub struct DateConverter {
    inputs: Vec<Arc<DatePattern>>,
    output: Arc<DatePattern>,
    zone: Tz,
}

impl DateConverter {
    pub(crate) fn compile(
        input_formats: &[String],
        output_format: &str,
        timezone: Option<&str>,
    ) -> Result<Self> {
        let zone_name = timezone.unwrap_or("UTC");
        let zone: Tz = zone_name
            .parse()
            .map_err(|_| Error::Mapping(format!("dateFormat: unknown timezone '{zone_name}'")))?;

        let inputs = input_formats
            .iter()
            .map(|f| DatePattern::compile(f))
            .collect::<Result<Vec<_>>>()?;
        let output = DatePattern::compile(output_format)?;

        Ok(Self {
            inputs,
            output,
            zone,
        })
    }

    pub(crate) fn apply(&self, value: Value, field: &str, events: &mut Vec<FieldEvent>) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| self.apply(v, field, events))
                    .collect(),
            ),
            Value::String(text) => match self.reformat(&text) {
                Some(out) => Value::String(out),
                None => {
                    events.push(FieldEvent::new(
                        field,
                        FieldEventKind::DateUnparseable,
                        format!("'{text}' matched no input format"),
                    ));
                    Value::Null
                }
            },
            // Non-textual input cannot be a date.
            _ => Value::Null,
        }
    }

    fn reformat(&self, text: &str) -> Option<String> {
        self.inputs
            .iter()
            .find_map(|pattern| pattern.parse_in(text, self.zone))
            .map(|dt| self.output.render(&dt))
    }
}

// ============================================================================
// Tests
// ============================================================================
