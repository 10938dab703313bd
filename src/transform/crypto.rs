//! Field-level authenticated encryption.
//!
//! The `encrypt` transform coerces a value to text and produces an
//! AES-256-GCM envelope: 12-byte random nonce ‖ ciphertext ‖ 16-byte
//! authentication tag, base64-encoded. Key material is a 32-byte value
//! addressed by the descriptor's key reference — either literal base64
//! or a `${NAME}` environment placeholder resolved at apply time.
//!
//! Key-reference failures never abort the record: a missing reference
//! passes the value through with a warning event, an unresolvable one
//! with an error event. Ciphers are cached process-wide keyed by the
//! resolved key text.

use std::sync::{Arc, OnceLock};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use serde_json::Value;

use crate::{Error, Result};

use super::pipeline::{coerce_text, FieldEvent, FieldEventKind};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

static CIPHER_CACHE: OnceLock<DashMap<String, Arc<Aes256Gcm>>> = OnceLock::new();

fn cipher_cache() -> &'static DashMap<String, Arc<Aes256Gcm>> {
    CIPHER_CACHE.get_or_init(DashMap::new)
}

/// Drop every cached cipher. Intended for host teardown.
pub fn clear_cipher_cache() {
    cipher_cache().clear();
}

// ============================================================================
// Encryptor
// ============================================================================

/// A compiled `encrypt` transform.
#[derive(Debug)]
pub struct FieldEncryptor {
    key_ref: Option<String>,
}

impl FieldEncryptor {
    pub(crate) fn new(key_ref: Option<String>) -> Self {
        Self { key_ref }
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
            other => {
                let Some(key_ref) = &self.key_ref else {
                    events.push(FieldEvent::new(
                        field,
                        FieldEventKind::EncryptKeyMissing,
                        "encrypt transform has no key reference; value passed through",
                    ));
                    return other;
                };
                match cipher_for(key_ref) {
                    Ok(cipher) => match encrypt_with(&cipher, &coerce_text(&other)) {
                        Ok(envelope) => Value::String(envelope),
                        Err(e) => {
                            events.push(FieldEvent::new(
                                field,
                                FieldEventKind::EncryptFailed,
                                e.to_string(),
                            ));
                            other
                        }
                    },
                    Err(reason) => {
                        events.push(FieldEvent::new(
                            field,
                            FieldEventKind::EncryptKeyUnresolved,
                            reason,
                        ));
                        other
                    }
                }
            }
        }
    }
}

// ============================================================================
// Key resolution
// ============================================================================

/// Resolve `${NAME}` placeholders; literals pass through.
fn resolve_key_text(key_ref: &str) -> std::result::Result<String, String> {
    if let Some(name) = key_ref.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(name).map_err(|_| format!("environment variable '{name}' is not set"))
    } else {
        Ok(key_ref.to_string())
    }
}

fn cipher_for(key_ref: &str) -> std::result::Result<Arc<Aes256Gcm>, String> {
    let key_text = resolve_key_text(key_ref)?;
    if let Some(hit) = cipher_cache().get(&key_text) {
        return Ok(Arc::clone(&hit));
    }
    let key_bytes = BASE64
        .decode(&key_text)
        .map_err(|e| format!("key material is not valid base64: {e}"))?;
    if key_bytes.len() != KEY_LEN {
        return Err(format!(
            "key material must be {KEY_LEN} bytes, got {}",
            key_bytes.len()
        ));
    }
    let cipher = Arc::new(
        Aes256Gcm::new_from_slice(&key_bytes).map_err(|e| format!("invalid key: {e}"))?,
    );
    cipher_cache().insert(key_text, Arc::clone(&cipher));
    Ok(cipher)
}

// ============================================================================
// Envelope
// ============================================================================

fn encrypt_with(cipher: &Aes256Gcm, plaintext: &str) -> Result<String> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| Error::Crypto("cipher failure".to_string()))?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(envelope))
}

/// Decrypt an envelope produced by the `encrypt` transform.
///
/// `key_ref` follows the same resolution rules as the transform
/// descriptor (base64 literal or `${NAME}`).
///
/// # Errors
///
/// Returns [`Error::Crypto`] when the key cannot be resolved, the
/// envelope is malformed, or authentication fails.
pub fn decrypt(envelope: &str, key_ref: &str) -> Result<String> {
    let cipher = cipher_for(key_ref).map_err(Error::Crypto)?;
    let bytes = BASE64
        .decode(envelope)
        .map_err(|e| Error::Crypto(format!("envelope is not valid base64: {e}")))?;
    if bytes.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::Crypto("envelope is too short".to_string()));
    }
    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Crypto("authentication failed".to_string()))?;
    String::from_utf8(plaintext).map_err(|e| Error::Crypto(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
