//! End-to-end tests for the record path: mapping adoption, template
//! interpretation, transforms, and framing.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use stream_remap::config::BehaviorConfig;
use stream_remap::engine::{Engine, Framing, Outcome, RecordContext};
use stream_remap::mapping::{CompiledRules, MappingStore};
use stream_remap::stats::EngineStats;
use stream_remap::transform::crypto;

fn engine(doc: Value, behavior: BehaviorConfig) -> Engine {
    let rules = CompiledRules::parse(&doc.to_string()).expect("mapping should validate");
    Engine::new(
        Arc::new(MappingStore::new(rules)),
        Arc::new(EngineStats::new()),
        behavior,
    )
}

fn quiet_behavior() -> BehaviorConfig {
    BehaviorConfig {
        attach_source_metadata: false,
        ..BehaviorConfig::default()
    }
}

fn process(engine: &Engine, topic: &str, payload: &str, framing: Framing) -> Outcome {
    let record = RecordContext {
        payload: payload.as_bytes(),
        topic,
        connector: "",
        partition: 0,
    };
    engine.process(&record, framing).expect("record should process")
}

fn transformed(outcome: Outcome) -> Value {
    match outcome {
        Outcome::Transformed(value) => value,
        Outcome::PassThrough(_) => panic!("expected a transformed record"),
    }
}

// ── Scenario: assessment extraction ─────────────────────────────────────

#[test]
fn assessment_id_is_extracted_under_the_mapping_root() {
    let engine = engine(
        json!({
            "topics": {
                "assessments": {
                    "root": "assessment",
                    "output": {"assessmentId": {"paths": ["$.assessmentId"]}}
                }
            }
        }),
        quiet_behavior(),
    );

    let out = transformed(process(
        &engine,
        "assessments",
        r#"{"assessmentId":"12345","other":"x"}"#,
        Framing::Wrapped,
    ));
    assert_eq!(out, json!({"assessment": {"assessmentId": "12345"}}));
}

// ── Scenario: array broadcast ───────────────────────────────────────────

#[test]
fn field_over_array_broadcasts_into_all_values() {
    let engine = engine(
        json!({
            "topics": {
                "t": {
                    "root": "r",
                    "output": {"values": {"paths": ["items.value"], "multi": "array"}}
                }
            }
        }),
        quiet_behavior(),
    );

    let out = transformed(process(
        &engine,
        "t",
        r#"{"items":[{"value":1},{"value":2},{"value":3}]}"#,
        Framing::Flat,
    ));
    assert_eq!(out, json!({"values": [1, 2, 3]}));
}

// ── Scenario: predicate filter ──────────────────────────────────────────

#[test]
fn filter_selects_the_ssn_identifier() {
    let engine = engine(
        json!({
            "topics": {
                "t": {
                    "root": "r",
                    "output": {"ssn": {"paths": ["identifier[?(@.system=='ssn')].value"]}}
                }
            }
        }),
        quiet_behavior(),
    );

    let out = transformed(process(
        &engine,
        "t",
        r#"{"identifier":[{"system":"mrn","value":"A"},{"system":"ssn","value":"123-45-6789"}]}"#,
        Framing::Flat,
    ));
    // multi defaults to first: the single filtered match, unwrapped.
    assert_eq!(out, json!({"ssn": "123-45-6789"}));
}

// ── Scenario: date reformat ─────────────────────────────────────────────

#[test]
fn date_is_reformatted_into_the_configured_zone() {
    let engine = engine(
        json!({
            "topics": {
                "t": {
                    "root": "r",
                    "output": {
                        "when": {
                            "paths": ["ts"],
                            "transforms": [{
                                "type": "dateFormat",
                                "inputFormats": ["yyyy-MM-dd'T'HH:mm:ss"],
                                "outputFormat": "yyyy-MM-dd'T'HH:mm:ssXXX",
                                "timezone": "UTC"
                            }]
                        }
                    }
                }
            }
        }),
        quiet_behavior(),
    );

    let out = transformed(process(
        &engine,
        "t",
        r#"{"ts":"2026-02-10T12:34:56"}"#,
        Framing::Flat,
    ));
    assert_eq!(out, json!({"when": "2026-02-10T12:34:56Z"}));
}

// ── Scenario: SSN mask ──────────────────────────────────────────────────

#[test]
fn ssn_mask_keeps_the_last_four_digits() {
    let engine = engine(
        json!({
            "topics": {
                "t": {
                    "root": "r",
                    "output": {
                        "ssn": {
                            "paths": ["ssn"],
                            "transforms": [{"type": "mask", "pattern": "ssn"}]
                        }
                    }
                }
            }
        }),
        quiet_behavior(),
    );

    let out = transformed(process(
        &engine,
        "t",
        r#"{"ssn":"123-45-6789"}"#,
        Framing::Flat,
    ));
    assert_eq!(out, json!({"ssn": "***-**-6789"}));
}

// ── Encryption round-trip through the template ──────────────────────────

#[test]
fn encrypted_field_decrypts_back_to_the_source_value() {
    std::env::set_var(
        "ENGINE_TESTS_AES_KEY",
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [7u8; 32]),
    );

    let engine = engine(
        json!({
            "topics": {
                "t": {
                    "root": "r",
                    "output": {
                        "secret": {
                            "paths": ["ssn"],
                            "transforms": [{"type": "encrypt", "key": "${ENGINE_TESTS_AES_KEY}"}]
                        }
                    }
                }
            }
        }),
        quiet_behavior(),
    );

    let out = transformed(process(
        &engine,
        "t",
        r#"{"ssn":"123-45-6789"}"#,
        Framing::Flat,
    ));
    let envelope = out["secret"].as_str().expect("envelope should be text");
    assert_eq!(
        crypto::decrypt(envelope, "${ENGINE_TESTS_AES_KEY}").unwrap(),
        "123-45-6789"
    );
}

// ── Boundary behaviors ──────────────────────────────────────────────────

#[test]
fn required_field_over_empty_filter_match_emits_null() {
    let engine = engine(
        json!({
            "topics": {
                "t": {
                    "root": "r",
                    "output": {
                        "v": {"paths": ["items[?(@.k=='none')].v"], "required": true}
                    }
                }
            }
        }),
        quiet_behavior(),
    );

    let out = transformed(process(
        &engine,
        "t",
        r#"{"items":[{"k":"other","v":1}]}"#,
        Framing::Flat,
    ));
    assert_eq!(out, json!({"v": null}));
    assert_eq!(engine.stats().snapshot().required_field_misses, 1);
}

#[test]
fn scalar_input_with_object_paths_yields_nulls_not_errors() {
    let engine = engine(
        json!({
            "topics": {"t": {"root": "r", "output": {"id": {"paths": ["deep.field"]}}}}
        }),
        quiet_behavior(),
    );

    let out = transformed(process(&engine, "t", "42", Framing::Flat));
    assert_eq!(out, json!({"id": null}));
}

#[test]
fn unmapped_topic_passes_the_record_through_unchanged() {
    let engine = engine(
        json!({
            "topics": {"mapped": {"root": "r", "output": {"id": {"paths": ["id"]}}}}
        }),
        quiet_behavior(),
    );

    let outcome = process(&engine, "unmapped", r#"{"id":1,"rest":[true]}"#, Framing::Wrapped);
    assert_eq!(outcome, Outcome::PassThrough(json!({"id": 1, "rest": [true]})));
}

// ── Determinism / idempotence ───────────────────────────────────────────

#[test]
fn projection_is_deterministic_for_a_fixed_input() {
    let doc = json!({
        "topics": {
            "t": {
                "root": "r",
                "output": {
                    "a": {"paths": ["x.y"]},
                    "lines": {
                        "$array": {
                            "path": "rows",
                            "item": {"v": {"paths": ["v"], "transforms": [{"type": "toString"}]}}
                        }
                    }
                }
            }
        }
    });
    let payload = r#"{"x":{"y":9},"rows":[{"v":1},{"v":2}]}"#;

    let first = transformed(process(
        &engine(doc.clone(), quiet_behavior()),
        "t",
        payload,
        Framing::Wrapped,
    ));
    let second = transformed(process(
        &engine(doc, quiet_behavior()),
        "t",
        payload,
        Framing::Wrapped,
    ));
    assert_eq!(first, second);
}

#[test]
fn to_string_applied_twice_equals_once() {
    let doc_once = json!({
        "topics": {
            "t": {
                "root": "r",
                "output": {"v": {"paths": ["v"], "transforms": [{"type": "toString"}]}}
            }
        }
    });
    let doc_twice = json!({
        "topics": {
            "t": {
                "root": "r",
                "output": {
                    "v": {
                        "paths": ["v"],
                        "transforms": [{"type": "toString"}, {"type": "toString"}]
                    }
                }
            }
        }
    });
    let payload = r#"{"v":[1,2.5,true,"x",null]}"#;

    let once = transformed(process(
        &engine(doc_once, quiet_behavior()),
        "t",
        payload,
        Framing::Flat,
    ));
    let twice = transformed(process(
        &engine(doc_twice, quiet_behavior()),
        "t",
        payload,
        Framing::Flat,
    ));
    assert_eq!(once, twice);
}

// ── Template key order ──────────────────────────────────────────────────

#[test]
fn output_keys_follow_template_declaration_order() {
    let engine = engine(
        json!({
            "topics": {
                "t": {
                    "root": "r",
                    "output": {
                        "zulu": {"paths": ["a"]},
                        "mike": {"paths": ["b"]},
                        "alpha": {"paths": ["c"]}
                    }
                }
            }
        }),
        quiet_behavior(),
    );

    let out = transformed(process(
        &engine,
        "t",
        r#"{"a":1,"b":2,"c":3}"#,
        Framing::Flat,
    ));
    let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
    assert_eq!(keys, ["zulu", "mike", "alpha"]);
}

// ── Shipped sample mapping ──────────────────────────────────────────────

#[test]
fn shipped_sample_mapping_validates_and_projects() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/mappings/topic-mappings.json");
    let body = std::fs::read_to_string(path).expect("sample mapping should exist");
    let rules = CompiledRules::parse(&body).expect("sample mapping should validate");

    let engine = Engine::new(
        Arc::new(MappingStore::new(rules)),
        Arc::new(EngineStats::new()),
        quiet_behavior(),
    );
    let payload = r#"{
        "id": "p-1",
        "identifier": [{"system": "ssn", "value": "123-45-6789"}],
        "meta": {"lastUpdated": "2026-02-10T12:34:56"},
        "telecom": [{"system": "phone", "value": "555-0100"}]
    }"#;

    let out = transformed(process(&engine, "patient-events", payload, Framing::Wrapped));
    assert_eq!(
        out,
        json!({
            "patient": {
                "patientId": "p-1",
                "ssn": "***-**-6789",
                "updatedAt": "2026-02-10T12:34:56Z",
                "contacts": [{"kind": "phone", "value": "555-0100"}]
            }
        })
    );
}
