//! Output Evaluator - Language-Agnostic Comparison
//!
//! **Core Responsibility:**
//! Decide whether the text a run produced matches the expected value.
//!
//! **Critical Properties:**
//! - Knows nothing about sandboxes, processes or fixtures
//! - Pure function: (actual text, expected value) → pass/fail
//!
//! **Comparison Rules:**
//! 1. If the actual text parses as JSON, compare it structurally with the
//!    expected value. Object key order is irrelevant and integral floats equal
//!    their integer form (`1.0 == 1`).
//! 2. Otherwise compare trimmed text: a string expectation as-is, any other
//!    expectation by its JSON text.
//!
//! **Preserves:**
//! - Case sensitivity
//! - Internal whitespace
//! - Array order

use serde_json::{Number, Value};

/// Whether `actual` satisfies `expected`
pub fn evaluate(actual: &str, expected: &Value) -> bool {
    match serde_json::from_str::<Value>(actual.trim()) {
        Ok(parsed) => {
            if canonicalize(&parsed) == canonicalize(expected) {
                return true;
            }
            // `"42"` rendered by the candidate parses as a number, but a string
            // expectation of "42" should still match on text
            expected.is_string() && text_matches(actual, expected)
        }
        Err(_) => text_matches(actual, expected),
    }
}

fn text_matches(actual: &str, expected: &Value) -> bool {
    actual.trim() == expected_text(expected).trim()
}

fn expected_text(expected: &Value) -> String {
    match expected {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize numbers so that structurally equal values compare equal.
/// `serde_json::Map` is ordered, so object key order already drops out.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(canonical_number(n)),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect()),
        other => other.clone(),
    }
}

fn canonical_number(n: &Number) -> Number {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < 9.0e15 {
                return Number::from(f as i64);
            }
        }
    }
    n.clone()
}
