//! Expression evaluation over JSON documents.
//!
//! This crate implements the small expression language used to drive REST
//! integrations: a boolean **condition** deciding whether a response produces
//! output, a **data expression** extracting the interesting part of the
//! response, and an **output format** shaping the final file content. All
//! three evaluate against a parsed JSON document bound as `response`, with
//! `now` (Unix seconds) available to the host functions and, for the output
//! format, the prior stage's result bound as `data`.
//!
//! # Example
//!
//! ```
//! use gitchange_expr::{Env, check_condition, extract_data};
//! use serde_json::json;
//!
//! let env = Env::new(1_700_000_000)
//!     .with_var("response", json!({"status": "success", "value": 24.45}));
//!
//! assert!(check_condition(&env, "response.status == \"success\"").unwrap());
//! assert_eq!(extract_data(&env, "string(response.value)").unwrap(), "24.45");
//! ```
//!
//! Supported forms: field access `a.b`, indexing `a[i]`, equality, ordering
//! and logical operators, string concatenation with `+`, arithmetic, and the
//! host functions `size()`, `string()`, `timestamp()` and `unixtime()`.
//! Evaluation is pure and fuel-bounded.

mod eval;
mod format;
mod lexer;
mod parser;

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;
use thiserror::Error;

pub use eval::{DEFAULT_FUEL, Env};
pub use format::{format_f64, to_display_string};
pub use parser::{BinaryOp, Expr, UnaryOp, compile};

/// Errors produced while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    /// The source text does not lex or parse.
    #[error("compile error: {0}")]
    Compile(String),
    /// Evaluation failed at runtime (unknown field, bad index, overflow,
    /// exhausted budget).
    #[error("eval error: {0}")]
    Eval(String),
    /// A value of the wrong type reached an operator or contract boundary.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
}

/// Evaluate a condition expression.
///
/// The empty string is vacuously true. Any non-boolean result is a type
/// mismatch, not a truthiness conversion.
pub fn check_condition(env: &Env, src: &str) -> Result<bool, ExprError> {
    if src.trim().is_empty() {
        return Ok(true);
    }
    match env.eval(&compile(src)?)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::TypeMismatch {
            expected: "boolean condition".to_string(),
            found: value_kind(&other).to_string(),
        }),
    }
}

/// Evaluate a data-extraction expression.
///
/// The empty string extracts nothing. String results are returned verbatim;
/// anything else is serialized to JSON so structured extractions survive as
/// valid documents.
pub fn extract_data(env: &Env, src: &str) -> Result<String, ExprError> {
    if src.trim().is_empty() {
        return Ok(String::new());
    }
    match env.eval(&compile(src)?)? {
        Value::String(s) => Ok(s),
        other => serde_json::to_string(&other)
            .map_err(|e| ExprError::Eval(format!("failed to serialize result: {e}"))),
    }
}

/// Evaluate an output-format expression with `data` bound to the extracted
/// string (re-parsed as JSON when it parses, left as a string otherwise).
///
/// The empty format passes the data through, prefixed with an RFC 3339
/// timestamp and a comma when `include_timestamp` is set. A non-empty format
/// must produce a stringifiable scalar.
pub fn format_output(
    env: &Env,
    src: &str,
    data: &str,
    include_timestamp: bool,
) -> Result<String, ExprError> {
    if src.trim().is_empty() {
        if include_timestamp {
            let ts = DateTime::from_timestamp(env.now(), 0)
                .ok_or_else(|| ExprError::Eval(format!("clock value {} out of range", env.now())))?
                .to_rfc3339_opts(SecondsFormat::Secs, true);
            return Ok(format!("{ts},{data}"));
        }
        return Ok(data.to_string());
    }

    let bound = match serde_json::from_str::<Value>(data) {
        Ok(parsed) => parsed,
        Err(_) => Value::String(data.to_string()),
    };
    let env = env.clone().with_var("data", bound);
    to_display_string(&env.eval(&compile(src)?)?)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> Env {
        Env::new(1_700_000_000).with_var(
            "response",
            json!({
                "status": "success",
                "data": {
                    "resultType": "scalar",
                    "result": [1759433836.397, "24.450000000004366"]
                }
            }),
        )
    }

    #[test]
    fn empty_condition_is_true() {
        assert!(check_condition(&env(), "").unwrap());
        assert!(check_condition(&env(), "   ").unwrap());
    }

    #[test]
    fn condition_requires_boolean_result() {
        let err = check_condition(&env(), "response.status").unwrap_err();
        assert!(matches!(err, ExprError::TypeMismatch { .. }));
    }

    #[test]
    fn condition_evaluates_against_document() {
        assert!(check_condition(&env(), "response.status == \"success\"").unwrap());
        assert!(!check_condition(&env(), "response.status == \"error\"").unwrap());
    }

    #[test]
    fn empty_data_expression_extracts_nothing() {
        assert_eq!(extract_data(&env(), "").unwrap(), "");
    }

    #[test]
    fn string_extractions_are_not_requoted() {
        assert_eq!(
            extract_data(&env(), "response.data.result[1]").unwrap(),
            "24.450000000004366"
        );
    }

    #[test]
    fn structured_extractions_serialize_to_json() {
        assert_eq!(
            extract_data(&env(), "response.data.result").unwrap(),
            "[1759433836.397,\"24.450000000004366\"]"
        );
    }

    #[test]
    fn empty_format_passes_data_through() {
        assert_eq!(format_output(&env(), "", "payload", false).unwrap(), "payload");
    }

    #[test]
    fn empty_format_with_timestamp_prefix() {
        assert_eq!(
            format_output(&env(), "", "payload", true).unwrap(),
            "2023-11-14T22:13:20Z,payload"
        );
    }

    #[test]
    fn format_binds_parsed_data() {
        assert_eq!(
            format_output(&env(), "string(data[0]) + \",\" + string(data[1])",
                "[1759433836.397,\"24.450000000004366\"]", false)
            .unwrap(),
            "1.759433836397e+09,24.450000000004366"
        );
    }

    #[test]
    fn format_binds_unparseable_data_as_string() {
        assert_eq!(
            format_output(&env(), "data + \"!\"", "not json at all", false).unwrap(),
            "not json at all!"
        );
    }

    #[test]
    fn format_rejects_containers() {
        let err = format_output(&env(), "response.data", "", false).unwrap_err();
        assert!(matches!(err, ExprError::TypeMismatch { .. }));
    }

    #[test]
    fn compile_errors_surface_as_compile() {
        assert!(matches!(
            check_condition(&env(), "response. =="),
            Err(ExprError::Compile(_))
        ));
    }
}
