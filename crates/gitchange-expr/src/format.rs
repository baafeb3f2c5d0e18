//! Canonical string rendering for evaluated values.
//!
//! Numbers follow the rendering of the upstream system this operator
//! interoperates with: integers as plain decimal, floats as the shortest
//! round-trip representation, switching to `d.ddde±XX` scientific form when
//! the decimal exponent falls below -4 or reaches 6. Large REST-sourced
//! numbers (for example Unix-second timestamps with millisecond fractions)
//! therefore render like `1.759433836397e+09`, and that form is part of the
//! output contract.

use serde_json::Value;

use crate::ExprError;

/// Render a scalar value to its canonical string form.
///
/// Arrays and objects are not stringifiable and return a type mismatch.
pub fn to_display_string(value: &Value) -> Result<String, ExprError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Ok(u.to_string())
            } else {
                Ok(format_f64(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Value::Array(_) => Err(ExprError::TypeMismatch {
            expected: "stringifiable value".to_string(),
            found: "array".to_string(),
        }),
        Value::Object(_) => Err(ExprError::TypeMismatch {
            expected: "stringifiable value".to_string(),
            found: "object".to_string(),
        }),
    }
}

/// Render a float with shortest round-trip digits and the documented
/// fixed/scientific cutover (exponent < -4 or >= 6).
pub fn format_f64(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    if f < 0.0 {
        return format!("-{}", format_f64(-f));
    }

    let (digits, exp) = shortest_digits(f);

    if exp < -4 || exp >= 6 {
        let mantissa = if digits.len() == 1 {
            digits.clone()
        } else {
            format!("{}.{}", &digits[..1], &digits[1..])
        };
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else if exp >= 0 {
        let exp = exp as usize;
        if digits.len() > exp + 1 {
            format!("{}.{}", &digits[..=exp], &digits[exp + 1..])
        } else {
            let mut out = digits.clone();
            out.push_str(&"0".repeat(exp + 1 - digits.len()));
            out
        }
    } else {
        let zeros = (-exp - 1) as usize;
        format!("0.{}{}", "0".repeat(zeros), digits)
    }
}

/// Shortest round-trip decimal digits of a positive finite float, together
/// with the decimal exponent (position of the leading digit).
fn shortest_digits(f: f64) -> (String, i32) {
    // {:e} already produces the shortest mantissa that round-trips.
    let sci = format!("{f:e}");
    let (mantissa, exp) = sci
        .split_once('e')
        .expect("LowerExp output always contains an exponent");
    let exp: i32 = exp.parse().expect("LowerExp exponent is an integer");
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let digits = match digits.trim_end_matches('0') {
        "" => "0".to_string(),
        trimmed => trimmed.to_string(),
    };
    (digits, exp)
}
