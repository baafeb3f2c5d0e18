use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;

use crate::ExprError;
use crate::format::to_display_string;
use crate::parser::{BinaryOp, Expr, UnaryOp};

/// Default evaluation budget. One unit is consumed per visited node, so this
/// bounds runaway expressions deterministically.
pub const DEFAULT_FUEL: u64 = 100_000;

/// Immutable evaluation environment: variable bindings plus the clock value
/// every host function derives time from. Evaluating the same expression
/// against the same environment always yields the same result.
#[derive(Debug, Clone)]
pub struct Env {
    vars: BTreeMap<String, Value>,
    now: i64,
    fuel: u64,
}

impl Env {
    /// Create an environment with `now` (Unix seconds) bound both for the
    /// host functions and as the `now` variable.
    pub fn new(now: i64) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("now".to_string(), Value::from(now));
        Self {
            vars,
            now,
            fuel: DEFAULT_FUEL,
        }
    }

    /// Bind a variable, replacing any previous binding of the same name.
    #[must_use]
    pub fn with_var(mut self, name: &str, value: Value) -> Self {
        self.vars.insert(name.to_string(), value);
        self
    }

    /// Override the evaluation budget.
    #[must_use]
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn now(&self) -> i64 {
        self.now
    }

    /// Evaluate a compiled expression.
    pub fn eval(&self, expr: &Expr) -> Result<Value, ExprError> {
        let mut fuel = self.fuel;
        self.eval_inner(expr, &mut fuel)
    }

    fn eval_inner(&self, expr: &Expr, fuel: &mut u64) -> Result<Value, ExprError> {
        if *fuel == 0 {
            return Err(ExprError::Eval(
                "expression evaluation budget exhausted".to_string(),
            ));
        }
        *fuel -= 1;

        match expr {
            Expr::Int(n) => Ok(Value::from(*n)),
            Expr::Float(f) => float_value(*f),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::Eval(format!("unknown variable `{name}`"))),
            Expr::Member(base, field) => {
                let base = self.eval_inner(base, fuel)?;
                match base {
                    Value::Object(map) => map
                        .get(field)
                        .cloned()
                        .ok_or_else(|| ExprError::Eval(format!("unknown field `{field}`"))),
                    other => Err(ExprError::TypeMismatch {
                        expected: "object".to_string(),
                        found: type_name(&other).to_string(),
                    }),
                }
            }
            Expr::Index(base, index) => {
                let base = self.eval_inner(base, fuel)?;
                let index = self.eval_inner(index, fuel)?;
                self.index(&base, &index)
            }
            Expr::Call(name, args) => self.call(name, args, fuel),
            Expr::Unary(op, operand) => {
                let operand = self.eval_inner(operand, fuel)?;
                match op {
                    UnaryOp::Not => match operand {
                        Value::Bool(b) => Ok(Value::Bool(!b)),
                        other => Err(ExprError::TypeMismatch {
                            expected: "boolean".to_string(),
                            found: type_name(&other).to_string(),
                        }),
                    },
                    UnaryOp::Neg => match as_num(&operand) {
                        Some(Num::Int(i)) => i
                            .checked_neg()
                            .map(Value::from)
                            .ok_or_else(|| ExprError::Eval("integer overflow".to_string())),
                        Some(Num::Float(f)) => float_value(-f),
                        None => Err(ExprError::TypeMismatch {
                            expected: "number".to_string(),
                            found: type_name(&operand).to_string(),
                        }),
                    },
                }
            }
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, fuel),
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        fuel: &mut u64,
    ) -> Result<Value, ExprError> {
        // && and || short-circuit and must not evaluate the right side.
        if let BinaryOp::And | BinaryOp::Or = op {
            let lhs = self.expect_bool(lhs, fuel)?;
            return match (op, lhs) {
                (BinaryOp::And, false) => Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(self.expect_bool(rhs, fuel)?)),
            };
        }

        let lhs = self.eval_inner(lhs, fuel)?;
        let rhs = self.eval_inner(rhs, fuel)?;

        match op {
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ord = compare(&lhs, &rhs)?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }))
            }
            BinaryOp::Add => add(&lhs, &rhs),
            BinaryOp::Sub => arith(&lhs, &rhs, "-", i64::checked_sub, |a, b| a - b),
            BinaryOp::Mul => arith(&lhs, &rhs, "*", i64::checked_mul, |a, b| a * b),
            BinaryOp::Div => divide(&lhs, &rhs),
            BinaryOp::Rem => remainder(&lhs, &rhs),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn expect_bool(&self, expr: &Expr, fuel: &mut u64) -> Result<bool, ExprError> {
        match self.eval_inner(expr, fuel)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExprError::TypeMismatch {
                expected: "boolean".to_string(),
                found: type_name(&other).to_string(),
            }),
        }
    }

    fn index(&self, base: &Value, index: &Value) -> Result<Value, ExprError> {
        match (base, index) {
            (Value::Array(items), idx) => {
                let i = idx.as_i64().ok_or_else(|| ExprError::TypeMismatch {
                    expected: "integer index".to_string(),
                    found: type_name(idx).to_string(),
                })?;
                if i < 0 {
                    return Err(ExprError::Eval(format!("negative array index {i}")));
                }
                items
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| ExprError::Eval(format!("array index {i} out of bounds")))
            }
            (Value::Object(map), Value::String(key)) => map
                .get(key)
                .cloned()
                .ok_or_else(|| ExprError::Eval(format!("unknown field `{key}`"))),
            (other, _) => Err(ExprError::TypeMismatch {
                expected: "array or object".to_string(),
                found: type_name(other).to_string(),
            }),
        }
    }

    fn call(&self, name: &str, args: &[Expr], fuel: &mut u64) -> Result<Value, ExprError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_inner(arg, fuel)?);
        }

        match (name, values.as_slice()) {
            ("size", [value]) => {
                let size = match value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    other => {
                        return Err(ExprError::TypeMismatch {
                            expected: "string, array, or object".to_string(),
                            found: type_name(other).to_string(),
                        });
                    }
                };
                Ok(Value::from(size as i64))
            }
            ("string", [value]) => Ok(Value::String(to_display_string(value)?)),
            ("timestamp", []) => {
                let ts = DateTime::from_timestamp(self.now, 0)
                    .ok_or_else(|| ExprError::Eval(format!("clock value {} out of range", self.now)))?;
                Ok(Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true)))
            }
            ("unixtime", []) => Ok(Value::from(self.now)),
            ("size" | "string", _) => Err(ExprError::Eval(format!(
                "{name}() takes exactly one argument"
            ))),
            ("timestamp" | "unixtime", _) => {
                Err(ExprError::Eval(format!("{name}() takes no arguments")))
            }
            _ => Err(ExprError::Eval(format!("unknown function `{name}`"))),
        }
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Num::Int(i))
            } else {
                n.as_f64().map(Num::Float)
            }
        }
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn float_value(f: f64) -> Result<Value, ExprError> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ExprError::Eval("arithmetic produced a non-finite number".to_string()))
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (as_num(lhs), as_num(rhs)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => to_f64(a) == to_f64(b),
        _ => lhs == rhs,
    }
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, ExprError> {
    if let (Some(a), Some(b)) = (as_num(lhs), as_num(rhs)) {
        if let (Num::Int(a), Num::Int(b)) = (&a, &b) {
            return Ok(a.cmp(b));
        }
        return to_f64(a)
            .partial_cmp(&to_f64(b))
            .ok_or_else(|| ExprError::Eval("numbers are not comparable".to_string()));
    }
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return Ok(a.cmp(b));
    }
    Err(ExprError::TypeMismatch {
        expected: "two numbers or two strings".to_string(),
        found: format!("{} and {}", type_name(lhs), type_name(rhs)),
    })
}

fn add(lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return Ok(Value::String(format!("{a}{b}")));
    }
    arith(lhs, rhs, "+", i64::checked_add, |a, b| a + b)
}

fn arith(
    lhs: &Value,
    rhs: &Value,
    op: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, ExprError> {
    match (as_num(lhs), as_num(rhs)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => int_op(a, b)
            .map(Value::from)
            .ok_or_else(|| ExprError::Eval(format!("integer overflow in `{op}`"))),
        (Some(a), Some(b)) => float_value(float_op(to_f64(a), to_f64(b))),
        _ => Err(ExprError::TypeMismatch {
            expected: format!("numeric operands for `{op}`"),
            found: format!("{} and {}", type_name(lhs), type_name(rhs)),
        }),
    }
}

fn divide(lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    match (as_num(lhs), as_num(rhs)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => {
            if b == 0 {
                return Err(ExprError::Eval("division by zero".to_string()));
            }
            a.checked_div(b)
                .map(Value::from)
                .ok_or_else(|| ExprError::Eval("integer overflow in `/`".to_string()))
        }
        (Some(a), Some(b)) => float_value(to_f64(a) / to_f64(b)),
        _ => Err(ExprError::TypeMismatch {
            expected: "numeric operands for `/`".to_string(),
            found: format!("{} and {}", type_name(lhs), type_name(rhs)),
        }),
    }
}

fn remainder(lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    match (as_num(lhs), as_num(rhs)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => {
            if b == 0 {
                return Err(ExprError::Eval("remainder by zero".to_string()));
            }
            Ok(Value::from(a.wrapping_rem(b)))
        }
        _ => Err(ExprError::TypeMismatch {
            expected: "integer operands for `%`".to_string(),
            found: format!("{} and {}", type_name(lhs), type_name(rhs)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile;
    use serde_json::json;

    fn prometheus_doc() -> Value {
        json!({
            "status": "success",
            "data": {
                "resultType": "scalar",
                "result": [1759433836.397, "24.450000000004366"]
            }
        })
    }

    fn env() -> Env {
        Env::new(1_700_000_000).with_var("response", prometheus_doc())
    }

    fn eval(src: &str) -> Value {
        env().eval(&compile(src).expect("compile")).expect("eval")
    }

    #[test]
    fn member_access_yields_field() {
        assert_eq!(eval("response.status"), json!("success"));
    }

    #[test]
    fn string_cast_of_array_element() {
        assert_eq!(
            eval("string(response.data.result[1])"),
            json!("24.450000000004366")
        );
    }

    #[test]
    fn timestamp_and_value_concatenation() {
        assert_eq!(
            eval("string(response.data.result[0]) + \",\" + string(response.data.result[1])"),
            json!("1.759433836397e+09,24.450000000004366")
        );
    }

    #[test]
    fn equality_across_numeric_representations() {
        assert_eq!(eval("1 == 1.0"), json!(true));
        assert_eq!(eval("1 != 2"), json!(true));
    }

    #[test]
    fn comparisons_on_numbers_and_strings() {
        assert_eq!(eval("2 < 10"), json!(true));
        assert_eq!(eval("\"abc\" < \"abd\""), json!(true));
        assert_eq!(eval("2.5 >= 2.5"), json!(true));
    }

    #[test]
    fn arithmetic_keeps_integers_integral() {
        assert_eq!(eval("7 / 2"), json!(3));
        assert_eq!(eval("7 % 2"), json!(1));
        assert_eq!(eval("7.0 / 2"), json!(3.5));
    }

    #[test]
    fn division_by_zero_is_an_eval_error() {
        let err = env().eval(&compile("1 / 0").unwrap()).unwrap_err();
        assert!(matches!(err, ExprError::Eval(_)));
    }

    #[test]
    fn logical_operators_short_circuit() {
        // The right side would fail with unknown variable if evaluated.
        assert_eq!(eval("false && missing"), json!(false));
        assert_eq!(eval("true || missing"), json!(true));
    }

    #[test]
    fn logical_operators_require_booleans() {
        let err = env().eval(&compile("1 && true").unwrap()).unwrap_err();
        assert!(matches!(err, ExprError::TypeMismatch { .. }));
    }

    #[test]
    fn size_counts_chars_elements_and_keys() {
        assert_eq!(eval("size(\"héllo\")"), json!(5));
        assert_eq!(eval("size(response.data.result)"), json!(2));
        assert_eq!(eval("size(response.data)"), json!(2));
    }

    #[test]
    fn host_time_functions_use_the_bound_clock() {
        assert_eq!(eval("unixtime()"), json!(1_700_000_000));
        assert_eq!(eval("timestamp()"), json!("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn missing_field_is_an_error() {
        let err = env().eval(&compile("response.nope").unwrap()).unwrap_err();
        assert!(matches!(err, ExprError::Eval(_)));
    }

    #[test]
    fn indexing_out_of_bounds_is_an_error() {
        let err = env()
            .eval(&compile("response.data.result[9]").unwrap())
            .unwrap_err();
        assert!(matches!(err, ExprError::Eval(_)));
    }

    #[test]
    fn object_indexing_by_string_key() {
        assert_eq!(eval("response[\"status\"]"), json!("success"));
    }

    #[test]
    fn fuel_bounds_evaluation() {
        let env = env().with_fuel(3);
        let err = env
            .eval(&compile("1 + 2 + 3 + 4 + 5").unwrap())
            .unwrap_err();
        assert!(matches!(err, ExprError::Eval(_)));
    }

    #[test]
    fn evaluation_is_pure() {
        let expr = compile("string(response.data.result[0]) + timestamp()").unwrap();
        let env = env();
        let first = env.eval(&expr).unwrap();
        let second = env.eval(&expr).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unary_operators() {
        assert_eq!(eval("!false"), json!(true));
        assert_eq!(eval("-3"), json!(-3));
        assert_eq!(eval("-(1.5)"), json!(-1.5));
    }
}
