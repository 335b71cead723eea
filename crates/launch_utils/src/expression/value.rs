//! Typed result of evaluating an expression

use std::fmt;

/// Expression values: strings, booleans, or numbers
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Short type name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "str",
        }
    }

    /// Truthiness with the usual scripting rules: empty and zero are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
        }
    }

    /// Numeric view of the value; strings are parsed after trimming
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Numeric view for non-string values only
    pub(crate) fn as_number(&self) -> Option<f64> {
        match self {
            Value::String(_) => None,
            other => other.as_f64(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

/// Shortest round-trip form with a signed, two-digit exponent: `1e-05`, `1.5e+16`
fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }

    // Debug keeps the trailing ".0" on whole numbers and switches to
    // exponent form at the same magnitudes
    let repr = format!("{:?}", x);
    match repr.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => repr,
    }
}
