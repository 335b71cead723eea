//! Deferred expressions: assembled at build time, evaluated at launch time
//!
//! An [`Expression`] is a list of [`Substitution`] fragments. Evaluating it
//! performs every fragment against a [`LaunchContext`], concatenates the
//! results and interprets the text with [`evaluate_text`].

mod eval;
mod value;

pub use eval::evaluate_text;
pub use value::Value;

use crate::config::{IntoSubstitutions, LaunchContext, Substitution, SubstitutionError};
use std::fmt;

/// A deferred expression
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    fragments: Vec<Substitution>,
}

impl Expression {
    /// Create an empty expression
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an expression from existing fragments
    pub fn from_fragments(fragments: impl IntoSubstitutions) -> Self {
        let mut expr = Self::new();
        expr.extend(fragments);
        expr
    }

    /// Append literal source text, merging with a trailing text fragment
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Substitution::Text(last)) = self.fragments.last_mut() {
            last.push_str(text);
        } else {
            self.fragments.push(Substitution::Text(text.to_string()));
        }
    }

    /// Append fragments
    pub fn extend(&mut self, fragments: impl IntoSubstitutions) {
        for fragment in fragments.into_substitutions() {
            match fragment {
                Substitution::Text(text) => self.push_text(&text),
                other => self.fragments.push(other),
            }
        }
    }

    /// The fragments making up this expression
    pub fn fragments(&self) -> &[Substitution] {
        &self.fragments
    }

    /// Perform all fragments and return the expression source text
    pub fn render(&self, ctx: &LaunchContext) -> Result<String, ExpressionError> {
        Ok(ctx.perform(&self.fragments)?)
    }

    /// Render and interpret the expression
    pub fn evaluate(&self, ctx: &LaunchContext) -> Result<Value, ExpressionError> {
        let text = self.render(ctx)?;
        log::trace!("Evaluating expression: {}", text);
        evaluate_text(&text)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fragment in &self.fragments {
            write!(f, "{}", fragment)?;
        }
        Ok(())
    }
}

/// A condition known at build time or resolved at launch time
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Literal(bool),
    /// Text compared case-insensitively against `"true"`
    Deferred(Vec<Substitution>),
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        Condition::Literal(value)
    }
}

impl From<&str> for Condition {
    fn from(value: &str) -> Self {
        Condition::Deferred(value.into_substitutions())
    }
}

impl From<String> for Condition {
    fn from(value: String) -> Self {
        Condition::Deferred(value.into_substitutions())
    }
}

impl From<Substitution> for Condition {
    fn from(value: Substitution) -> Self {
        Condition::Deferred(vec![value])
    }
}

impl From<Vec<Substitution>> for Condition {
    fn from(value: Vec<Substitution>) -> Self {
        Condition::Deferred(value)
    }
}

/// A delay in seconds, known at build time or resolved at launch time
#[derive(Debug, Clone, PartialEq)]
pub enum Delay {
    Seconds(f64),
    /// Text interpreted as a number when evaluated
    Deferred(Vec<Substitution>),
}

macro_rules! delay_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Delay {
                fn from(value: $ty) -> Self {
                    Delay::Seconds(value as f64)
                }
            }
        )*
    };
}

delay_from_number!(f64, f32, i32, u32, i64, u64);

impl From<&str> for Delay {
    fn from(value: &str) -> Self {
        Delay::Deferred(value.into_substitutions())
    }
}

impl From<String> for Delay {
    fn from(value: String) -> Self {
        Delay::Deferred(value.into_substitutions())
    }
}

impl From<Substitution> for Delay {
    fn from(value: Substitution) -> Self {
        Delay::Deferred(vec![value])
    }
}

impl From<Vec<Substitution>> for Delay {
    fn from(value: Vec<Substitution>) -> Self {
        Delay::Deferred(value)
    }
}

/// Float literal as expression source, always with a fractional part
///
/// Infinities and NaN have no literal form and go through `float("...")`.
fn float_literal(value: f64) -> String {
    if value.is_nan() {
        r#"float("nan")"#.to_string()
    } else if value.is_infinite() {
        let sign = if value < 0.0 { "-" } else { "" };
        format!(r#"float("{}inf")"#, sign)
    } else {
        format!("{:?}", value)
    }
}

fn push_condition(expr: &mut Expression, condition: Condition) {
    match condition {
        Condition::Literal(true) => expr.push_text("\"true\""),
        Condition::Literal(false) => expr.push_text("\"false\""),
        Condition::Deferred(fragments) => {
            expr.push_text("\"");
            expr.extend(fragments);
            expr.push_text("\".lower()");
        }
    }
}

/// Expression yielding `delay` seconds when `condition` is true, else `0.0`
///
/// The result is always a float: literal delays are rendered as float
/// literals, deferred delays are wrapped in `float(...)`.
pub fn delay_expression(delay: impl Into<Delay>, condition: impl Into<Condition>) -> Expression {
    let mut expr = Expression::new();

    match delay.into() {
        Delay::Seconds(seconds) => expr.push_text(&float_literal(seconds)),
        Delay::Deferred(fragments) => {
            expr.push_text("float(");
            expr.extend(fragments);
            expr.push_text(")");
        }
    }

    expr.push_text(" if ");
    push_condition(&mut expr, condition.into());
    expr.push_text(" == \"true\" else 0.0");
    expr
}

/// Expression selecting `if_true` when `condition` is true, else `if_false`
///
/// With `quote_as_string` both branches are wrapped in double quotes and the
/// result is always a string. Otherwise the branch text is interpreted as an
/// expression of its own, so `5` evaluates to an integer.
pub fn inline_if_expression(
    condition: impl Into<Condition>,
    if_true: impl IntoSubstitutions,
    if_false: impl IntoSubstitutions,
    quote_as_string: bool,
) -> Expression {
    let quote = if quote_as_string { "\"" } else { "" };
    let mut expr = Expression::new();

    expr.push_text(quote);
    expr.extend(if_true);
    expr.push_text(quote);
    expr.push_text(" if ");
    push_condition(&mut expr, condition.into());
    expr.push_text(" == \"true\" else ");
    expr.push_text(quote);
    expr.extend(if_false);
    expr.push_text(quote);
    expr
}

/// Errors that can occur while evaluating an expression
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("Failed to resolve expression: {0}")]
    Substitution(#[from] SubstitutionError),

    #[error("Unexpected character '{ch}' at offset {offset} in expression: {text}")]
    UnexpectedChar {
        ch: char,
        offset: usize,
        text: String,
    },

    #[error("Unterminated string literal: {0}")]
    UnterminatedString(String),

    #[error("Invalid number literal: {0}")]
    InvalidNumber(String),

    #[error("Unexpected {found} in expression: {text}")]
    UnexpectedToken { found: String, text: String },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unknown method '{method}' on {kind}")]
    UnknownMethod { method: String, kind: &'static str },

    #[error("Bad operand type for unary {op}: {kind}")]
    InvalidOperand { op: &'static str, kind: &'static str },

    #[error("Cannot convert '{value}' to {target}")]
    InvalidConversion { value: String, target: &'static str },

    #[error("Expression result is not numeric: {0}")]
    NotNumeric(String),

    #[error("Expression nests deeper than {0} levels")]
    TooDeep(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> LaunchContext {
        LaunchContext::new()
            .with_arg("enabled", "true")
            .with_arg("disabled", "false")
            .with_arg("shouting", "TRUE")
            .with_arg("delay", "4")
            .with_arg("name", "front_camera")
    }

    #[test]
    fn test_literal_delay_with_literal_condition() {
        let expr = delay_expression(3, true);
        assert_eq!(expr.to_string(), r#"3.0 if "true" == "true" else 0.0"#);
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Float(3.0));

        let expr = delay_expression(2.5, false);
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_non_finite_literal_delay() {
        let expr = delay_expression(f64::INFINITY, false);
        assert_eq!(expr.to_string(), r#"float("inf") if "false" == "true" else 0.0"#);
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Float(0.0));

        let expr = delay_expression(f64::INFINITY, true);
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Float(f64::INFINITY));

        let expr = delay_expression(f64::NEG_INFINITY, true);
        assert_eq!(
            expr.evaluate(&ctx()).unwrap(),
            Value::Float(f64::NEG_INFINITY)
        );

        let expr = delay_expression(f64::NAN, true);
        assert!(matches!(expr.evaluate(&ctx()), Ok(Value::Float(x)) if x.is_nan()));
    }

    #[test]
    fn test_deferred_delay_and_condition() {
        let expr = delay_expression(Substitution::arg("delay"), Substitution::arg("enabled"));
        assert_eq!(
            expr.to_string(),
            r#"float($(arg delay)) if "$(arg enabled)".lower() == "true" else 0.0"#
        );
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Float(4.0));

        let expr = delay_expression(Substitution::arg("delay"), Substitution::arg("disabled"));
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_condition_is_case_insensitive() {
        let expr = delay_expression(1.5, Substitution::arg("shouting"));
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Float(1.5));

        let expr = delay_expression(1.5, "True");
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_literal_and_deferred_conditions_agree() {
        for (literal, arg) in [(true, "enabled"), (false, "disabled")] {
            let inlined = delay_expression(2, literal).evaluate(&ctx()).unwrap();
            let deferred = delay_expression(2, Substitution::arg(arg))
                .evaluate(&ctx())
                .unwrap();
            assert_eq!(inlined, deferred);

            let inlined = inline_if_expression(literal, "A", "B", true)
                .evaluate(&ctx())
                .unwrap();
            let deferred = inline_if_expression(Substitution::arg(arg), "A", "B", true)
                .evaluate(&ctx())
                .unwrap();
            assert_eq!(inlined, deferred);
        }
    }

    #[test]
    fn test_builders_do_not_evaluate() {
        // unresolvable until launch time
        let expr = delay_expression(Substitution::arg("missing"), Substitution::arg("missing"));
        assert!(matches!(
            expr.evaluate(&ctx()),
            Err(ExpressionError::Substitution(SubstitutionError::UndefinedArg(_)))
        ));
    }

    #[test]
    fn test_inline_if_quoted() {
        let expr = inline_if_expression("true", "A", "B", true);
        assert_eq!(expr.to_string(), r#""A" if "true".lower() == "true" else "B""#);
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::String("A".into()));

        let expr = inline_if_expression("false", "A", "B", true);
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::String("B".into()));
    }

    #[test]
    fn test_inline_if_quoted_numbers_stay_strings() {
        let expr = inline_if_expression(true, "5", "7", true);
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::String("5".into()));
    }

    #[test]
    fn test_inline_if_unquoted_keeps_branch_type() {
        let expr = inline_if_expression("true", "5", "7", false);
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Int(5));

        let expr = inline_if_expression("false", "5", "7.5", false);
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Float(7.5));
    }

    #[test]
    fn test_inline_if_with_substituted_branch() {
        let expr = inline_if_expression(
            Substitution::arg("enabled"),
            vec![Substitution::text("/"), Substitution::arg("name")],
            "/default",
            true,
        );
        assert_eq!(
            expr.evaluate(&ctx()).unwrap(),
            Value::String("/front_camera".into())
        );
    }

    #[test]
    fn test_text_fragments_are_merged() {
        let expr = delay_expression(1, true);
        assert_eq!(expr.fragments().len(), 1);

        let expr = delay_expression("2", Substitution::arg("enabled"));
        assert_eq!(expr.fragments().len(), 3);
    }
}
