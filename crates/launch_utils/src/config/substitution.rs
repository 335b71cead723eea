//! Substitution fragments and the context that resolves them
//!
//! Strings in launch files may embed `$(arg name)` and `$(env NAME)` patterns.
//! They are parsed into [`Substitution`] fragments once and performed later
//! against a [`LaunchContext`].

use crate::expression::{Expression, ExpressionError};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Regex for matching substitution patterns: $(type value)
static SUBSTITUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\((\w+)\s+([^)]+)\)|\$\((\w+)\)").unwrap());

/// A single piece of a deferred string
#[derive(Debug, Clone, PartialEq)]
pub enum Substitution {
    /// Literal text
    Text(String),
    /// Value of a declared launch argument
    LaunchConfiguration(String),
    /// Value of an environment variable, with an optional fallback
    EnvironmentVariable {
        name: String,
        default: Option<String>,
    },
    /// Result of an inline expression, rendered as text
    Expression(Box<Expression>),
}

impl Substitution {
    /// Literal text fragment
    pub fn text(value: impl Into<String>) -> Self {
        Substitution::Text(value.into())
    }

    /// Reference to a launch argument
    pub fn arg(name: impl Into<String>) -> Self {
        Substitution::LaunchConfiguration(name.into())
    }

    /// Reference to an environment variable
    pub fn env(name: impl Into<String>) -> Self {
        Substitution::EnvironmentVariable {
            name: name.into(),
            default: None,
        }
    }

    /// Reference to an environment variable with a fallback value
    pub fn env_or(name: impl Into<String>, default: impl Into<String>) -> Self {
        Substitution::EnvironmentVariable {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    /// Resolve this fragment against a launch context
    pub fn perform(&self, ctx: &LaunchContext) -> Result<String, SubstitutionError> {
        match self {
            Substitution::Text(text) => Ok(text.clone()),
            Substitution::LaunchConfiguration(name) => ctx.resolve_arg(name),
            Substitution::EnvironmentVariable { name, default } => match ctx.resolve_env(name) {
                Ok(value) => Ok(value),
                Err(e) => default.clone().ok_or(e),
            },
            Substitution::Expression(expr) => expr
                .evaluate(ctx)
                .map(|value| value.to_string())
                .map_err(|e| SubstitutionError::Expression(Box::new(e))),
        }
    }

    /// Names of all launch arguments this fragment refers to
    pub fn referenced_args(&self) -> Vec<&str> {
        match self {
            Substitution::LaunchConfiguration(name) => vec![name.as_str()],
            Substitution::Expression(expr) => expr
                .fragments()
                .iter()
                .flat_map(|f| f.referenced_args())
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substitution::Text(text) => write!(f, "{}", text),
            Substitution::LaunchConfiguration(name) => write!(f, "$(arg {})", name),
            Substitution::EnvironmentVariable {
                name,
                default: None,
            } => write!(f, "$(env {})", name),
            Substitution::EnvironmentVariable {
                name,
                default: Some(default),
            } => write!(f, "$(env {} {})", name, default),
            Substitution::Expression(expr) => write!(f, "$(eval {})", expr),
        }
    }
}

impl From<&str> for Substitution {
    fn from(value: &str) -> Self {
        Substitution::Text(value.to_string())
    }
}

impl From<String> for Substitution {
    fn from(value: String) -> Self {
        Substitution::Text(value)
    }
}

/// Conversion into a list of substitution fragments
///
/// Plain strings become a single literal fragment; use [`parse_template`] to
/// interpret `$(...)` patterns inside a string.
pub trait IntoSubstitutions {
    fn into_substitutions(self) -> Vec<Substitution>;
}

impl IntoSubstitutions for &str {
    fn into_substitutions(self) -> Vec<Substitution> {
        vec![Substitution::Text(self.to_string())]
    }
}

impl IntoSubstitutions for String {
    fn into_substitutions(self) -> Vec<Substitution> {
        vec![Substitution::Text(self)]
    }
}

impl IntoSubstitutions for Substitution {
    fn into_substitutions(self) -> Vec<Substitution> {
        vec![self]
    }
}

impl IntoSubstitutions for Vec<Substitution> {
    fn into_substitutions(self) -> Vec<Substitution> {
        self
    }
}

impl IntoSubstitutions for &[Substitution] {
    fn into_substitutions(self) -> Vec<Substitution> {
        self.to_vec()
    }
}

/// Split a template string into literal and `$(type value)` fragments
pub fn parse_template(input: &str) -> Result<Vec<Substitution>, SubstitutionError> {
    let mut fragments = Vec::new();
    let mut last_end = 0;

    for caps in SUBSTITUTION_PATTERN.captures_iter(input) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > last_end {
            fragments.push(Substitution::Text(input[last_end..whole.start()].to_string()));
        }
        fragments.push(parse_capture(&caps)?);
        last_end = whole.end();
    }

    if last_end < input.len() {
        fragments.push(Substitution::Text(input[last_end..].to_string()));
    }

    Ok(fragments)
}

/// Turn a single capture into a fragment
fn parse_capture(caps: &Captures) -> Result<Substitution, SubstitutionError> {
    // Pattern 1: $(type value) - e.g., $(arg camera_config)
    if let (Some(subst_type), Some(value)) = (caps.get(1), caps.get(2)) {
        let value = value.as_str().trim();
        return match subst_type.as_str() {
            "arg" => Ok(Substitution::arg(value)),
            "env" => Ok(match value.split_once(char::is_whitespace) {
                Some((name, default)) => Substitution::env_or(name, default.trim()),
                None => Substitution::env(value),
            }),
            other => Err(SubstitutionError::UnknownType(other.to_string())),
        };
    }

    // Pattern 2: $(type) - no bare substitution types are supported
    if let Some(subst_type) = caps.get(3) {
        return Err(SubstitutionError::UnknownType(subst_type.as_str().to_string()));
    }

    Err(SubstitutionError::InvalidPattern(
        caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
    ))
}

/// Runtime state substitutions are resolved against
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    /// Resolved launch argument values
    pub args: HashMap<String, String>,
    /// Environment overrides, consulted before the process environment
    pub env: HashMap<String, String>,
}

impl LaunchContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Add multiple arguments
    pub fn with_args(mut self, args: HashMap<String, String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Add multiple environment variables
    pub fn with_envs(mut self, envs: HashMap<String, String>) -> Self {
        self.env.extend(envs);
        self
    }

    /// Set the value of a launch argument
    pub fn set_arg(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.args.insert(name.into(), value.into());
    }

    /// Concatenate the performed values of a list of fragments
    pub fn perform(&self, fragments: &[Substitution]) -> Result<String, SubstitutionError> {
        let mut result = String::new();
        for fragment in fragments {
            result.push_str(&fragment.perform(self)?);
        }
        Ok(result)
    }

    /// Parse a template string and perform it in one step
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        self.perform(&parse_template(input)?)
    }

    /// Resolve an argument reference
    pub fn resolve_arg(&self, name: &str) -> Result<String, SubstitutionError> {
        self.args
            .get(name)
            .cloned()
            .ok_or_else(|| SubstitutionError::UndefinedArg(name.to_string()))
    }

    /// Resolve an environment variable reference
    pub fn resolve_env(&self, name: &str) -> Result<String, SubstitutionError> {
        // First check our local env overrides
        if let Some(value) = self.env.get(name) {
            return Ok(value.clone());
        }

        // Then check system environment
        std::env::var(name).map_err(|_| SubstitutionError::UndefinedEnv(name.to_string()))
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Undefined argument: {0}")]
    UndefinedArg(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),

    #[error("Expression evaluation failed: {0}")]
    Expression(#[source] Box<ExpressionError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_substitution() {
        let ctx = LaunchContext::new().with_arg("config", "my_config.yaml");

        let result = ctx.substitute("$(arg config)").unwrap();
        assert_eq!(result, "my_config.yaml");
    }

    #[test]
    fn test_env_substitution() {
        let ctx = LaunchContext::new().with_env("MY_VAR", "my_value");

        let result = ctx.substitute("$(env MY_VAR)").unwrap();
        assert_eq!(result, "my_value");
    }

    #[test]
    fn test_env_default() {
        let ctx = LaunchContext::new();

        let result = ctx
            .substitute("$(env LAUNCH_UTILS_SURELY_UNSET_VAR fallback)")
            .unwrap();
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_parse_template_fragments() {
        let fragments = parse_template("--rate=$(arg rate)hz").unwrap();
        assert_eq!(
            fragments,
            vec![
                Substitution::text("--rate="),
                Substitution::arg("rate"),
                Substitution::text("hz"),
            ]
        );
    }

    #[test]
    fn test_multiple_substitutions() {
        let ctx = LaunchContext::new()
            .with_arg("prefix", "data")
            .with_arg("suffix", "log");

        let result = ctx.substitute("$(arg prefix)_$(arg suffix)").unwrap();
        assert_eq!(result, "data_log");
    }

    #[test]
    fn test_undefined_arg_error() {
        let ctx = LaunchContext::new();

        let result = ctx.substitute("$(arg undefined)");
        assert!(matches!(result, Err(SubstitutionError::UndefinedArg(_))));
    }

    #[test]
    fn test_unknown_type_error() {
        let result = parse_template("$(find my_pkg)");
        assert!(matches!(result, Err(SubstitutionError::UnknownType(t)) if t == "find"));

        let result = parse_template("recording_$(timestamp).mcap");
        assert!(matches!(result, Err(SubstitutionError::UnknownType(_))));
    }

    #[test]
    fn test_no_substitution_needed() {
        let ctx = LaunchContext::new();

        let result = ctx.substitute("plain string").unwrap();
        assert_eq!(result, "plain string");
    }

    #[test]
    fn test_display_round_trips_template() {
        let fragments = parse_template("$(arg a)-$(env B)").unwrap();
        let rendered: String = fragments.iter().map(|f| f.to_string()).collect();
        assert_eq!(rendered, "$(arg a)-$(env B)");
    }
}
