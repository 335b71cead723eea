//! Launch actions and the helpers that compose them

use crate::arguments::DeclareLaunchArgument;
use crate::config::{IntoSubstitutions, LaunchContext, Substitution, SubstitutionError};
use crate::expression::{
    delay_expression, inline_if_expression, Condition, Delay, Expression, ExpressionError,
};
use crate::runtime::ProcessConfig;
use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

type OpaqueFn = dyn Fn(&LaunchContext) -> Vec<Action> + Send + Sync;

/// A function run at launch time that may produce further actions
#[derive(Clone)]
pub struct OpaqueFunction {
    name: String,
    function: Arc<OpaqueFn>,
}

impl OpaqueFunction {
    pub fn new(
        name: impl Into<String>,
        function: impl Fn(&LaunchContext) -> Vec<Action> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            function: Arc::new(function),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the function against the current context
    pub fn call(&self, ctx: &LaunchContext) -> Vec<Action> {
        (self.function)(ctx)
    }
}

impl fmt::Debug for OpaqueFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Start an executable with substituted arguments and environment
#[derive(Debug, Clone)]
pub struct ExecuteProcess {
    pub name: String,
    pub executable: Vec<Substitution>,
    pub arguments: Vec<Vec<Substitution>>,
    pub env: IndexMap<String, Vec<Substitution>>,
    pub working_dir: Option<Vec<Substitution>>,
}

impl ExecuteProcess {
    pub fn new(name: impl Into<String>, executable: impl IntoSubstitutions) -> Self {
        Self {
            name: name.into(),
            executable: executable.into_substitutions(),
            arguments: Vec::new(),
            env: IndexMap::new(),
            working_dir: None,
        }
    }

    /// Append a command line argument
    pub fn with_argument(mut self, argument: impl IntoSubstitutions) -> Self {
        self.arguments.push(argument.into_substitutions());
        self
    }

    /// Set an environment variable for the process
    pub fn with_env(mut self, name: impl Into<String>, value: impl IntoSubstitutions) -> Self {
        self.env.insert(name.into(), value.into_substitutions());
        self
    }

    pub fn with_working_dir(mut self, dir: impl IntoSubstitutions) -> Self {
        self.working_dir = Some(dir.into_substitutions());
        self
    }

    /// Perform all substitutions and produce a spawnable configuration
    pub fn resolve(&self, ctx: &LaunchContext) -> Result<ProcessConfig, SubstitutionError> {
        let executable = ctx.perform(&self.executable)?;
        let args = self
            .arguments
            .iter()
            .map(|arg| ctx.perform(arg))
            .collect::<Result<Vec<_>, _>>()?;

        let mut env = std::collections::HashMap::new();
        for (key, value) in &self.env {
            env.insert(key.clone(), ctx.perform(value)?);
        }

        let working_dir = match &self.working_dir {
            Some(dir) => Some(PathBuf::from(ctx.perform(dir)?)),
            None => None,
        };

        Ok(ProcessConfig {
            name: self.name.clone(),
            executable,
            args,
            env,
            working_dir,
        })
    }
}

/// Run a group of actions after a period computed at launch time
#[derive(Debug, Clone)]
pub struct TimerAction {
    period: Expression,
    actions: Vec<Action>,
}

impl TimerAction {
    pub fn new(period: Expression, actions: impl IntoActions) -> Self {
        Self {
            period,
            actions: actions.into_actions(),
        }
    }

    /// The unevaluated period expression
    pub fn period_expression(&self) -> &Expression {
        &self.period
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Evaluate the period in seconds
    pub fn period(&self, ctx: &LaunchContext) -> Result<Duration, ActionError> {
        let value = self.period.evaluate(ctx)?;
        let seconds = value
            .as_f64()
            .ok_or_else(|| ExpressionError::NotNumeric(value.to_string()))?;

        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ActionError::InvalidPeriod(seconds));
        }
        Duration::try_from_secs_f64(seconds).map_err(|_| ActionError::InvalidPeriod(seconds))
    }
}

/// A unit of launch work
#[derive(Debug, Clone)]
pub enum Action {
    DeclareArgument(DeclareLaunchArgument),
    Timer(TimerAction),
    ExecuteProcess(ExecuteProcess),
    LogInfo(Vec<Substitution>),
    OpaqueFunction(OpaqueFunction),
}

impl Action {
    /// Log a message at info level when the action runs
    pub fn log_info(message: impl IntoSubstitutions) -> Self {
        Action::LogInfo(message.into_substitutions())
    }
}

fn join_fragments(fragments: &[Substitution]) -> String {
    fragments.iter().map(|f| f.to_string()).collect()
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::DeclareArgument(decl) => write!(f, "declare argument '{}'", decl.name()),
            Action::Timer(timer) => write!(
                f,
                "timer with {} action(s), period: {}",
                timer.actions.len(),
                timer.period
            ),
            Action::ExecuteProcess(process) => {
                write!(f, "execute '{}': {}", process.name, join_fragments(&process.executable))?;
                for arg in &process.arguments {
                    write!(f, " {}", join_fragments(arg))?;
                }
                Ok(())
            }
            Action::LogInfo(message) => write!(f, "log: {}", join_fragments(message)),
            Action::OpaqueFunction(function) => write!(f, "opaque function '{}'", function.name),
        }
    }
}

impl From<DeclareLaunchArgument> for Action {
    fn from(decl: DeclareLaunchArgument) -> Self {
        Action::DeclareArgument(decl)
    }
}

impl From<TimerAction> for Action {
    fn from(timer: TimerAction) -> Self {
        Action::Timer(timer)
    }
}

impl From<ExecuteProcess> for Action {
    fn from(process: ExecuteProcess) -> Self {
        Action::ExecuteProcess(process)
    }
}

impl From<OpaqueFunction> for Action {
    fn from(function: OpaqueFunction) -> Self {
        Action::OpaqueFunction(function)
    }
}

/// A single action or an ordered list of actions
pub trait IntoActions {
    fn into_actions(self) -> Vec<Action>;
}

impl IntoActions for Action {
    fn into_actions(self) -> Vec<Action> {
        vec![self]
    }
}

impl IntoActions for Vec<Action> {
    fn into_actions(self) -> Vec<Action> {
        self
    }
}

impl IntoActions for TimerAction {
    fn into_actions(self) -> Vec<Action> {
        vec![Action::Timer(self)]
    }
}

impl IntoActions for ExecuteProcess {
    fn into_actions(self) -> Vec<Action> {
        vec![Action::ExecuteProcess(self)]
    }
}

impl IntoActions for OpaqueFunction {
    fn into_actions(self) -> Vec<Action> {
        vec![Action::OpaqueFunction(self)]
    }
}

/// Run `data` after `delay` seconds when `condition` is true, immediately otherwise
///
/// `condition` may be a `bool`, text such as `"true"`, or a substitution;
/// `delay` may be a number, text, or a substitution. Nothing is evaluated
/// until the timer is run.
pub fn conditional_delayed_execution(
    data: impl IntoActions,
    condition: impl Into<Condition>,
    delay: impl Into<Delay>,
) -> TimerAction {
    TimerAction::new(delay_expression(delay, condition), data)
}

/// Substitution choosing between two values depending on `condition`
///
/// With `cast_to_string` the chosen value is always rendered as a string.
pub fn launch_value_if(
    condition: impl Into<Condition>,
    if_true: impl IntoSubstitutions,
    if_false: impl IntoSubstitutions,
    cast_to_string: bool,
) -> Substitution {
    Substitution::Expression(Box::new(inline_if_expression(
        condition,
        if_true,
        if_false,
        cast_to_string,
    )))
}

/// Ordered list of launch entities
#[derive(Debug, Clone, Default)]
pub struct LaunchDescription {
    entities: Vec<Action>,
}

impl LaunchDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one or more actions
    pub fn add_action(&mut self, actions: impl IntoActions) {
        self.entities.extend(actions.into_actions());
    }

    /// Builder-style [`add_action`](Self::add_action)
    pub fn with_action(mut self, actions: impl IntoActions) -> Self {
        self.add_action(actions);
        self
    }

    pub fn entities(&self) -> &[Action] {
        &self.entities
    }

    /// Top-level argument declarations, in order
    pub fn declared_arguments(&self) -> impl Iterator<Item = &DeclareLaunchArgument> {
        self.entities.iter().filter_map(|entity| match entity {
            Action::DeclareArgument(decl) => Some(decl),
            _ => None,
        })
    }
}

/// Errors raised while running an action
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Timer period evaluation failed: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Timer period is not a representable non-negative duration: {0} seconds")]
    InvalidPeriod(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(message: &str) -> Action {
        Action::log_info(message)
    }

    #[test]
    fn test_conditional_delay_true() {
        let ctx = LaunchContext::new().with_arg("use_delay", "true");
        let timer =
            conditional_delayed_execution(log("hello"), Substitution::arg("use_delay"), 2.5);

        assert_eq!(timer.actions().len(), 1);
        assert_eq!(timer.period(&ctx).unwrap(), Duration::from_secs_f64(2.5));
    }

    #[test]
    fn test_conditional_delay_false_runs_immediately() {
        let ctx = LaunchContext::new().with_arg("use_delay", "False");
        let timer = conditional_delayed_execution(
            vec![log("a"), log("b")],
            Substitution::arg("use_delay"),
            10,
        );

        assert_eq!(timer.actions().len(), 2);
        assert_eq!(timer.period(&ctx).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_deferred_delay_from_argument() {
        let ctx = LaunchContext::new().with_arg("delay", "0.25");
        let timer = conditional_delayed_execution(log("x"), true, Substitution::arg("delay"));
        assert_eq!(timer.period(&ctx).unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_negative_period_rejected() {
        let ctx = LaunchContext::new();
        let timer = conditional_delayed_execution(log("x"), true, -1.0);
        assert!(matches!(
            timer.period(&ctx),
            Err(ActionError::InvalidPeriod(p)) if p == -1.0
        ));

        // a false condition never looks at the delay
        let timer = conditional_delayed_execution(log("x"), false, -1.0);
        assert_eq!(timer.period(&ctx).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_period_too_large_for_duration_rejected() {
        let ctx = LaunchContext::new().with_arg("delay", "1e20");
        let timer = conditional_delayed_execution(log("x"), true, 1e20);
        assert!(matches!(
            timer.period(&ctx),
            Err(ActionError::InvalidPeriod(p)) if p == 1e20
        ));

        let timer = conditional_delayed_execution(log("x"), true, Substitution::arg("delay"));
        assert!(matches!(
            timer.period(&ctx),
            Err(ActionError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_infinite_period() {
        let ctx = LaunchContext::new();
        let timer = conditional_delayed_execution(log("x"), false, f64::INFINITY);
        assert_eq!(timer.period(&ctx).unwrap(), Duration::ZERO);

        let timer = conditional_delayed_execution(log("x"), true, f64::INFINITY);
        assert!(matches!(
            timer.period(&ctx),
            Err(ActionError::InvalidPeriod(p)) if p.is_infinite()
        ));

        let timer = conditional_delayed_execution(log("x"), true, f64::NAN);
        assert!(matches!(
            timer.period(&ctx),
            Err(ActionError::InvalidPeriod(p)) if p.is_nan()
        ));
    }

    #[test]
    fn test_non_numeric_delay_rejected() {
        let ctx = LaunchContext::new().with_arg("delay", "soon");
        let timer = conditional_delayed_execution(log("x"), true, Substitution::arg("delay"));
        assert!(matches!(
            timer.period(&ctx),
            Err(ActionError::Expression(ExpressionError::InvalidConversion { .. }))
        ));
    }

    #[test]
    fn test_launch_value_if() {
        let ctx = LaunchContext::new().with_arg("sim", "TRUE");
        let value = launch_value_if(Substitution::arg("sim"), "sim_config.yaml", "real.yaml", true);
        assert_eq!(value.perform(&ctx).unwrap(), "sim_config.yaml");

        let value = launch_value_if(false, "1", "2", false);
        assert_eq!(value.perform(&ctx).unwrap(), "2");
    }

    #[test]
    fn test_execute_process_resolve() {
        let ctx = LaunchContext::new().with_arg("rate", "30");
        let process = ExecuteProcess::new("driver", "bin/driver")
            .with_argument(vec![Substitution::text("--rate="), Substitution::arg("rate")])
            .with_env("MODE", launch_value_if(true, "fast", "slow", true))
            .with_working_dir("/tmp");

        let config = process.resolve(&ctx).unwrap();
        assert_eq!(config.executable, "bin/driver");
        assert_eq!(config.args, vec!["--rate=30".to_string()]);
        assert_eq!(config.env["MODE"], "fast");
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_description_declared_arguments() {
        let decl = DeclareLaunchArgument::new("a", "", Some("1".into()), None).unwrap();
        let description = LaunchDescription::new()
            .with_action(Action::from(decl))
            .with_action(log("x"));

        let names: Vec<_> = description.declared_arguments().map(|d| d.name()).collect();
        assert_eq!(names, vec!["a"]);
        assert_eq!(description.entities().len(), 2);
    }

    #[test]
    fn test_action_display() {
        let timer = conditional_delayed_execution(log("x"), true, 1);
        assert_eq!(
            Action::from(timer).to_string(),
            r#"timer with 1 action(s), period: 1.0 if "true" == "true" else 0.0"#
        );
    }
}
