//! Launch argument declaration and the argument diagnostic printer

use crate::action::{Action, OpaqueFunction};
use crate::config::{LaunchContext, Substitution};
use std::io::{self, Write};

/// Printed in place of a value that cannot be resolved
pub const UNEVALUATED_PLACEHOLDER: &str = "<unable to evaluate>";

/// Declaration of a named launch argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclareLaunchArgument {
    name: String,
    description: String,
    default_value: Option<String>,
    choices: Option<Vec<String>>,
}

impl DeclareLaunchArgument {
    /// Create a declaration, checking that a default is one of the choices
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        default_value: Option<String>,
        choices: Option<Vec<String>>,
    ) -> Result<Self, ArgumentError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ArgumentError::EmptyName);
        }

        if let Some(choices) = &choices {
            if choices.is_empty() {
                return Err(ArgumentError::EmptyChoices(name));
            }
            if let Some(default) = &default_value {
                if !choices.contains(default) {
                    return Err(ArgumentError::DefaultNotInChoices {
                        name,
                        default: default.clone(),
                        choices: choices.clone(),
                    });
                }
            }
        }

        Ok(Self {
            name,
            description: description.into(),
            default_value,
            choices,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn choices(&self) -> Option<&[String]> {
        self.choices.as_deref()
    }

    /// Pick the launch-time value: the override if given, else the default
    pub fn resolve(&self, override_value: Option<&str>) -> Result<String, ArgumentError> {
        let value = override_value
            .or(self.default_value.as_deref())
            .ok_or_else(|| ArgumentError::MissingValue(self.name.clone()))?;

        if let Some(choices) = &self.choices {
            if !choices.iter().any(|c| c == value) {
                return Err(ArgumentError::InvalidChoice {
                    name: self.name.clone(),
                    value: value.to_string(),
                    choices: choices.clone(),
                });
            }
        }

        Ok(value.to_string())
    }
}

/// A declared argument together with a live reference to its value
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchArgument {
    pub name: String,
    pub value: Substitution,
    pub declaration: DeclareLaunchArgument,
}

impl LaunchArgument {
    /// The (name, reference) pair consumed by [`print_arguments`]
    pub fn pair(&self) -> (String, Substitution) {
        (self.name.clone(), self.value.clone())
    }
}

impl From<LaunchArgument> for Action {
    fn from(arg: LaunchArgument) -> Self {
        Action::DeclareArgument(arg.declaration)
    }
}

/// Declare a launch argument and return it with a reference to its value
///
/// ```
/// use launch_utils::declare_argument;
///
/// let mut declared = Vec::new();
/// let use_sim = declare_argument(
///     "use_sim",
///     "Run against the simulator",
///     Some("false"),
///     Some(&["true", "false"]),
/// )
/// .unwrap();
/// declared.push(use_sim.pair());
/// assert_eq!(declared[0].0, "use_sim");
/// ```
pub fn declare_argument(
    name: &str,
    description: &str,
    default_value: Option<&str>,
    choices: Option<&[&str]>,
) -> Result<LaunchArgument, ArgumentError> {
    let declaration = DeclareLaunchArgument::new(
        name,
        description,
        default_value.map(str::to_string),
        choices.map(|c| c.iter().map(|s| s.to_string()).collect()),
    )?;

    Ok(LaunchArgument {
        name: name.to_string(),
        value: Substitution::arg(name),
        declaration,
    })
}

/// Write one `[LAUNCH] <name> = <value>` line per argument
///
/// An argument that fails to resolve is written with
/// [`UNEVALUATED_PLACEHOLDER`]; the remaining entries are still written.
pub fn write_arguments<W: Write>(
    out: &mut W,
    ctx: &LaunchContext,
    args: &[(String, Substitution)],
) -> io::Result<()> {
    for (name, value) in args {
        let value = match value.perform(ctx) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("Could not evaluate argument '{}': {}", name, e);
                UNEVALUATED_PLACEHOLDER.to_string()
            }
        };
        writeln!(out, "[LAUNCH] {} = {}", name, value)?;
    }
    Ok(())
}

/// Print argument values to stdout
///
/// Has the shape of an opaque function body: it returns no further actions.
pub fn print_arguments(ctx: &LaunchContext, args: &[(String, Substitution)]) -> Vec<Action> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = write_arguments(&mut out, ctx, args) {
        log::warn!("Failed to print launch arguments: {}", e);
    }
    Vec::new()
}

/// Wrap [`print_arguments`] in an opaque function action
pub fn print_arguments_action(args: Vec<(String, Substitution)>) -> Action {
    Action::OpaqueFunction(OpaqueFunction::new("print_arguments", move |ctx| {
        print_arguments(ctx, &args)
    }))
}

/// Errors in argument declaration and resolution
#[derive(Debug, thiserror::Error)]
pub enum ArgumentError {
    #[error("Argument name must not be empty")]
    EmptyName,

    #[error("Argument '{0}' declares an empty list of choices")]
    EmptyChoices(String),

    #[error("Default '{default}' of argument '{name}' is not one of: {}", .choices.join(", "))]
    DefaultNotInChoices {
        name: String,
        default: String,
        choices: Vec<String>,
    },

    #[error("Argument '{0}' has no default and was not provided")]
    MissingValue(String),

    #[error("Value '{value}' of argument '{name}' is not one of: {}", .choices.join(", "))]
    InvalidChoice {
        name: String,
        value: String,
        choices: Vec<String>,
    },
}
