//! Launch file YAML schema definitions

use crate::action::{conditional_delayed_execution, Action, ExecuteProcess, LaunchDescription};
use crate::arguments::{print_arguments_action, ArgumentError, DeclareLaunchArgument};
use crate::config::substitution::{parse_template, Substitution, SubstitutionError};
use crate::expression::{Condition, Delay};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Root launch file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchFile {
    /// Launch file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Argument declarations, in declaration order
    #[serde(default)]
    pub args: IndexMap<String, ArgDefinition>,

    /// Environment variables (applied to all nodes)
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Print every declared argument when the launch starts
    #[serde(default)]
    pub print_args: bool,

    /// Node definitions (ordered map for deterministic launch order)
    #[serde(default)]
    pub nodes: IndexMap<String, NodeConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Argument declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgDefinition {
    /// Default value, if the argument is optional
    #[serde(default)]
    pub default: Option<ArgValue>,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Allowed values
    #[serde(default)]
    pub choices: Option<Vec<ArgValue>>,
}

/// Argument values can be strings, booleans, or numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Convert to string representation
    pub fn as_str(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::String(s) => s.clone(),
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Executable path (may contain substitutions)
    pub executable: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables specific to this node
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Start delay in seconds: a number or a substitution string
    #[serde(default)]
    pub delay: Option<DelayValue>,

    /// Whether the delay applies
    /// Can be a boolean or a string like "$(arg use_delay)"
    #[serde(default = "default_delay_if")]
    pub delay_if: ConditionValue,
}

fn default_delay_if() -> ConditionValue {
    ConditionValue::Bool(true)
}

/// Delay value can be a number of seconds or a substitution string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelayValue {
    Seconds(f64),
    String(String),
}

/// Condition value can be a direct boolean or a substitution string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    String(String),
}

impl LaunchFile {
    /// Load launch file from a YAML file
    pub fn from_file(path: &str) -> Result<Self, LaunchFileError> {
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse launch file from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LaunchFileError> {
        let launch_file: LaunchFile =
            serde_yaml::from_str(content).map_err(LaunchFileError::Parse)?;
        launch_file.validate()?;
        Ok(launch_file)
    }

    /// Validate the launch file configuration
    pub fn validate(&self) -> Result<(), LaunchFileError> {
        self.to_description().map(|_| ())
    }

    /// Build the launch description this file declares
    ///
    /// Arguments come first, then the argument printer if enabled, then one
    /// process per node; nodes with a `delay` are wrapped in a conditional
    /// timer.
    pub fn to_description(&self) -> Result<LaunchDescription, LaunchFileError> {
        let mut description = LaunchDescription::new();
        let mut printed = Vec::new();

        for (name, def) in &self.args {
            let declaration = DeclareLaunchArgument::new(
                name.clone(),
                def.description.clone().unwrap_or_default(),
                def.default.as_ref().map(ArgValue::as_str),
                def.choices
                    .as_ref()
                    .map(|choices| choices.iter().map(ArgValue::as_str).collect()),
            )?;
            printed.push((name.clone(), Substitution::arg(name.clone())));
            description.add_action(Action::DeclareArgument(declaration));
        }

        if self.print_args {
            description.add_action(print_arguments_action(printed));
        }

        for (name, node) in &self.nodes {
            let process = self.build_process(name, node)?;

            match &node.delay {
                Some(delay) => {
                    let delay = match delay {
                        DelayValue::Seconds(seconds) => Delay::Seconds(*seconds),
                        DelayValue::String(template) => {
                            Delay::Deferred(self.template(template, name, "delay")?)
                        }
                    };
                    let condition = match &node.delay_if {
                        ConditionValue::Bool(b) => Condition::Literal(*b),
                        ConditionValue::String(template) => {
                            Condition::Deferred(self.template(template, name, "delay_if")?)
                        }
                    };
                    let timer = conditional_delayed_execution(process, condition, delay);
                    description.add_action(timer);
                }
                None => description.add_action(process),
            }
        }

        Ok(description)
    }

    fn build_process(
        &self,
        name: &str,
        node: &NodeConfig,
    ) -> Result<ExecuteProcess, LaunchFileError> {
        if node.executable.trim().is_empty() {
            return Err(LaunchFileError::Validation(format!(
                "Node '{}': 'executable' must not be empty",
                name
            )));
        }

        let executable = self.template(&node.executable, name, "executable")?;
        let mut process = ExecuteProcess::new(name, executable);

        for (i, arg) in node.args.iter().enumerate() {
            let arg = self.template(arg, name, &format!("args[{}]", i))?;
            process = process.with_argument(arg);
        }

        // Global env first, node env overrides
        for (key, value) in self.env.iter().chain(node.env.iter()) {
            let value = self.template(value, name, &format!("env.{}", key))?;
            process = process.with_env(key.clone(), value);
        }

        if let Some(dir) = &node.working_dir {
            process = process.with_working_dir(self.template(dir, name, "working_dir")?);
        }

        Ok(process)
    }

    /// Parse a template and check that every argument it uses is declared
    fn template(
        &self,
        input: &str,
        node: &str,
        field: &str,
    ) -> Result<Vec<Substitution>, LaunchFileError> {
        let fragments = parse_template(input).map_err(|e| LaunchFileError::Template {
            context: format!("node '{}' {}", node, field),
            source: e,
        })?;

        for fragment in &fragments {
            for arg in fragment.referenced_args() {
                if !self.args.contains_key(arg) {
                    return Err(LaunchFileError::Validation(format!(
                        "Node '{}': {} references undeclared argument '{}'",
                        node, field, arg
                    )));
                }
            }
        }

        Ok(fragments)
    }
}

/// Errors that can occur when loading a launch file
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse launch file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid argument declaration: {0}")]
    Argument(#[from] ArgumentError),

    #[error("Invalid substitution in {context}: {source}")]
    Template {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Validation error: {0}")]
    Validation(String),
}
