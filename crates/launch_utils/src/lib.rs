//! Launch Utils
//!
//! Helpers for composing ROS-style launch descriptions.
//!
//! # Overview
//!
//! - Declare launch arguments with defaults and allowed choices
//! - Delay actions by a period that only applies when a condition holds
//! - Choose between two values inline, depending on a launch-time condition
//! - Resolve the package a launch file belongs to
//! - Print declared argument values for diagnostics
//!
//! Conditions and delays are not evaluated when the description is built.
//! They are assembled into deferred [`Expression`]s and evaluated by the
//! [`LaunchService`] once argument values are known.
//!
//! # Example
//!
//! ```
//! use launch_utils::{
//!     conditional_delayed_execution, declare_argument, Action, ExecuteProcess,
//!     LaunchDescription, LaunchService, LaunchServiceConfig,
//! };
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! let use_delay = declare_argument("use_delay", "Delay the driver", Some("true"), None).unwrap();
//!
//! let description = LaunchDescription::new()
//!     .with_action(Action::from(use_delay.clone()))
//!     .with_action(conditional_delayed_execution(
//!         ExecuteProcess::new("driver", "bin/driver"),
//!         use_delay.value,
//!         1.5,
//!     ));
//!
//! let service =
//!     LaunchService::new(description, LaunchServiceConfig::default(), HashMap::new()).unwrap();
//! let plan = service.plan().unwrap();
//! assert_eq!(plan.steps[0].at, Duration::from_millis(1500));
//! ```

pub mod action;
pub mod arguments;
pub mod config;
pub mod expression;
pub mod package;
pub mod runtime;

pub use action::{
    conditional_delayed_execution, launch_value_if, Action, ActionError, ExecuteProcess,
    IntoActions, LaunchDescription, OpaqueFunction, TimerAction,
};
pub use arguments::{
    declare_argument, print_arguments, print_arguments_action, write_arguments, ArgumentError,
    DeclareLaunchArgument, LaunchArgument, UNEVALUATED_PLACEHOLDER,
};
pub use config::{
    parse_template, IntoSubstitutions, LaunchContext, LaunchFile, LaunchFileError, Substitution,
    SubstitutionError,
};
pub use expression::{
    delay_expression, evaluate_text, inline_if_expression, Condition, Delay, Expression,
    ExpressionError, Value,
};
pub use package::{resolve_package_name, PackageError};
pub use runtime::{
    LaunchError, LaunchPlan, LaunchService, LaunchServiceConfig, ManagedProcess, PlannedStep,
    ProcessConfig, ProcessError, ProcessEvent, ProcessStatus,
};
