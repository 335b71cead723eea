//! Launch service - resolves arguments, schedules actions and manages processes

use crate::action::{Action, ActionError, LaunchDescription};
use crate::arguments::ArgumentError;
use crate::config::{LaunchContext, SubstitutionError};
use crate::runtime::process::{EventSender, ManagedProcess, ProcessError, ProcessEvent};
use indexmap::IndexMap;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Launch service configuration
#[derive(Debug, Clone)]
pub struct LaunchServiceConfig {
    /// Shutdown timeout per process
    pub shutdown_timeout: Duration,
    /// Environment overrides visible to `$(env ...)` substitutions
    pub env: HashMap<String, String>,
}

impl Default for LaunchServiceConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
            env: HashMap::new(),
        }
    }
}

/// Runs a launch description
pub struct LaunchService {
    config: LaunchServiceConfig,
    description: LaunchDescription,
    context: LaunchContext,
    processes: IndexMap<String, ManagedProcess>,
    event_tx: EventSender,
    event_rx: mpsc::UnboundedReceiver<(String, ProcessEvent)>,
}

/// Launch plan for dry-run mode
#[derive(Debug)]
pub struct LaunchPlan {
    /// Resolved arguments, in declaration order
    pub args: IndexMap<String, String>,
    /// Actions in start order
    pub steps: Vec<PlannedStep>,
}

/// An action and the offset from launch start at which it runs
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub at: Duration,
    pub action: String,
}

/// An action waiting in the schedule
struct Pending {
    due: Duration,
    seq: u64,
    action: Action,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Min-heap of pending actions, FIFO among actions due at the same time
#[derive(Default)]
struct Schedule {
    heap: BinaryHeap<Reverse<Pending>>,
    next_seq: u64,
}

impl Schedule {
    fn push(&mut self, due: Duration, action: Action) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Pending { due, seq, action }));
    }

    fn pop(&mut self) -> Option<Pending> {
        self.heap.pop().map(|Reverse(pending)| pending)
    }
}

impl LaunchService {
    /// Create a service, resolving top-level argument declarations
    ///
    /// Each declared argument takes its override if one is given, otherwise
    /// its default. Overrides for undeclared arguments are rejected.
    pub fn new(
        description: LaunchDescription,
        config: LaunchServiceConfig,
        arg_overrides: HashMap<String, String>,
    ) -> Result<Self, LaunchError> {
        let mut context = LaunchContext::new().with_envs(config.env.clone());

        for decl in description.declared_arguments() {
            let value = decl.resolve(arg_overrides.get(decl.name()).map(String::as_str))?;
            log::debug!("Argument '{}' = '{}'", decl.name(), value);
            context.set_arg(decl.name(), value);
        }

        for name in arg_overrides.keys() {
            if !context.args.contains_key(name) {
                return Err(LaunchError::UnknownArgument(name.clone()));
            }
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            description,
            context,
            processes: IndexMap::new(),
            event_tx,
            event_rx,
        })
    }

    /// The context substitutions are resolved against
    pub fn context(&self) -> &LaunchContext {
        &self.context
    }

    /// Generate a launch plan (for dry-run mode)
    ///
    /// Timer periods are evaluated; opaque functions are listed but not run.
    pub fn plan(&self) -> Result<LaunchPlan, LaunchError> {
        let mut steps = Vec::new();
        self.plan_actions(self.description.entities(), Duration::ZERO, &mut steps)?;
        steps.sort_by_key(|step| step.at);

        let args = self
            .description
            .declared_arguments()
            .filter_map(|decl| {
                self.context
                    .args
                    .get(decl.name())
                    .map(|value| (decl.name().to_string(), value.clone()))
            })
            .collect();

        Ok(LaunchPlan { args, steps })
    }

    fn plan_actions(
        &self,
        actions: &[Action],
        at: Duration,
        steps: &mut Vec<PlannedStep>,
    ) -> Result<(), LaunchError> {
        for action in actions {
            match action {
                Action::DeclareArgument(_) => continue,
                Action::Timer(timer) => {
                    let period = timer
                        .period(&self.context)
                        .map_err(|e| LaunchError::Action {
                            context: action.to_string(),
                            source: e,
                        })?;
                    let due = at
                        .checked_add(period)
                        .ok_or_else(|| LaunchError::DelayOverflow(action.to_string()))?;
                    self.plan_actions(timer.actions(), due, steps)?;
                }
                Action::ExecuteProcess(process) => {
                    let config =
                        process
                            .resolve(&self.context)
                            .map_err(|e| LaunchError::Substitution {
                                context: format!("process '{}'", process.name),
                                source: e,
                            })?;
                    let command: Vec<&str> = std::iter::once(config.executable.as_str())
                        .chain(config.args.iter().map(String::as_str))
                        .collect();
                    steps.push(PlannedStep {
                        at,
                        action: format!("execute '{}': {}", config.name, command.join(" ")),
                    });
                }
                other => steps.push(PlannedStep {
                    at,
                    action: other.to_string(),
                }),
            }
        }
        Ok(())
    }

    /// Run all actions in due-time order
    ///
    /// Returns once every scheduled action has run or shutdown is signalled.
    /// Launched processes keep running; see [`wait`](Self::wait) and
    /// [`shutdown`](Self::shutdown).
    pub async fn launch(
        &mut self,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> Result<(), LaunchError> {
        let start = Instant::now();
        let mut schedule = Schedule::default();
        for action in self.description.entities().to_vec() {
            schedule.push(Duration::ZERO, action);
        }

        log::info!("Launching {} actions...", schedule.heap.len());

        while let Some(pending) = schedule.pop() {
            if shutdown_rx.has_changed().unwrap_or(false) {
                log::info!("Shutdown requested, aborting launch");
                return Ok(());
            }

            let deadline = start.checked_add(pending.due).ok_or_else(|| {
                LaunchError::DelayOverflow(format!("{}s after launch start", pending.due.as_secs()))
            })?;
            if deadline > Instant::now() {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    Ok(()) = shutdown_rx.changed() => {
                        log::info!("Shutdown requested, aborting launch");
                        return Ok(());
                    }
                }
            }

            self.execute(pending.action, pending.due, &mut schedule).await?;
        }

        log::info!("All actions launched");
        Ok(())
    }

    async fn execute(
        &mut self,
        action: Action,
        due: Duration,
        schedule: &mut Schedule,
    ) -> Result<(), LaunchError> {
        match action {
            Action::DeclareArgument(decl) => {
                log::debug!("Argument '{}' declared", decl.name());
            }
            Action::Timer(timer) => {
                let period = timer
                    .period(&self.context)
                    .map_err(|e| LaunchError::Action {
                        context: format!("timer {}", timer.period_expression()),
                        source: e,
                    })?;
                let child_due = due.checked_add(period).ok_or_else(|| {
                    LaunchError::DelayOverflow(format!("timer {}", timer.period_expression()))
                })?;
                log::debug!(
                    "Timer scheduled {} action(s) in {:?}",
                    timer.actions().len(),
                    period
                );
                for child in timer.actions() {
                    schedule.push(child_due, child.clone());
                }
            }
            Action::ExecuteProcess(process) => {
                let config =
                    process
                        .resolve(&self.context)
                        .map_err(|e| LaunchError::Substitution {
                            context: format!("process '{}'", process.name),
                            source: e,
                        })?;

                if self.processes.contains_key(&config.name) {
                    return Err(LaunchError::DuplicateProcess(config.name));
                }

                let name = config.name.clone();
                let mut managed =
                    ManagedProcess::new(config).with_event_sender(self.event_tx.clone());
                managed
                    .start()
                    .await
                    .map_err(|e| LaunchError::ProcessFailed {
                        node: name.clone(),
                        source: e,
                    })?;
                self.processes.insert(name, managed);
            }
            Action::LogInfo(message) => {
                let text = self
                    .context
                    .perform(&message)
                    .map_err(|e| LaunchError::Substitution {
                        context: "log message".to_string(),
                        source: e,
                    })?;
                log::info!("{}", text);
            }
            Action::OpaqueFunction(function) => {
                log::debug!("Running opaque function '{}'", function.name());
                for produced in function.call(&self.context) {
                    schedule.push(due, produced);
                }
            }
        }
        Ok(())
    }

    /// Wait for all processes or shutdown signal
    pub async fn wait(&mut self, mut shutdown_rx: watch::Receiver<()>) {
        loop {
            tokio::select! {
                Ok(()) = shutdown_rx.changed() => {
                    log::info!("Shutdown signal received");
                    break;
                }

                Some((name, event)) = self.event_rx.recv() => {
                    match event {
                        ProcessEvent::Output { line, is_stderr } => {
                            if is_stderr {
                                log::warn!("[{}] {}", name, line);
                            } else {
                                log::info!("[{}] {}", name, line);
                            }
                        }
                        ProcessEvent::Exited { code } => {
                            log::info!("[{}] Process exited with code: {:?}", name, code);
                        }
                        ProcessEvent::Failed { error } => {
                            log::error!("[{}] Process failed: {}", name, error);
                        }
                        ProcessEvent::Started { pid } => {
                            log::info!("[{}] Process started with PID: {}", name, pid);
                        }
                    }
                }

                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    let all_stopped = self
                        .processes
                        .values_mut()
                        .all(|process| !process.check_status().is_running());
                    if all_stopped {
                        log::info!("All processes have stopped");
                        break;
                    }
                }
            }
        }
    }

    /// Shutdown all processes in reverse start order
    pub async fn shutdown(&mut self) {
        log::info!("Shutting down all processes...");

        for (name, process) in self.processes.iter_mut().rev() {
            if process.check_status().is_running() {
                if let Err(e) = process.stop(self.config.shutdown_timeout).await {
                    log::error!("[{}] Error stopping process: {}", name, e);
                }
            }
        }

        log::info!("All processes shut down");
    }

    /// Names of launched processes with their current status
    pub fn status(&mut self) -> Vec<(String, crate::runtime::ProcessStatus)> {
        self.processes
            .iter_mut()
            .map(|(name, process)| (name.clone(), process.check_status()))
            .collect()
    }
}

/// Errors that can occur while launching
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Argument error: {0}")]
    Argument(#[from] ArgumentError),

    #[error("Action failed ({context}): {source}")]
    Action {
        context: String,
        #[source]
        source: ActionError,
    },

    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Delay does not fit the launch schedule: {0}")]
    DelayOverflow(String),

    #[error("Process '{0}' was already launched")]
    DuplicateProcess(String),

    #[error("Process failed for node '{node}': {source}")]
    ProcessFailed {
        node: String,
        #[source]
        source: ProcessError,
    },
}

/// Display the launch plan in a human-readable format
impl fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;

        if !self.args.is_empty() {
            writeln!(f, "Arguments:")?;
            for (key, value) in &self.args {
                writeln!(f, "  {}: {}", key, value)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Actions (in start order):")?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "  {}. +{:.3}s {}", i + 1, step.at.as_secs_f64(), step.action)?;
        }

        Ok(())
    }
}
