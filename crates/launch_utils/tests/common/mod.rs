//! Test helpers for launch scenarios

#![allow(dead_code)]

use launch_utils::{Action, LaunchContext, OpaqueFunction};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Initialise logging once for the test binary
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records the order in which opaque functions run
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    /// An opaque function that records `label` when run
    pub fn mark(&self, label: &str) -> Action {
        let events = self.events.clone();
        let label = label.to_string();
        Action::OpaqueFunction(OpaqueFunction::new(label.clone(), move |_| {
            events.lock().unwrap().push(label.clone());
            Vec::new()
        }))
    }

    /// An opaque function that records the value of a launch argument
    pub fn capture_arg(&self, arg: &str) -> Action {
        let events = self.events.clone();
        let arg = arg.to_string();
        Action::OpaqueFunction(OpaqueFunction::new(
            format!("capture {}", arg),
            move |ctx: &LaunchContext| {
                let value = ctx.resolve_arg(&arg).unwrap_or_else(|e| e.to_string());
                events.lock().unwrap().push(format!("{}={}", arg, value));
                Vec::new()
            },
        ))
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

/// A shutdown channel whose sender is kept alive by the caller
pub fn shutdown_channel() -> (watch::Sender<()>, watch::Receiver<()>) {
    watch::channel(())
}
