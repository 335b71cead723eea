//! End-to-end launch scenarios: arguments, conditional timers and processes

mod common;

use common::{init_logging, shutdown_channel, Recorder};
use launch_utils::{
    conditional_delayed_execution, declare_argument, launch_value_if, Action, ExecuteProcess,
    LaunchDescription, LaunchFile, LaunchService, LaunchServiceConfig, ProcessStatus,
    Substitution,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

fn delayed_description(recorder: &Recorder, delay: f64) -> LaunchDescription {
    let use_delay =
        declare_argument("use_delay", "Delay the late action", Some("true"), None).unwrap();

    LaunchDescription::new()
        .with_action(Action::from(use_delay.clone()))
        .with_action(conditional_delayed_execution(
            vec![recorder.mark("late-1"), recorder.mark("late-2")],
            use_delay.value,
            delay,
        ))
        .with_action(recorder.mark("early"))
}

#[tokio::test]
async fn delayed_actions_run_after_undelayed_ones() {
    init_logging();
    let recorder = Recorder::default();
    let mut service = LaunchService::new(
        delayed_description(&recorder, 0.2),
        LaunchServiceConfig::default(),
        HashMap::new(),
    )
    .unwrap();

    let (_tx, rx) = shutdown_channel();
    let started = Instant::now();
    service.launch(rx).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(recorder.events(), vec!["early", "late-1", "late-2"]);
}

#[tokio::test]
async fn false_condition_skips_the_delay() {
    init_logging();
    let recorder = Recorder::default();
    let mut service = LaunchService::new(
        delayed_description(&recorder, 30.0),
        LaunchServiceConfig::default(),
        HashMap::from([("use_delay".to_string(), "False".to_string())]),
    )
    .unwrap();

    let (_tx, rx) = shutdown_channel();
    tokio::time::timeout(Duration::from_secs(5), service.launch(rx))
        .await
        .expect("launch should not wait for the delay")
        .unwrap();

    assert_eq!(recorder.events(), vec!["early", "late-1", "late-2"]);
}

#[tokio::test]
async fn shutdown_aborts_pending_timers() {
    init_logging();
    let recorder = Recorder::default();
    let mut service = LaunchService::new(
        delayed_description(&recorder, 30.0),
        LaunchServiceConfig::default(),
        HashMap::new(),
    )
    .unwrap();

    let (tx, rx) = shutdown_channel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(());
    });

    tokio::time::timeout(Duration::from_secs(5), service.launch(rx))
        .await
        .expect("shutdown should interrupt the timer")
        .unwrap();

    assert_eq!(recorder.events(), vec!["early"]);
}

#[tokio::test]
async fn opaque_functions_see_resolved_arguments() {
    init_logging();
    let recorder = Recorder::default();
    let mode = declare_argument("mode", "", Some("sim"), Some(&["sim", "real"])).unwrap();
    let description = LaunchDescription::new()
        .with_action(Action::from(mode))
        .with_action(recorder.capture_arg("mode"));

    let mut service = LaunchService::new(
        description,
        LaunchServiceConfig::default(),
        HashMap::from([("mode".to_string(), "real".to_string())]),
    )
    .unwrap();

    let (_tx, rx) = shutdown_channel();
    service.launch(rx).await.unwrap();

    assert_eq!(recorder.events(), vec!["mode=real"]);
}

#[tokio::test]
async fn nested_timers_accumulate_delays() {
    init_logging();
    let recorder = Recorder::default();
    let inner = conditional_delayed_execution(recorder.mark("inner"), true, 0.1);
    let outer = conditional_delayed_execution(
        vec![Action::from(inner), recorder.mark("outer")],
        "TRUE",
        0.1,
    );
    let description = LaunchDescription::new()
        .with_action(outer)
        .with_action(recorder.mark("first"));

    let service = LaunchService::new(
        description.clone(),
        LaunchServiceConfig::default(),
        HashMap::new(),
    )
    .unwrap();
    let plan = service.plan().unwrap();
    let offsets: Vec<_> = plan.steps.iter().map(|s| s.at).collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_secs_f64(0.1),
            Duration::from_secs_f64(0.1) + Duration::from_secs_f64(0.1),
        ]
    );

    let mut service =
        LaunchService::new(description, LaunchServiceConfig::default(), HashMap::new()).unwrap();
    let (_tx, rx) = shutdown_channel();
    service.launch(rx).await.unwrap();
    assert_eq!(recorder.events(), vec!["first", "outer", "inner"]);
}

#[cfg(unix)]
#[tokio::test]
async fn processes_start_with_substituted_arguments() {
    init_logging();
    let verbose = declare_argument("verbose", "", Some("true"), None).unwrap();
    let description = LaunchDescription::new()
        .with_action(Action::from(verbose.clone()))
        .with_action(
            ExecuteProcess::new("echo", "sh")
                .with_argument("-c")
                .with_argument("echo $LEVEL")
                .with_env(
                    "LEVEL",
                    launch_value_if(verbose.value.clone(), "debug", "info", true),
                ),
        );

    let mut service =
        LaunchService::new(description, LaunchServiceConfig::default(), HashMap::new()).unwrap();
    let (_tx, rx) = shutdown_channel();
    service.launch(rx.clone()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), service.wait(rx))
        .await
        .expect("short-lived process should exit");

    let status = service.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].0, "echo");
    assert_eq!(status[0].1, ProcessStatus::Stopped(Some(0)));

    service.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_stops_running_processes() {
    init_logging();
    let description = LaunchDescription::new()
        .with_action(ExecuteProcess::new("sleeper", "sleep").with_argument("30"));

    let config = LaunchServiceConfig {
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let mut service = LaunchService::new(description, config, HashMap::new()).unwrap();
    let (_tx, rx) = shutdown_channel();
    service.launch(rx).await.unwrap();
    assert!(service.status()[0].1.is_running());

    service.shutdown().await;
    assert!(service.status()[0].1.is_stopped());
}

#[tokio::test]
async fn launch_file_round_trip() {
    init_logging();
    let yaml = r#"
version: "1.0"
args:
  use_delay:
    default: false
    choices: ["true", "false"]
  delay:
    default: 30
    description: "Seconds to wait before starting the camera"
print_args: true
nodes:
  camera:
    executable: "bin/camera"
    args: ["--delay", "$(arg delay)"]
    delay: "$(arg delay)"
    delay_if: "$(arg use_delay)"
"#;
    let description = LaunchFile::from_yaml(yaml).unwrap().to_description().unwrap();

    let service = LaunchService::new(
        description.clone(),
        LaunchServiceConfig::default(),
        HashMap::new(),
    )
    .unwrap();
    let plan = service.plan().unwrap();
    assert_eq!(plan.args["delay"], "30");
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.steps[0].action, "opaque function 'print_arguments'");
    assert_eq!(plan.steps[1].at, Duration::ZERO);
    assert_eq!(plan.steps[1].action, "execute 'camera': bin/camera --delay 30");

    let service = LaunchService::new(
        description,
        LaunchServiceConfig::default(),
        HashMap::from([("use_delay".to_string(), "true".to_string())]),
    )
    .unwrap();
    let plan = service.plan().unwrap();
    assert_eq!(plan.steps[1].at, Duration::from_secs(30));
}

#[test]
fn undefined_argument_in_timer_surfaces_at_plan_time() {
    let description = LaunchDescription::new().with_action(conditional_delayed_execution(
        Action::log_info("never"),
        Substitution::arg("missing"),
        1,
    ));
    let service =
        LaunchService::new(description, LaunchServiceConfig::default(), HashMap::new()).unwrap();
    assert!(service.plan().is_err());
}
