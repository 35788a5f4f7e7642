//! End-to-end job scenarios against the scripted mock channel.
//!
//! Time is paused, so the 65-second scenarios run instantly.
//! Run with: cargo test --test job_controller_tests

use review_coordinator::channel::mock::{MockChannel, MockScript};
use review_coordinator::channel::ChannelFrame;
use review_coordinator::events::{CoordinatorEvent, EventBus, EventKind};
use review_coordinator::job::{AsyncJobController, JobConfig, JobRequest, JobState};
use review_coordinator::CoordinatorError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

fn job_config() -> JobConfig {
    JobConfig {
        endpoint_url: "ws://jobs.test/".into(),
        ..Default::default()
    }
}

fn request() -> JobRequest {
    JobRequest::new("Science", "Build a volcano model", "grade-5")
}

fn result_frame(project_id: &str) -> String {
    json!({
        "statusCode": 200,
        "body": {"action_response": {"response": {"project": {
            "project_id": project_id,
            "project_title": "Volcanoes",
            "stages": []
        }}}}
    })
    .to_string()
}

fn setup(scripts: Vec<MockScript>) -> (Arc<MockChannel>, AsyncJobController, Arc<EventBus>) {
    let channel = Arc::new(MockChannel::with_scripts(scripts));
    let bus = Arc::new(EventBus::default());
    let controller =
        AsyncJobController::new(job_config(), channel.clone()).with_emitter(bus.clone());
    (channel, controller, bus)
}

fn drain(rx: &mut broadcast::Receiver<CoordinatorEvent>) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

// ============================================================================
// Scenario 1: no response → timeout
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_channel_times_out_at_threshold() {
    let (channel, mut ctrl, bus) = setup(vec![MockScript::silent()]);
    let mut events = bus.subscribe();

    let started = Instant::now();
    ctrl.start(request()).unwrap();
    assert_eq!(ctrl.run_until_settled().await, JobState::TimedOut);

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(64), "fired early: {:?}", elapsed);
    assert!(elapsed <= Duration::from_secs(66), "fired late: {:?}", elapsed);

    assert_eq!(ctrl.snapshot().elapsed_secs, 65);
    assert!(matches!(
        ctrl.last_error(),
        Some(CoordinatorError::Timeout { elapsed_secs: 65 })
    ));
    assert!(ctrl.resources().all_released());
    assert_eq!(channel.live_connections().await, 0);

    let kinds = drain(&mut events);
    let warning = kinds
        .iter()
        .find_map(|k| match k {
            EventKind::JobWarning {
                elapsed_secs,
                remaining_secs,
                ..
            } => Some((*elapsed_secs, *remaining_secs)),
            _ => None,
        })
        .expect("warning emitted");
    assert_eq!(warning, (55, 10));
    assert!(kinds
        .iter()
        .any(|k| matches!(k, EventKind::JobTimedOut { elapsed_secs: 65, .. })));
    // No automatic retry after a timeout
    assert_eq!(channel.open_calls().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_result_does_not_change_timed_out_job() {
    let (_channel, mut ctrl, _bus) = setup(vec![MockScript::Frames(vec![
        (
            Duration::from_secs(1),
            ChannelFrame::Message(r#"{"type":"connected"}"#.into()),
        ),
        (Duration::from_secs(70), ChannelFrame::Message(result_frame("late"))),
    ])]);

    ctrl.start(request()).unwrap();
    assert_eq!(ctrl.run_until_settled().await, JobState::TimedOut);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ctrl.poll_signals(), JobState::TimedOut);
    assert!(ctrl.result().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_manual_retry_after_timeout_then_success() {
    let (channel, mut ctrl, _bus) = setup(vec![
        MockScript::silent(),
        MockScript::reply_after(Duration::from_secs(5), result_frame("p-7")),
    ]);

    let job_id = ctrl.start(request()).unwrap();
    assert_eq!(ctrl.run_until_settled().await, JobState::TimedOut);

    ctrl.retry().unwrap();
    assert_eq!(ctrl.state(), JobState::Connecting);
    assert_eq!(ctrl.run_until_settled().await, JobState::Succeeded);
    assert_eq!(ctrl.snapshot().job_id, Some(job_id));
    assert_eq!(ctrl.result().unwrap().value["project_id"], "p-7");
    assert_eq!(channel.open_calls().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_retry_is_not_auto_retried() {
    let (channel, mut ctrl, _bus) = setup(vec![
        MockScript::silent(),
        MockScript::error_after(Duration::from_secs(1), "connection reset"),
    ]);

    ctrl.start(request()).unwrap();
    assert_eq!(ctrl.run_until_settled().await, JobState::TimedOut);
    ctrl.retry().unwrap();

    assert_eq!(ctrl.run_until_settled().await, JobState::Failed);
    assert!(matches!(
        ctrl.last_error(),
        Some(CoordinatorError::Transport(_))
    ));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(channel.open_calls().await.len(), 2);
}

// ============================================================================
// Scenario 2: result at 12s
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_result_at_twelve_seconds_succeeds() {
    let (channel, mut ctrl, bus) = setup(vec![MockScript::reply_after(
        Duration::from_secs(12),
        result_frame("p-12"),
    )]);
    let mut events = bus.subscribe();

    let job_id = ctrl.start(request()).unwrap();
    assert_eq!(ctrl.run_until_settled().await, JobState::Succeeded);
    assert_eq!(ctrl.attempt(), 0);
    assert!(ctrl.resources().all_released());
    assert_eq!(channel.live_connections().await, 0);

    let project = ctrl.result().cloned().unwrap().into_project().unwrap();
    assert_eq!(project.project_id, "p-12");
    assert_eq!(project.project_title, "Volcanoes");

    let kinds = drain(&mut events);
    let transitions: Vec<_> = kinds
        .iter()
        .filter_map(|k| match k {
            EventKind::JobStateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![JobState::Connecting, JobState::Running, JobState::Succeeded]
    );
    let ticks = kinds
        .iter()
        .filter(|k| matches!(k, EventKind::JobTick { .. }))
        .count();
    assert!((11..=12).contains(&ticks), "ticks: {}", ticks);
    assert!(!kinds.iter().any(|k| matches!(k, EventKind::JobWarning { .. })));
    assert!(kinds.iter().any(
        |k| matches!(k, EventKind::JobSucceeded { job_id: id, .. } if *id == job_id)
    ));
}

// ============================================================================
// Scenarios 3 and 4: bounded automatic retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_transport_errors_then_success() {
    let (channel, mut ctrl, bus) = setup(vec![
        MockScript::error_after(Duration::from_secs(1), "connection reset"),
        MockScript::FailOpen("connection refused".into()),
        MockScript::reply_after(Duration::from_secs(3), result_frame("p-3")),
    ]);
    let mut events = bus.subscribe();

    ctrl.start(request()).unwrap();
    assert_eq!(ctrl.run_until_settled().await, JobState::Succeeded);
    assert_eq!(ctrl.attempt(), 0);
    assert_eq!(channel.open_calls().await.len(), 3);

    let retries: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|k| match k {
            EventKind::JobRetryScheduled {
                attempt,
                max_auto_retries,
                delay_secs,
                ..
            } => Some((attempt, max_auto_retries, delay_secs)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(1, 2, 2), (2, 2, 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_for_delay() {
    let (channel, mut ctrl, _bus) = setup(vec![
        MockScript::FailOpen("connection refused".into()),
        MockScript::silent(),
    ]);

    ctrl.start(request()).unwrap();
    assert_eq!(ctrl.process_next().await, Some(JobState::Connecting));
    assert!(ctrl.snapshot().retry_pending);
    assert_eq!(ctrl.attempt(), 1);

    tokio::time::sleep(Duration::from_millis(1900)).await;
    ctrl.poll_signals();
    assert_eq!(channel.open_calls().await.len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    ctrl.poll_signals();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(channel.open_calls().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_third_transport_error_fails_without_further_retry() {
    let (channel, mut ctrl, bus) = setup(vec![
        MockScript::error_after(Duration::from_secs(1), "reset 0"),
        MockScript::error_after(Duration::from_secs(1), "reset 1"),
        MockScript::error_after(Duration::from_secs(1), "reset 2"),
        MockScript::reply_after(Duration::from_secs(1), result_frame("never")),
    ]);
    let mut events = bus.subscribe();

    ctrl.start(request()).unwrap();
    assert_eq!(ctrl.run_until_settled().await, JobState::Failed);
    assert_eq!(
        ctrl.last_error(),
        Some(&CoordinatorError::Transport("reset 2".into()))
    );
    assert!(ctrl.resources().all_released());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ctrl.poll_signals(), JobState::Failed);
    assert_eq!(channel.open_calls().await.len(), 3);
    assert_eq!(channel.live_connections().await, 0);

    let kinds = drain(&mut events);
    let scheduled = kinds
        .iter()
        .filter(|k| matches!(k, EventKind::JobRetryScheduled { .. }))
        .count();
    assert_eq!(scheduled, 2);
    assert!(kinds
        .iter()
        .any(|k| matches!(k, EventKind::JobFailed { error_kind, .. } if error_kind == "transport")));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_during_retry_delay_stops_retries() {
    let (channel, mut ctrl, _bus) = setup(vec![MockScript::FailOpen("refused".into())]);

    ctrl.start(request()).unwrap();
    ctrl.process_next().await;
    assert!(ctrl.snapshot().retry_pending);

    ctrl.cancel();
    assert_eq!(ctrl.state(), JobState::Cancelled);
    assert_eq!(ctrl.attempt(), 0);
    assert!(ctrl.resources().all_released());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(ctrl.poll_signals(), JobState::Cancelled);
    assert_eq!(channel.open_calls().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_connecting_closes_late_handle() {
    let (channel, mut ctrl, _bus) = setup(vec![MockScript::HangOpen]);

    ctrl.start(request()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    ctrl.cancel();
    assert_eq!(ctrl.state(), JobState::Cancelled);
    assert_eq!(channel.live_connections().await, 0);
    assert_eq!(ctrl.process_next().await, None);
}
