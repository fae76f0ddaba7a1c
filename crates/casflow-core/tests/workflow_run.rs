//! End-to-end workflow runs against the in-memory resource backend.

use std::sync::Arc;
use std::time::Duration;

use casflow_core::resource::memory::InMemoryResourceBackend;
use casflow_core::workflow::activity::{ActivityError, ActivityExecutor};
use casflow_core::workflow::definition::parse_workflow_yaml;
use casflow_core::workflow::orchestrator::{Orchestrator, RunFailure, WorkflowOutcome};
use casflow_types::config::{PollingConfig, RetryPolicy};
use serde_json::json;

const LIVE_HOOKS_TO_ABR: &str = r#"
name: live-hooks-to-abr
activities:
  - name: abr
    type: api_call
    request:
      method: POST
      path: /media_stream_to_abr_converter
      body:
        media_stream_input_params: "{{ live_hook.result.meta.resource_id }}"
        hls_abr_settings:
          variants:
            - video_width: 1280
              video_height: 720
    completenessCondition: "{{ meta.status }} == 'created'"
  - name: live_hook
    type: api_call
    request:
      method: POST
      path: /live_hooks
      body:
        sender_ip: "10.0.0.1"
        sender_port: 5000
    completenessCondition: "{{ meta.status }} == 'created'"
"#;

fn orchestrator(backend: &Arc<InMemoryResourceBackend>, max_attempts: u32) -> Orchestrator<InMemoryResourceBackend> {
    let executor = ActivityExecutor::new(Arc::clone(backend), "http://cas.test", PollingConfig::default())
        .expect("valid base url");
    Orchestrator::new(
        executor,
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        },
    )
}

#[tokio::test]
async fn dependent_activity_runs_after_and_receives_resolved_id() {
    let backend = Arc::new(InMemoryResourceBackend::new());
    let def = parse_workflow_yaml(LIVE_HOOKS_TO_ABR).unwrap();

    let outcome = orchestrator(&backend, 2).run(&def, "run-e2e").await;
    let results = match outcome {
        WorkflowOutcome::Succeeded { results, .. } => results,
        other => panic!("expected success, got {other:?}"),
    };

    let posted = backend.posted();
    assert_eq!(posted.len(), 2);
    assert_eq!(posted[0].activity, "live_hook", "dependency posts first");
    assert_eq!(posted[1].activity, "abr");

    let live_hook_url = &results["live_hook"];
    let live_hook_id = live_hook_url.rsplit('/').next().unwrap();
    assert_eq!(posted[1].body["media_stream_input_params"], json!(live_hook_id));
    assert_eq!(posted[1].body["hls_abr_settings"]["variants"][0]["video_width"], json!(1280));
    assert!(results["abr"].starts_with("http://cas.test/media_stream_to_abr_converter/"));
}

#[tokio::test]
async fn rerunning_with_same_run_id_creates_nothing_new() {
    let backend = Arc::new(InMemoryResourceBackend::new());
    let def = parse_workflow_yaml(LIVE_HOOKS_TO_ABR).unwrap();
    let orch = orchestrator(&backend, 2);

    let first = orch.run(&def, "run-idem").await;
    let second = orch.run(&def, "run-idem").await;
    assert!(first.is_success() && second.is_success());
    assert_eq!(backend.create_count(), 2, "one POST per activity across both runs");

    match (first, second) {
        (WorkflowOutcome::Succeeded { results: a, .. }, WorkflowOutcome::Succeeded { results: b, .. }) => {
            assert_eq!(a, b)
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn failing_activity_deletes_everything_created() {
    let backend = Arc::new(InMemoryResourceBackend::new());
    backend.fail_creates("media_stream_to_abr_converter", 500);
    let def = parse_workflow_yaml(LIVE_HOOKS_TO_ABR).unwrap();

    let outcome = orchestrator(&backend, 1).run(&def, "run-fail").await;
    match &outcome {
        WorkflowOutcome::Failed {
            cause: RunFailure::Activity { activity, error },
            cleanup_performed,
            cleanup_error,
            ..
        } => {
            assert_eq!(activity, "abr");
            assert!(matches!(error, ActivityError::Creation(_)));
            assert!(*cleanup_performed);
            assert!(cleanup_error.is_none());
        }
        other => panic!("expected activity failure, got {other:?}"),
    }

    assert_eq!(backend.delete_count(), 1);
    assert!(backend.deleted_paths()[0].starts_with("/live_hooks/"));
    assert_eq!(backend.resource_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn retryable_creation_failure_is_retried_by_host_policy() {
    let backend = Arc::new(InMemoryResourceBackend::new());
    backend.fail_creates("live_hooks", 503);
    let def = parse_workflow_yaml(LIVE_HOOKS_TO_ABR).unwrap();

    let outcome = orchestrator(&backend, 2).run(&def, "run-retry").await;
    assert!(!outcome.is_success());
    // Two attempts of live_hook, each one lookup and one create, then one
    // cleanup lookup that finds nothing to delete.
    assert_eq!(backend.lookup_count(), 3);
    assert_eq!(backend.create_count(), 2);
    assert_eq!(backend.delete_count(), 0);
    assert!(backend.posted().iter().all(|p| p.activity == "live_hook"));
}

#[tokio::test(start_paused = true)]
async fn slow_provisioning_is_polled_with_backoff() {
    let backend = Arc::new(InMemoryResourceBackend::new().with_reads_until_created(3));
    let def = parse_workflow_yaml(
        r#"
name: single
activities:
  - name: only
    request: { method: POST, path: /things, body: {} }
    completenessCondition: "{{ meta.status }} == 'created'"
"#,
    )
    .unwrap();

    let start = tokio::time::Instant::now();
    let outcome = orchestrator(&backend, 1).run(&def, "run-poll").await;
    assert!(outcome.is_success());
    assert_eq!(backend.fetch_count(), 3);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16), "{elapsed:?}");
}

#[tokio::test]
async fn unsupported_condition_value_fails_run_without_retry() {
    let backend = Arc::new(InMemoryResourceBackend::new());
    let def = parse_workflow_yaml(
        r#"
name: typed
activities:
  - name: counter
    request: { method: POST, path: /counters, body: { count: 5 } }
    completenessCondition: "{{ count }} == 'five'"
"#,
    )
    .unwrap();

    let outcome = orchestrator(&backend, 3).run(&def, "run-typed").await;
    match outcome {
        WorkflowOutcome::Failed {
            cause: RunFailure::Activity { error, .. },
            ..
        } => assert!(matches!(error, ActivityError::UnsupportedValueType { .. })),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(backend.create_count(), 1, "non-retryable: one attempt only");
    // The counter was created before its condition failed, so cleanup
    // finds it by correlation and deletes it.
    assert_eq!(backend.lookup_count(), 2);
    assert_eq!(backend.delete_count(), 1);
    assert!(backend.deleted_paths()[0].starts_with("/counters/"));
    assert_eq!(backend.resource_count(), 0);
}
