//! Functional tests for the request lifecycle against mocked collaborators

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use gen_worker_node::backend::{ComfyJobQueue, JobPoller};
use gen_worker_node::config::{BackendConfig, LivenessConfig, WorkflowConfig};
use gen_worker_node::node::{LivenessReporter, NodeState};
use gen_worker_node::orchestrator::RequestOrchestrator;
use gen_worker_node::response::ArtifactStore;
use gen_worker_node::safety::{Classification, SafetyClassifier};
use gen_worker_node::{AppError, Result};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nfake image body";

/// Classifier returning a fixed verdict. It remembers whether the node was in
/// flight when it ran and how many classifications ever ran at once.
struct RecordingClassifier {
    verdict: Classification,
    state: Arc<NodeState>,
    saw_in_flight: AtomicBool,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait]
impl SafetyClassifier for RecordingClassifier {
    async fn classify(&self, _image: &[u8]) -> Result<Classification> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.saw_in_flight
            .store(self.state.is_in_flight(), Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(self.verdict.clone())
    }
}

struct Harness {
    backend: MockServer,
    registry: MockServer,
    _output: TempDir,
    state: Arc<NodeState>,
    classifier: Arc<RecordingClassifier>,
    orchestrator: RequestOrchestrator,
}

async fn harness() -> Harness {
    harness_with_classifier_delay(Duration::ZERO).await
}

async fn harness_with_classifier_delay(delay: Duration) -> Harness {
    let backend = MockServer::start().await;
    let registry = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();
    std::fs::write(output.path().join("ComfyUI_00001_.png"), IMAGE).unwrap();

    let state = Arc::new(NodeState::default());

    let liveness_config = LivenessConfig {
        enabled: true,
        registry_url: format!("{}/register", registry.uri()),
        ip_discovery_url: format!("{}/ip", registry.uri()),
        interval_secs: 30,
        scheme: "http".to_string(),
        advertised_port: None,
    };
    let liveness = Arc::new(LivenessReporter::new(&liveness_config, 5002, state.clone()).unwrap());

    let backend_config = BackendConfig {
        url: backend.uri(),
        output_dir: output.path().to_string_lossy().to_string(),
        poll_interval_ms: 10,
        poll_timeout_secs: 5,
        request_timeout_ms: 2000,
    };
    let poller = JobPoller::new(
        Arc::new(ComfyJobQueue::new(&backend_config).unwrap()),
        backend_config.poll_interval(),
    )
    .with_deadline(backend_config.poll_deadline());

    let classifier = Arc::new(RecordingClassifier {
        verdict: Classification {
            concept: "safe".to_string(),
            has_nsfw_concept: false,
        },
        state: state.clone(),
        saw_in_flight: AtomicBool::new(false),
        delay,
        active: AtomicUsize::new(0),
        max_active: AtomicUsize::new(0),
    });

    let orchestrator = RequestOrchestrator::new(
        state.clone(),
        poller,
        ArtifactStore::new(output.path()),
        classifier.clone(),
        liveness,
        WorkflowConfig::default(),
    );

    Harness {
        backend,
        registry,
        _output: output,
        state,
        classifier,
        orchestrator,
    }
}

impl Harness {
    async fn expect_announcements(&self, count: u64) {
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.7"))
            .expect(count)
            .mount(&self.registry)
            .await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(200))
            .expect(count)
            .mount(&self.registry)
            .await;
    }

    async fn accept_submission(&self) {
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "job-1", "number": 0})),
            )
            .expect(1)
            .mount(&self.backend)
            .await;
    }

    async fn history_responds(&self, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/history/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.backend)
            .await;
    }

    fn assert_cleaned_up(&self, requests: u64) {
        assert!(!self.state.is_in_flight());
        assert_eq!(self.state.load().request_count(), requests);
    }
}

fn completed(filename: &str) -> serde_json::Value {
    json!({
        "job-1": {
            "status": {"status_str": "success", "completed": true, "messages": []},
            "outputs": {"9": {"images": [{"filename": filename, "subfolder": "", "type": "output"}]}}
        }
    })
}

#[tokio::test]
async fn test_end_to_end_success() {
    let h = harness().await;
    h.expect_announcements(1).await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({
            "prompt": {
                "6": {"inputs": {"text": "a cat"}},
                "27": {"inputs": {"width": 512, "height": 512}},
                "31": {"inputs": {"steps": 4}}
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "job-1"})))
        .expect(1)
        .mount(&h.backend)
        .await;
    h.history_responds(completed("ComfyUI_00001_.png")).await;

    let body = json!({"prompts": ["a cat"], "width": 512, "height": 512, "steps": 4}).to_string();
    let response = h.orchestrator.handle(body.as_bytes()).await.unwrap();

    assert_eq!(response.width, 512);
    assert_eq!(response.height, 512);
    assert!(!response.has_nsfw_concept);
    assert_eq!(response.concept, "safe");
    assert_eq!(response.prompt, "a cat");
    assert_eq!(response.seed, -1);
    assert_eq!(STANDARD.decode(&response.image).unwrap(), IMAGE);

    assert!(h.classifier.saw_in_flight.load(Ordering::SeqCst));
    h.assert_cleaned_up(1);
    h.registry.verify().await;
    h.backend.verify().await;
}

#[tokio::test]
async fn test_supplied_seed_is_submitted_and_echoed() {
    let h = harness().await;
    h.expect_announcements(1).await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({"prompt": {"31": {"inputs": {"seed": 42}}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "job-1"})))
        .expect(1)
        .mount(&h.backend)
        .await;
    h.history_responds(completed("ComfyUI_00001_.png")).await;

    let body = json!({"prompts": ["a dog"], "seed": 42}).to_string();
    let response = h.orchestrator.handle(body.as_bytes()).await.unwrap();

    assert_eq!(response.seed, 42);
    h.backend.verify().await;
}

#[tokio::test]
async fn test_pending_polls_until_completed() {
    let h = harness().await;
    h.expect_announcements(1).await;
    h.accept_submission().await;

    Mock::given(method("GET"))
        .and(path("/history/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&h.backend)
        .await;
    h.history_responds(completed("ComfyUI_00001_.png")).await;

    let response = h
        .orchestrator
        .handle(br#"{"prompts": ["a cat"]}"#)
        .await
        .unwrap();
    assert_eq!(response.width, 1024);

    let polls = h
        .backend
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/history/job-1")
        .count();
    assert_eq!(polls, 4);
}

#[tokio::test]
async fn test_generation_error_still_cleans_up() {
    let h = harness().await;
    h.expect_announcements(1).await;
    h.accept_submission().await;
    h.history_responds(json!({
        "job-1": {"status": {"status_str": "error", "completed": false}, "outputs": {}}
    }))
    .await;

    let err = h
        .orchestrator
        .handle(br#"{"prompts": ["a cat"]}"#)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Generation(_)));
    h.assert_cleaned_up(1);
    h.registry.verify().await;
}

#[tokio::test]
async fn test_rejected_submission_does_not_poll() {
    let h = harness().await;
    h.expect_announcements(1).await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid prompt"))
        .expect(1)
        .mount(&h.backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/history/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&h.backend)
        .await;

    let err = h
        .orchestrator
        .handle(br#"{"prompts": ["a cat"]}"#)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Submission(_)));
    h.assert_cleaned_up(1);
    h.registry.verify().await;
    h.backend.verify().await;
}

#[tokio::test]
async fn test_failed_poll_is_terminal() {
    let h = harness().await;
    h.expect_announcements(1).await;
    h.accept_submission().await;

    Mock::given(method("GET"))
        .and(path("/history/job-1"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&h.backend)
        .await;

    let err = h
        .orchestrator
        .handle(br#"{"prompts": ["a cat"]}"#)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::PollTransport(_)));
    h.assert_cleaned_up(1);
    h.backend.verify().await;
}

#[tokio::test]
async fn test_missing_artifact() {
    let h = harness().await;
    h.expect_announcements(1).await;
    h.accept_submission().await;
    h.history_responds(completed("not_written.png")).await;

    let err = h
        .orchestrator
        .handle(br#"{"prompts": ["a cat"]}"#)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ArtifactMissing(_)));
    h.assert_cleaned_up(1);
    h.registry.verify().await;
}

#[tokio::test]
async fn test_malformed_payload_is_not_processed() {
    let h = harness().await;
    h.expect_announcements(0).await;

    let err = h.orchestrator.handle(b"not json").await.unwrap_err();

    assert!(matches!(err, AppError::PayloadParse(_)));
    h.assert_cleaned_up(0);
    h.registry.verify().await;
}

#[tokio::test]
async fn test_registry_failure_does_not_affect_response() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.7"))
        .mount(&h.registry)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&h.registry)
        .await;
    h.accept_submission().await;
    h.history_responds(completed("ComfyUI_00001_.png")).await;

    let response = h.orchestrator.handle(br#"{"prompts": ["a cat"]}"#).await;

    assert!(response.is_ok());
    h.assert_cleaned_up(1);
    h.registry.verify().await;
}

#[tokio::test]
async fn test_concurrent_requests_are_processed_one_at_a_time() {
    let h = harness_with_classifier_delay(Duration::from_millis(100)).await;
    h.expect_announcements(2).await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "job-1"})))
        .expect(2)
        .mount(&h.backend)
        .await;
    h.history_responds(completed("ComfyUI_00001_.png")).await;

    let (first, second) = tokio::join!(
        h.orchestrator.handle(br#"{"prompts": ["one"]}"#),
        h.orchestrator.handle(br#"{"prompts": ["two"]}"#),
    );

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(h.classifier.max_active.load(Ordering::SeqCst), 1);
    h.assert_cleaned_up(2);
    h.registry.verify().await;
}

#[tokio::test]
async fn test_cancelled_request_still_cleans_up() {
    let h = harness().await;
    h.expect_announcements(1).await;
    h.accept_submission().await;
    // the job never leaves the queue
    h.history_responds(json!({})).await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        h.orchestrator.handle(br#"{"prompts": ["a cat"]}"#),
    )
    .await;
    assert!(outcome.is_err());

    h.assert_cleaned_up(1);

    // the announcement is handed to a background task
    for _ in 0..100 {
        let registered = h
            .registry
            .received_requests()
            .await
            .unwrap()
            .iter()
            .any(|r| r.url.path() == "/register");
        if registered {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    h.registry.verify().await;
}
