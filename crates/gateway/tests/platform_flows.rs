//! End-to-end flows: the agent tool loop, scheduler polling with
//! placeholder rendering, cascading workflow cancellation, webhook HMAC
//! firing, and conversation resumption.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use swb_domain::config::Config;
use swb_domain::error::Result as DomainResult;
use swb_domain::manifest::{ModuleManifest, ParamKind, Permission, ToolDefinition, ToolParameter};
use swb_domain::protocol::NotificationKind;
use swb_domain::tool::ToolCall;
use swb_gateway::runtime::agent_loop::{self, AgentEvent};
use swb_gateway::runtime::conversation::{ConversationKey, MessageKind};
use swb_gateway::runtime::scheduler::model::{
    JobStatus, JobType, OnComplete, PlatformContext, ScheduledJob,
};
use swb_gateway::runtime::scheduler::{SchedulerWorker, WorkflowStatus};
use swb_gateway::runtime::supervisor::container::StubRuntime;
use swb_gateway::state::AppState;
use swb_providers::{ChatRequest, LlmProvider, LlmResponse, LlmRouter, ProviderRegistry, StopReason};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// LLM provider that replays a scripted list of responses.
struct ScriptedLlm {
    patterns: Vec<String>,
    responses: Vec<LlmResponse>,
    calls: AtomicU32,
}

impl ScriptedLlm {
    fn new(responses: Vec<LlmResponse>) -> Arc<Self> {
        Arc::new(Self {
            patterns: vec!["*".into()],
            responses,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, _req: &ChatRequest) -> DomainResult<LlmResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let idx = n.min(self.responses.len() - 1);
        Ok(self.responses[idx].clone())
    }
    fn model_patterns(&self) -> &[String] {
        &self.patterns
    }
    fn provider_id(&self) -> &str {
        "scripted"
    }
}

fn text_response(content: &str) -> LlmResponse {
    LlmResponse {
        content: content.into(),
        stop_reason: StopReason::EndTurn,
        tool_calls: vec![],
        input_tokens: 10,
        output_tokens: 5,
        model: "scripted-model".into(),
    }
}

fn tool_response(call_id: &str, tool_name: &str, arguments: serde_json::Value) -> LlmResponse {
    LlmResponse {
        content: String::new(),
        stop_reason: StopReason::ToolUse,
        tool_calls: vec![ToolCall {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }],
        input_tokens: 10,
        output_tokens: 5,
        model: "scripted-model".into(),
    }
}

struct Harness {
    state: AppState,
    _state_dir: tempfile::TempDir,
}

fn harness(llm_responses: Vec<LlmResponse>) -> Harness {
    let state_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.server.state_path = state_dir.path().to_path_buf();
    config.supervisor.workspace_root = state_dir.path().join("workspaces");
    let config = Arc::new(config);

    let registry = Arc::new(ProviderRegistry::new(vec![ScriptedLlm::new(llm_responses)
        as Arc<dyn LlmProvider>]));
    let llm = Arc::new(LlmRouter::from_config(registry, &config.llm));
    let state = AppState::build(config, llm, StubRuntime::new(), None);
    Harness {
        state,
        _state_dir: state_dir,
    }
}

fn search_manifest() -> ModuleManifest {
    ModuleManifest {
        module_name: "research".into(),
        description: "Web research".into(),
        tools: vec![ToolDefinition {
            name: "research.web_search".into(),
            description: "Search the web".into(),
            parameters: vec![ToolParameter {
                name: "query".into(),
                kind: ParamKind::String,
                description: "Search query".into(),
                required: true,
                allowed_values: None,
            }],
            required_permission: Permission::User,
        }],
    }
}

fn base_job(job_type: JobType) -> ScheduledJob {
    ScheduledJob {
        id: Uuid::new_v4(),
        user_id: "u1".into(),
        workflow_id: None,
        name: None,
        description: None,
        job_type,
        check_config: serde_json::json!({}),
        interval_seconds: 60,
        max_attempts: None,
        max_runs: None,
        expires_at: None,
        attempts: 0,
        consecutive_failures: 0,
        runs_completed: 0,
        status: JobStatus::Active,
        next_run_at: Some(Utc::now() - chrono::Duration::seconds(1)),
        last_result: None,
        on_success_message: "done".into(),
        on_failure_message: None,
        on_complete: OnComplete::Notify,
        platform_context: PlatformContext {
            platform: "discord".into(),
            channel: "ch1".into(),
            thread: None,
            conversation_id: None,
        },
        result_summary_fields: None,
        status_message: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Happy tool loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_tool_loop_produces_paired_transcript() {
    let module = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tool_name": "research.web_search",
            "success": true,
            "result": [
                {"title": "Python Tutorial", "url": "https://docs.python.org/tutorial"},
                {"title": "Learn Python", "url": "https://learnpython.org"},
                {"title": "Real Python", "url": "https://realpython.com"},
            ],
        })))
        .expect(1)
        .mount(&module)
        .await;

    let h = harness(vec![
        tool_response(
            "call_1",
            "research.web_search",
            serde_json::json!({"query": "python tutorials"}),
        ),
        text_response("Top result: https://docs.python.org/tutorial"),
    ]);
    h.state.registry.insert_manifest(module.uri(), search_manifest());

    let key = ConversationKey {
        platform: "discord".into(),
        channel: "ch1".into(),
        thread: None,
    };
    let (conversation, _turn_id, mut rx) = agent_loop::handle_message(
        &h.state,
        "u1",
        &key,
        "search python tutorials".into(),
        None,
    )
    .await;

    let mut final_text = None;
    let mut tool_events = 0;
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::ToolCall { .. } | AgentEvent::ToolResult { .. } => tool_events += 1,
            AgentEvent::Final { content } => final_text = Some(content),
            AgentEvent::Error { message } => panic!("turn errored: {message}"),
            _ => {}
        }
    }
    assert_eq!(tool_events, 2);
    assert!(final_text.unwrap().contains("https://docs.python.org/tutorial"));

    let transcript = h.state.conversations.transcript(&conversation.id, true).await;
    let kinds: Vec<MessageKind> = transcript.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::UserText,
            MessageKind::ToolCall,
            MessageKind::ToolResult,
            MessageKind::AssistantText,
        ]
    );
    // The tool pair shares a correlation id.
    assert_eq!(transcript[1].call_id, transcript[2].call_id);
}

#[tokio::test]
async fn parallel_tool_results_keep_request_order() {
    let module = MockServer::start().await;

    /// Answers the first-received call slowly so completion order inverts
    /// request order.
    struct SlowFirst {
        calls: AtomicU32,
    }
    impl Respond for SlowFirst {
        fn respond(&self, req: &Request) -> ResponseTemplate {
            let call: ToolCall = serde_json::from_slice(&req.body).unwrap();
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = if n == 0 { 300 } else { 0 };
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_millis(delay))
                .set_body_json(serde_json::json!({
                    "tool_name": call.tool_name,
                    "success": true,
                    "result": {"echo": call.arguments["query"]},
                }))
        }
    }

    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(SlowFirst {
            calls: AtomicU32::new(0),
        })
        .mount(&module)
        .await;

    let two_calls = LlmResponse {
        content: String::new(),
        stop_reason: StopReason::ToolUse,
        tool_calls: vec![
            ToolCall {
                call_id: "call_a".into(),
                tool_name: "research.web_search".into(),
                arguments: serde_json::json!({"query": "first"}),
            },
            ToolCall {
                call_id: "call_b".into(),
                tool_name: "research.web_search".into(),
                arguments: serde_json::json!({"query": "second"}),
            },
        ],
        input_tokens: 1,
        output_tokens: 1,
        model: "scripted-model".into(),
    };
    let h = harness(vec![two_calls, text_response("done")]);
    h.state.registry.insert_manifest(module.uri(), search_manifest());

    let key = ConversationKey {
        platform: "discord".into(),
        channel: "ch-order".into(),
        thread: None,
    };
    let (conversation, _, mut rx) =
        agent_loop::handle_message(&h.state, "u1", &key, "run both".into(), None).await;
    while rx.recv().await.is_some() {}

    let transcript = h.state.conversations.transcript(&conversation.id, true).await;
    let results: Vec<&str> = transcript
        .iter()
        .filter(|m| m.kind == MessageKind::ToolResult)
        .map(|m| m.call_id.as_deref().unwrap())
        .collect();
    // Results appended in request order even though call_a finished last.
    assert_eq!(results, vec!["call_a", "call_b"]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler polling with placeholder rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn poll_module_completes_after_retries_and_renders_placeholder() {
    let module = MockServer::start().await;

    /// `status=running` three times, then `completed`.
    struct EventualSuccess {
        calls: AtomicU32,
    }
    impl Respond for EventualSuccess {
        fn respond(&self, _req: &Request) -> ResponseTemplate {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let status = if n < 3 { "running" } else { "completed" };
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tool_name": "cc.task_status",
                "success": true,
                "result": {"status": status, "task_id": "T"},
            }))
        }
    }

    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(EventualSuccess {
            calls: AtomicU32::new(0),
        })
        .expect(4)
        .mount(&module)
        .await;

    let h = harness(vec![]);
    h.state.registry.insert_manifest(
        module.uri(),
        ModuleManifest {
            module_name: "cc".into(),
            description: String::new(),
            tools: vec![ToolDefinition {
                name: "cc.task_status".into(),
                description: String::new(),
                parameters: vec![],
                required_permission: Permission::User,
            }],
        },
    );

    let mut job = base_job(JobType::PollModule);
    job.check_config = serde_json::json!({
        "tool": "cc.task_status",
        "args": {"task_id": "T"},
        "success_field": "status",
        "success_values": ["completed"],
    });
    job.on_success_message = "done: {result.status}".into();
    let job = h.state.jobs.insert(job).await;

    let worker = SchedulerWorker::new(32);
    for _ in 0..4 {
        // Re-arm the claim so each tick evaluates once.
        let _ = h
            .state
            .jobs
            .update(&job.id, |j| {
                j.next_run_at = Some(Utc::now() - chrono::Duration::seconds(1));
            })
            .await;
        worker.tick(&h.state).await;
    }

    let done = h.state.jobs.get(&job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts, 4);

    let mut rx = h.state.notifier.subscribe("discord").unwrap();
    let n = rx.recv().await.unwrap();
    assert_eq!(n.kind, NotificationKind::JobSuccess);
    assert_eq!(n.content, "done: completed");
    // Exactly one notification.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn cron_job_fires_exactly_max_runs_times() {
    let h = harness(vec![]);
    let mut job = base_job(JobType::Cron);
    job.check_config = serde_json::json!({"cron_expr": "* * * * *"});
    job.max_runs = Some(2);
    let job = h.state.jobs.insert(job).await;

    let worker = SchedulerWorker::new(32);
    for _ in 0..4 {
        let _ = h
            .state
            .jobs
            .update(&job.id, |j| {
                j.next_run_at = Some(Utc::now() - chrono::Duration::seconds(1));
            })
            .await;
        worker.tick(&h.state).await;
    }

    let done = h.state.jobs.get(&job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.runs_completed, 2, "terminates after exactly max_runs fires");

    let mut rx = h.state.notifier.subscribe("discord").unwrap();
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_some());
    assert!(rx.try_recv().is_err(), "exactly two fires dispatched");
}

#[tokio::test]
async fn poll_url_non_json_body_is_transient() {
    let probe = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&probe)
        .await;

    let h = harness(vec![]);
    let mut job = base_job(JobType::PollUrl);
    job.check_config = serde_json::json!({
        "url": format!("{}/status", probe.uri()),
        "expected_status": 200,
        "response_field": "state",
        "response_value": "ready",
    });
    let job = h.state.jobs.insert(job).await;

    SchedulerWorker::new(32).tick(&h.state).await;

    let stored = h.state.jobs.get(&job.id).await.unwrap();
    // Transient, not permanent: still active, backed off, not failed.
    assert_eq!(stored.status, JobStatus::Active);
    assert_eq!(stored.consecutive_failures, 1);
    assert_eq!(stored.attempts, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cascading workflow cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn failing_job_cancels_workflow_siblings() {
    let h = harness(vec![]);
    let workflow_id = Uuid::new_v4();

    // J1: a delay job that cannot succeed on its first (and only) attempt.
    let mut j1 = base_job(JobType::Delay);
    j1.workflow_id = Some(workflow_id);
    j1.check_config = serde_json::json!({"delay_seconds": 3600});
    j1.max_attempts = Some(1);
    let j1 = h.state.jobs.insert(j1).await;

    // J2: an every-minute cron sibling.
    let mut j2 = base_job(JobType::Cron);
    j2.workflow_id = Some(workflow_id);
    j2.check_config = serde_json::json!({"cron_expr": "* * * * *"});
    j2.next_run_at = Some(Utc::now() + chrono::Duration::seconds(30));
    let j2 = h.state.jobs.insert(j2).await;

    SchedulerWorker::new(32).tick(&h.state).await;

    let j1 = h.state.jobs.get(&j1.id).await.unwrap();
    let j2 = h.state.jobs.get(&j2.id).await.unwrap();
    assert_eq!(j1.status, JobStatus::Failed);
    assert_eq!(j2.status, JobStatus::Cancelled, "sibling cancelled before its next tick");
    assert!(j2.status_message.unwrap().contains("failed"));
    assert_eq!(
        h.state.jobs.workflow_status(workflow_id).await,
        WorkflowStatus::Failed
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook HMAC
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn post_webhook(
    app: &axum::Router,
    job_id: Uuid,
    body: &str,
    signature: Option<String>,
) -> (axum::http::StatusCode, serde_json::Value) {
    use tower::ServiceExt;

    let mut request = axum::http::Request::builder()
        .method("POST")
        .uri(format!("/webhook/{job_id}"))
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        request = request.header("x-webhook-signature", sig);
    }
    let response = app
        .clone()
        .oneshot(request.body(axum::body::Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

fn sign(secret: &str, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn webhook_hmac_happy_path_and_replay() {
    let h = harness(vec![]);
    let mut job = base_job(JobType::Webhook);
    job.check_config = serde_json::json!({"secret": "s"});
    job.on_success_message = "fired: {result.event}".into();
    job.next_run_at = Some(Utc::now() + chrono::Duration::days(365));
    let job = h.state.jobs.insert(job).await;

    let app = swb_gateway::api::router(h.state.clone());
    let body = r#"{"event":"deploy_finished"}"#;

    // Valid signature fires the job once.
    let (status, value) = post_webhook(&app, job.id, body, Some(sign("s", body))).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(value["fired"], true);

    let stored = h.state.jobs.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.last_result.unwrap()["event"], "deploy_finished");

    let mut rx = h.state.notifier.subscribe("discord").unwrap();
    assert_eq!(rx.recv().await.unwrap().content, "fired: deploy_finished");

    // An identical delivery inside the window acks without re-firing.
    let (status, value) = post_webhook(&app, job.id, body, Some(sign("s", body))).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(value["fired"], false);
    assert!(rx.try_recv().is_err(), "no second notification");
}

#[tokio::test]
async fn webhook_hmac_mismatch_is_rejected() {
    let h = harness(vec![]);
    let mut job = base_job(JobType::Webhook);
    job.check_config = serde_json::json!({"secret": "s"});
    job.next_run_at = Some(Utc::now() + chrono::Duration::days(365));
    let job = h.state.jobs.insert(job).await;

    let app = swb_gateway::api::router(h.state.clone());
    let body = r#"{"event":"x"}"#;

    let (status, _) = post_webhook(&app, job.id, body, Some(sign("wrong", body))).await;
    assert_eq!(status, axum::http::StatusCode::UNAUTHORIZED);
    let (status, _) = post_webhook(&app, job.id, body, None).await;
    assert_eq!(status, axum::http::StatusCode::UNAUTHORIZED);

    let stored = h.state.jobs.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Active);
    assert_eq!(stored.attempts, 0, "rejected deliveries count nothing");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resume-conversation continuation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn completed_job_resumes_its_conversation() {
    let h = harness(vec![text_response("Deploying now.")]);
    h.state.users.ensure_user("u1").await;
    let key = ConversationKey {
        platform: "discord".into(),
        channel: "ch1".into(),
        thread: None,
    };
    let conversation = h.state.conversations.resolve_or_create(&key, "u1").await;

    let mut job = base_job(JobType::Delay);
    job.check_config = serde_json::json!({"delay_seconds": 1});
    job.created_at = Utc::now() - chrono::Duration::seconds(10);
    job.on_complete = OnComplete::ResumeConversation;
    job.on_success_message = "Task T done. Deploy it.".into();
    job.platform_context.conversation_id = Some(conversation.id.clone());
    let job = h.state.jobs.insert(job).await;

    SchedulerWorker::new(32).tick(&h.state).await;

    assert_eq!(
        h.state.jobs.get(&job.id).await.unwrap().status,
        JobStatus::Completed
    );

    // The synthesized message is hidden; the assistant reply is visible.
    let visible = h.state.conversations.transcript(&conversation.id, false).await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].kind, MessageKind::AssistantText);
    assert_eq!(visible[0].content, "Deploying now.");

    let full = h.state.conversations.transcript(&conversation.id, true).await;
    assert_eq!(full.len(), 2);
    assert!(full[0].hidden);
    assert_eq!(full[0].content, "Task T done. Deploy it.");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn new_message_cancels_in_flight_turn() {
    let module = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_secs(20))
                .set_body_json(serde_json::json!({
                    "tool_name": "research.web_search",
                    "success": true,
                    "result": [],
                })),
        )
        .mount(&module)
        .await;

    let h = harness(vec![
        tool_response("call_1", "research.web_search", serde_json::json!({"query": "slow"})),
        text_response("second turn answer"),
    ]);
    h.state.registry.insert_manifest(module.uri(), search_manifest());

    let key = ConversationKey {
        platform: "discord".into(),
        channel: "ch-cancel".into(),
        thread: None,
    };
    let (conversation, _, mut rx1) =
        agent_loop::handle_message(&h.state, "u1", &key, "slow search".into(), None).await;

    // Wait until the first turn has dispatched its tool call.
    let mut saw_tool_call = false;
    while let Some(event) = rx1.recv().await {
        if matches!(event, AgentEvent::ToolCall { .. }) {
            saw_tool_call = true;
            break;
        }
    }
    assert!(saw_tool_call);

    // A second message cancels the in-flight turn and runs afterwards.
    let (_, _, mut rx2) =
        agent_loop::handle_message(&h.state, "u1", &key, "never mind".into(), None).await;

    let mut stopped = false;
    while let Some(event) = rx1.recv().await {
        if matches!(event, AgentEvent::Stopped { .. }) {
            stopped = true;
        }
    }
    assert!(stopped, "first turn must report cancellation");

    let mut second_final = None;
    while let Some(event) = rx2.recv().await {
        if let AgentEvent::Final { content } = event {
            second_final = Some(content);
        }
    }
    assert_eq!(second_final.unwrap(), "second turn answer");

    // The cancelled turn wrote no partial assistant message.
    let transcript = h.state.conversations.transcript(&conversation.id, true).await;
    let assistant_texts: Vec<&str> = transcript
        .iter()
        .filter(|m| m.kind == MessageKind::AssistantText)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(assistant_texts, vec!["second turn answer"]);
}
