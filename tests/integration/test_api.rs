//! End-to-end tests for the learning coach HTTP API.
//!
//! Each test starts a real server on an ephemeral port, backed by a SQLite
//! file in a temporary directory and a scripted sandbox, and talks to it over
//! HTTP. No Docker daemon or LLM key is needed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use coach_orchestrator::agents::ResourceCache;
use coach_orchestrator::{
    create_router, AgentRegistry, AppState, BreakerConfig, Config, JwtKeys, LlmClient, Orchestrator,
    Services, Store,
};
use coach_sandbox::{
    ExecutionBackend, ResourceLimits, SandboxOutcome, ScriptedBackend, SecureCodeRunner,
    UnavailableBackend,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;

const SECRET: &str = "integration-secret-0123456789abcdef";

/// A running server and the directory holding its database.
struct TestServer {
    base_url: String,
    client: reqwest::Client,
    _dir: TempDir,
}

impl TestServer {
    async fn start(backend: Arc<dyn ExecutionBackend>, limits: ResourceLimits) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Store::open(dir.path().join("coach.db")).expect("Failed to open store");
        let services = Services {
            store,
            llm: LlmClient::Disabled,
            runner: SecureCodeRunner::new(backend, limits),
            resources: ResourceCache::new(Duration::from_secs(3600)),
            vector_store: None,
        };
        let orchestrator = Orchestrator::new(
            services,
            AgentRegistry::standard(),
            Duration::from_secs(30),
            BreakerConfig::default(),
        );
        let router = create_router(AppState::new(
            Config::default(),
            orchestrator,
            JwtKeys::new(SECRET, 24),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("No local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            _dir: dir,
        }
    }

    async fn scripted() -> Self {
        Self::start(Arc::new(ScriptedBackend::new()), ResourceLimits::default()).await
    }

    async fn request(&self, method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let url = format!("{}{path}", self.base_url);
        let mut request = match method {
            "POST" => self.client.post(url),
            _ => self.client.get(url),
        };
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.expect("Request failed");
        let status = response.status();
        let text = response.text().await.expect("Failed to read body");
        let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        (status, value)
    }

    async fn register(&self, email: &str, name: &str) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/api/v1/auth/register",
                None,
                Some(json!({ "email": email, "displayName": name })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        body["token"].as_str().expect("No token").to_string()
    }

    /// Generates a plan and returns its first code task.
    async fn plan_code_task(&self, token: &str) -> Value {
        let (status, body) = self
            .request("POST", "/api/v1/curriculum", Some(token), Some(json!({ "topic": "python basics" })))
            .await;
        assert_eq!(status, StatusCode::OK, "curriculum failed: {body}");
        body["payload"]["modules"]
            .as_array()
            .expect("No modules")
            .iter()
            .flat_map(|m| m["tasks"].as_array().cloned().unwrap_or_default())
            .find(|t| t["taskType"] == "code")
            .expect("Plan has no code task")
    }
}

fn pending_difficulties(plan: &Value) -> Vec<u64> {
    plan["modules"]
        .as_array()
        .expect("No modules")
        .iter()
        .flat_map(|m| m["tasks"].as_array().cloned().unwrap_or_default())
        .map(|t| t["difficulty"].as_u64().expect("No difficulty"))
        .collect()
}

fn crash() -> SandboxOutcome {
    SandboxOutcome {
        exit_code: Some(1),
        stderr: "Traceback (most recent call last):\nNameError: name 'x' is not defined".to_string(),
        ..SandboxOutcome::default()
    }
}

/// Tests that the sample config fixture loads and validates.
#[test]
fn test_sample_config_loads() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/coach.json");
    let config = Config::load_from_file(&path).expect("Failed to load config");

    assert_eq!(config.database_url, ":memory:");
    assert_eq!(config.llm_provider.as_str(), "offline");
    assert_eq!(config.breaker.failure_threshold, 3);
    assert_eq!(config.sandbox.limits.max_concurrent, 2);
    assert!(!config.cors_allows_any());
}

/// Goal setting, planning, failing three times, adapting, then passing.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_learning_journey() {
    let backend = ScriptedBackend::new()
        .with_outcome(crash())
        .with_outcome(crash())
        .with_outcome(crash());
    let server = TestServer::start(Arc::new(backend), ResourceLimits::default()).await;
    let token = server.register("ada@example.com", "Ada").await;

    let (status, body) = server
        .request(
            "POST",
            "/api/v1/goals",
            Some(&token),
            Some(json!({ "message": "I'm an intermediate developer and want to learn python in 6 weeks" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "goals failed: {body}");

    let task = server.plan_code_task(&token).await;
    let task_id = task["id"].as_str().expect("No task id");
    let (_, before) = server.request("GET", "/api/v1/curriculum", Some(&token), None).await;

    let (status, today) = server.request("GET", "/api/v1/tasks/today", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!today["tasks"].as_array().expect("No tasks").is_empty());

    let mut last = Value::Null;
    for _ in 0..3 {
        let (status, body) = server
            .request(
                "POST",
                "/api/v1/submissions",
                Some(&token),
                Some(json!({ "taskId": task_id, "code": "def solution(x):\n    return x\n" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "submission failed: {body}");
        assert!(!body["payload"]["evaluation"]["feedback"].as_str().expect("No feedback").is_empty());
        assert_eq!(body["payload"]["evaluation"]["passed"], false);
        last = body;
    }
    assert!(
        last["payload"]["adaptation"]["tasksAdjusted"].as_u64().unwrap_or(0) > 0,
        "third failure should lower difficulty: {last}"
    );

    let (_, after) = server.request("GET", "/api/v1/curriculum", Some(&token), None).await;
    let before = pending_difficulties(&before);
    let after = pending_difficulties(&after);
    assert_eq!(before.len(), after.len());
    assert!(after.iter().zip(&before).all(|(a, b)| a <= b));
    assert!(after.iter().all(|d| (1..=10).contains(d)));

    let (status, body) = server
        .request(
            "POST",
            "/api/v1/submissions",
            Some(&token),
            Some(json!({ "taskId": task_id, "code": task["solution"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"]["evaluation"]["passed"], true);
    assert_eq!(body["payload"]["progress"]["completed"], true);

    let (status, progress) = server.request("GET", "/api/v1/progress", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["payload"]["totalAttempts"], 4);
    assert_eq!(progress["payload"]["successRate"], 25);

    let (status, report) = server
        .request("GET", "/api/v1/analytics/report?format=markdown", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let markdown = report.as_str().expect("Markdown body");
    assert!(markdown.contains("# Learning Progress Report: Ada"));
    assert!(markdown.contains("## Topic Performance"));
}

/// Parallel submissions never exceed the sandbox concurrency cap.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_are_bounded() {
    let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(150)));
    let limits = ResourceLimits {
        max_concurrent: 2,
        ..ResourceLimits::default()
    };
    let server = TestServer::start(backend.clone(), limits).await;
    let token = server.register("ada@example.com", "Ada").await;
    let task = server.plan_code_task(&token).await;

    let submissions = (0..6).map(|_| {
        server.request(
            "POST",
            "/api/v1/submissions",
            Some(&token),
            Some(json!({ "taskId": task["id"], "code": task["solution"] })),
        )
    });
    let results = futures::future::join_all(submissions).await;

    assert!(results.iter().all(|(status, _)| *status == StatusCode::OK));
    assert_eq!(backend.runs(), 6);
    assert!(backend.max_in_flight() <= 2, "max in flight: {}", backend.max_in_flight());
}

/// A submission that cannot get a sandbox slot is refused with 503 and the
/// reviewer stays healthy.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_sandbox_queue_is_503_without_tripping_reviewer() {
    let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(500)));
    let limits = ResourceLimits {
        max_concurrent: 1,
        queue_timeout_ms: 50,
        ..ResourceLimits::default()
    };
    let server = TestServer::start(backend.clone(), limits).await;
    let token = server.register("ada@example.com", "Ada").await;
    let task = server.plan_code_task(&token).await;
    let body = json!({ "taskId": task["id"], "code": task["solution"] });

    let (first, second) = tokio::join!(
        server.request("POST", "/api/v1/submissions", Some(&token), Some(body.clone())),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            server.request("POST", "/api/v1/submissions", Some(&token), Some(body.clone())).await
        }
    );

    assert_eq!(first.0, StatusCode::OK);
    assert_eq!(second.0, StatusCode::SERVICE_UNAVAILABLE);
    assert!(second.1["error"].as_str().expect("No error").contains("busy"));
    assert_eq!(backend.runs(), 1);

    let (_, health) = server.request("GET", "/health/detailed", None, None).await;
    assert_eq!(health["breakers"]["reviewer"]["state"], "closed");
    assert_eq!(health["breakers"]["reviewer"]["totalFailures"], 0);
}

/// Without a sandbox, submissions are stored but do not count as attempts.
#[tokio::test]
async fn test_unavailable_sandbox_degrades() {
    let server = TestServer::start(
        Arc::new(UnavailableBackend::new("docker not running")),
        ResourceLimits::default(),
    )
    .await;
    let token = server.register("ada@example.com", "Ada").await;
    let task = server.plan_code_task(&token).await;

    let (status, body) = server
        .request(
            "POST",
            "/api/v1/submissions",
            Some(&token),
            Some(json!({ "taskId": task["id"], "code": task["solution"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"]["evaluation"]["executionStatus"], "not_executed");
    assert!(body["payload"]["progress"].is_null());
    assert!(!body["warnings"].as_array().expect("No warnings").is_empty());

    let (_, progress) = server.request("GET", "/api/v1/progress", Some(&token), None).await;
    assert_eq!(progress["payload"]["totalAttempts"], 0);

    let (_, health) = server.request("GET", "/health/detailed", None, None).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["sandboxAvailable"], false);
}

/// Dangerous code is refused with details and never reaches the sandbox.
#[tokio::test]
async fn test_dangerous_code_is_refused() {
    let backend = Arc::new(ScriptedBackend::new());
    let server = TestServer::start(backend.clone(), ResourceLimits::default()).await;
    let token = server.register("ada@example.com", "Ada").await;
    let task = server.plan_code_task(&token).await;

    let (status, body) = server
        .request(
            "POST",
            "/api/v1/submissions",
            Some(&token),
            Some(json!({
                "taskId": task["id"],
                "code": "import subprocess\nsubprocess.run(['rm', '-rf', '/'])\n"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!body["violations"].as_array().expect("No violations").is_empty());
    assert_eq!(backend.runs(), 0);

    let (_, progress) = server.request("GET", "/api/v1/progress", Some(&token), None).await;
    assert_eq!(progress["payload"]["totalAttempts"], 0);
}

/// Tokens signed with another secret are rejected.
#[tokio::test]
async fn test_foreign_token_is_rejected() {
    let server = TestServer::scripted().await;
    let forged = JwtKeys::new("another-secret-0123456789abcdefghij", 1)
        .issue("someone")
        .expect("Failed to sign");
    let (status, _) = server.request("GET", "/api/v1/profile", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// Learners only see their own submissions.
#[tokio::test]
async fn test_submissions_are_private() {
    let server = TestServer::scripted().await;
    let ada = server.register("ada@example.com", "Ada").await;
    let bob = server.register("bob@example.com", "Bob").await;
    let task = server.plan_code_task(&ada).await;

    let (_, body) = server
        .request(
            "POST",
            "/api/v1/submissions",
            Some(&ada),
            Some(json!({ "taskId": task["id"], "code": task["solution"] })),
        )
        .await;
    let submission_id = body["payload"]["submission"]["id"].as_str().expect("No id");

    let path = format!("/api/v1/submissions/{submission_id}");
    let (status, _) = server.request("GET", &path, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = server.request("GET", &path, Some(&ada), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evaluation"]["passed"], true);

    let (_, board) = server.request("GET", "/api/v1/social/leaderboard", Some(&bob), None).await;
    assert_eq!(board[0]["displayName"], "Ada");
    assert!(board[0].get("email").is_none());
}
