//! Black-box tests against the real HTTP surface: the same router as prod,
//! bound to an ephemeral port, driven with reqwest.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;

use torque_api::app::{self, AppServices, BackgroundHandles};
use torque_core::TorqueConfig;

const TOKEN: &str = "test-secret";

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    background: Option<BackgroundHandles>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Spawn the full stack: router, worker pool, and poller, on an
    /// in-memory store and in-process bus with test-sized intervals.
    async fn spawn() -> Self {
        Self::spawn_inner(true).await
    }

    /// Spawn the router only. Without workers, enqueued tasks stay exactly
    /// as the dispatcher persisted them.
    async fn spawn_without_workers() -> Self {
        Self::spawn_inner(false).await
    }

    async fn spawn_inner(with_background: bool) -> Self {
        let mut config = TorqueConfig::default();
        config.auth_token = Some(TOKEN.to_string());
        config.enable_hsts = true;
        config.workers = 2;
        config.task_timeout = Duration::from_secs(2);
        config.claim_duration = Duration::from_secs(5);
        config.poll_interval = Duration::from_millis(50);
        config.backoff.base_delay = Duration::from_millis(30);
        config.validate().expect("test config must validate");

        let services = app::build_services(config).await;
        let background = with_background.then(|| app::spawn_background(&services));
        let router = app::build_app(services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            services,
            background,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A hook endpoint that always answers 200.
async fn spawn_ok_hook() -> String {
    use axum::{routing::post, Router};

    let app = Router::new().route(
        "/ok",
        post(|| async { axum::http::StatusCode::OK }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/ok", addr)
}

async fn get_task_eventually(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    done: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    // Dispatch is asynchronous; poll briefly until the worker commits.
    for _ in 0..200 {
        let res = client
            .get(format!("{}/tasks/{}", base_url, id))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();

        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if done(&body) {
                return body;
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    panic!("task did not reach the expected state within timeout");
}

#[tokio::test]
async fn protected_endpoints_require_the_shared_credential() {
    let srv = TestServer::spawn_without_workers().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/stats", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/stats", srv.base_url))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/stats", srv.base_url))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Liveness stays open.
    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn responses_advertise_hsts() {
    let srv = TestServer::spawn_without_workers().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert!(res.headers().contains_key("strict-transport-security"));
}

#[tokio::test]
async fn enqueue_validates_the_url() {
    let srv = TestServer::spawn_without_workers().await;
    let client = reqwest::Client::new();

    // Missing url.
    let res = client
        .post(format!("{}/", srv.base_url))
        .bearer_auth(TOKEN)
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Relative url.
    let res = client
        .post(format!("{}/?url=/relative/path", srv.base_url))
        .bearer_auth(TOKEN)
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Unsupported scheme.
    let res = client
        .post(format!("{}/?url=ftp://h/hook", srv.base_url))
        .bearer_auth(TOKEN)
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Nothing was persisted.
    let res = client
        .get(format!("{}/stats", srv.base_url))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    let stats: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stats["total"], 0);
}

#[tokio::test]
async fn enqueue_then_fetch_yields_a_pending_snapshot() {
    let srv = TestServer::spawn_without_workers().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/?url=http://h/hook", srv.base_url))
        .bearer_auth(TOKEN)
        .header("content-type", "application/json")
        .body(r#"{"k":"v"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let res = client
        .get(format!("{}/tasks/{}", srv.base_url, id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let task: serde_json::Value = res.json().await.unwrap();

    assert_eq!(task["id"], id.as_str());
    assert_eq!(task["status"], "pending");
    assert_eq!(task["attempts"], 0);
    assert_eq!(task["url"], "http://h/hook");
    assert!(task["last_status_code"].is_null());
}

#[tokio::test]
async fn per_task_overrides_are_validated_and_applied() {
    let srv = TestServer::spawn_without_workers().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!(
            "{}/?url=http://h/hook&timeout=3&backoff=linear&max_attempts=0",
            srv.base_url
        ))
        .bearer_auth(TOKEN)
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap();

    let res = client
        .get(format!("{}/tasks/{}", srv.base_url, id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    let task: serde_json::Value = res.json().await.unwrap();
    assert_eq!(task["timeout_secs"], 3);
    assert_eq!(task["backoff"], "linear");
    assert!(task["max_attempts"].is_null());

    // Bad backoff name.
    let res = client
        .post(format!(
            "{}/?url=http://h/hook&backoff=quadratic",
            srv.base_url
        ))
        .bearer_auth(TOKEN)
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Timeout must stay below the claim duration (5s in the test config).
    let res = client
        .post(format!("{}/?url=http://h/hook&timeout=60", srv.base_url))
        .bearer_auth(TOKEN)
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_semantics_are_idempotent_in_effect() {
    let srv = TestServer::spawn_without_workers().await;
    let client = reqwest::Client::new();

    // Unknown id.
    let res = client
        .delete(format!(
            "{}/tasks/00000000-0000-7000-8000-000000000000",
            srv.base_url
        ))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Malformed id.
    let res = client
        .delete(format!("{}/tasks/not-an-id", srv.base_url))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/?url=http://h/hook", srv.base_url))
        .bearer_auth(TOKEN)
        .body("x")
        .send()
        .await
        .unwrap();
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let res = client
        .delete(format!("{}/tasks/{}", srv.base_url, id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Deleting twice yields 404 the second time.
    let res = client
        .delete(format!("{}/tasks/{}", srv.base_url, id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn purge_empties_the_store() {
    let srv = TestServer::spawn_without_workers().await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let res = client
            .post(format!("{}/?url=http://h/hook", srv.base_url))
            .bearer_auth(TOKEN)
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = client
        .get(format!("{}/stats", srv.base_url))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    let stats: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stats["pending"], 3);

    let res = client
        .delete(format!("{}/", srv.base_url))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let purged: serde_json::Value = res.json().await.unwrap();
    assert_eq!(purged["deleted"], 3);

    let res = client
        .get(format!("{}/stats", srv.base_url))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    let stats: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stats["total"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn enqueued_task_is_dispatched_and_completed() {
    let hook_url = spawn_ok_hook().await;
    let mut srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/?url={}", srv.base_url, hook_url))
        .bearer_auth(TOKEN)
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let task = get_task_eventually(&client, &srv.base_url, &id, |t| {
        t["status"] == "completed"
    })
    .await;
    assert_eq!(task["attempts"], 1);
    assert_eq!(task["last_status_code"], 200);

    let res = client
        .get(format!("{}/stats", srv.base_url))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    let stats: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stats["completed"], 1);

    if let Some(background) = srv.background.take() {
        background.shutdown().await;
    }

    let counts = srv.services.store.counts().await.unwrap();
    assert_eq!(counts.completed, 1);
}
