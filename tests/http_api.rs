mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use chatvat::chat::ChatService;
use chatvat::refresh::RefreshOrchestrator;
use chatvat::server::{router, AppState};
use chatvat_core::compose::{AnswerComposer, Completer};
use chatvat_core::embedding::Embedder;
use chatvat_core::retrieval::Retriever;
use chatvat_core::search::DistanceMetric;
use chatvat_core::store::{InMemoryStore, KnowledgeStore};

use common::*;

struct Harness {
    app: Router,
    orchestrator: Arc<RefreshOrchestrator>,
    _shutdown: watch::Sender<bool>,
}

struct Setup {
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    query_store: Option<Arc<dyn KnowledgeStore>>,
    timeout: Duration,
    fetch_delay: Duration,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            embedder: Arc::new(HashEmbedder::new()),
            completer: Arc::new(EchoCompleter),
            query_store: None,
            timeout: Duration::from_secs(5),
            fetch_delay: Duration::ZERO,
        }
    }
}

fn harness(setup: Setup) -> Harness {
    let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryStore::new());
    let fetcher = ScriptedFetcher::new(&[("schedule", "Day 1 opening ceremony at 10 AM.")])
        .with_delay(setup.fetch_delay);
    let orchestrator = Arc::new(orchestrator(
        &["schedule"],
        Arc::new(fetcher),
        Arc::new(HashEmbedder::new()),
        store.clone(),
        small_chunks(),
    ));

    let query_store = setup.query_store.unwrap_or(store);
    let retriever = Retriever::new(query_store, setup.embedder, DistanceMetric::Cosine);
    let composer = AnswerComposer::new(setup.completer, "EventBot", None, 2000);
    let chat = ChatService::new(retriever, composer, 3, setup.timeout);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    Harness {
        app: router(AppState::new(chat, orchestrator.clone(), shutdown_rx)),
        orchestrator,
        _shutdown: shutdown_tx,
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(b) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(b.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_version() {
    let h = harness(Setup::default());
    let (status, body) = call(&h.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn chat_answers_from_ingested_content() {
    let h = harness(Setup::default());
    completed(h.orchestrator.trigger().await);

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/chat",
        Some(r#"{"message": "What happens on Day 1?"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let answer = body["message"].as_str().unwrap();
    assert!(answer.contains("10 AM"));
    assert!(answer.contains("What happens on Day 1?"));
}

#[tokio::test]
async fn chat_rejects_malformed_input() {
    let h = harness(Setup::default());
    for body in [r#"{"message": ""}"#, r#"{"message": "   "}"#, r#"{}"#, "not json", r#"{"message": 5}"#] {
        let (status, value) = call(&h.app, Method::POST, "/chat", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(value["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn chat_reports_embedding_outage() {
    let h = harness(Setup {
        embedder: Arc::new(DownEmbedder),
        ..Setup::default()
    });
    let (status, body) = call(&h.app, Method::POST, "/chat", Some(&json!({"message": "hi"}).to_string())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "embedding_unavailable");
}

#[tokio::test]
async fn status_and_manual_refresh() {
    let h = harness(Setup {
        fetch_delay: Duration::from_millis(300),
        ..Setup::default()
    });

    let (status, body) = call(&h.app, Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["cycles_completed"], 0);

    let (status, body) = call(&h.app, Method::POST, "/refresh", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "started");

    let (status, body) = call(&h.app, Method::POST, "/refresh", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "refresh_running");

    for _ in 0..100 {
        if h.orchestrator.state().cycles_completed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let (_, body) = call(&h.app, Method::GET, "/status", None).await;
    assert_eq!(body["status"], "idle");
    assert_eq!(body["cycles_completed"], 1);
    assert_eq!(body["entries_added"], 1);
}

#[tokio::test]
async fn chat_reports_completion_outage() {
    let h = harness(Setup {
        completer: Arc::new(DownCompleter),
        ..Setup::default()
    });
    completed(h.orchestrator.trigger().await);
    let (status, body) = call(&h.app, Method::POST, "/chat", Some(r#"{"message": "When is Day 1?"}"#)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "completion_unavailable");
}

#[tokio::test]
async fn chat_reports_storage_failure() {
    let h = harness(Setup {
        query_store: Some(Arc::new(UnreadableStore)),
        ..Setup::default()
    });
    let (status, body) = call(&h.app, Method::POST, "/chat", Some(r#"{"message": "When is Day 1?"}"#)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "storage_failure");
}

#[tokio::test]
async fn chat_times_out_without_partial_answer() {
    let h = harness(Setup {
        completer: Arc::new(SlowCompleter {
            delay: Duration::from_secs(5),
        }),
        timeout: Duration::from_millis(100),
        ..Setup::default()
    });
    let (status, body) = call(&h.app, Method::POST, "/chat", Some(r#"{"message": "When is Day 1?"}"#)).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["code"], "timeout");
    assert!(body.get("message").is_none());
}
