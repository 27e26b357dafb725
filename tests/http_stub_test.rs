//! HTTP-level tests against local axum stub servers.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

use litl_agent::agent::{PredictionContext, Predictor};
use litl_agent::cache::ToolCache;
use litl_agent::client::{ApiClient, JsonApi, RetryPolicy};
use litl_agent::llm::{LLMClient, LanguageModel};
use litl_agent::prism::PrismTask;
use litl_agent::tools::{CellosaurusTools, ChemblTools, PubChemTools, ToolBox};
use litl_agent::Error;

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn echo(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({ "query": query }))
}

async fn flaky(State(hits): State<Arc<AtomicUsize>>) -> Response {
    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
        return (StatusCode::SERVICE_UNAVAILABLE, [("Retry-After", "0")], "busy").into_response();
    }
    Json(json!({"ok": true})).into_response()
}

async fn always_busy(State(hits): State<Arc<AtomicUsize>>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response()
}

fn api_router(hits: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route("/echo", get(echo))
        .route("/flaky", get(flaky))
        .route("/busy", get(always_busy))
        .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "no such record") }))
        .route("/text", get(|| async { "plain text" }))
        .with_state(hits)
}

#[tokio::test]
async fn test_api_client_sends_query() {
    let base = spawn(api_router(Arc::new(AtomicUsize::new(0)))).await;
    let client = ApiClient::new(&base, "litl-agent-test").unwrap();
    let value = client
        .get_json("echo", vec![("MaxRecords".into(), "5".into())])
        .await
        .unwrap();
    assert_eq!(value["query"]["MaxRecords"], "5");
}

#[tokio::test]
async fn test_api_client_retries_retryable_status() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = spawn(api_router(hits.clone())).await;
    let client = ApiClient::new(&base, "litl-agent-test")
        .unwrap()
        .with_retry(RetryPolicy::gentle());
    let value = client.get_json("/flaky", vec![]).await.unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_api_client_gives_up_after_retries() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = spawn(api_router(hits.clone())).await;
    let client = ApiClient::new(&base, "litl-agent-test")
        .unwrap()
        .with_retry(RetryPolicy::gentle());
    let err = client.get_json("busy", vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Api { status: 503, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_api_client_errors() {
    let base = spawn(api_router(Arc::new(AtomicUsize::new(0)))).await;
    let client = ApiClient::new(&base, "litl-agent-test").unwrap();

    match client.get_json("missing", vec![]).await {
        Err(Error::Api { status, body }) => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such record");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        client.get_json("text", vec![]).await,
        Err(Error::Json(_))
    ));
}

#[tokio::test]
async fn test_api_client_absolute_url() {
    let base = spawn(api_router(Arc::new(AtomicUsize::new(0)))).await;
    let client = ApiClient::new("http://127.0.0.1:1", "litl-agent-test").unwrap();
    let value = client
        .get_json(&format!("{}/echo", base), vec![("a".into(), "b".into())])
        .await
        .unwrap();
    assert_eq!(value["query"]["a"], "b");
}

#[derive(Clone)]
struct LlmStub {
    replies: Arc<Vec<String>>,
    next: Arc<AtomicUsize>,
}

async fn messages(
    State(stub): State<LlmStub>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("good-key") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"type": "authentication_error", "message": "invalid x-api-key"}})),
        )
            .into_response();
    }
    let i = stub.next.fetch_add(1, Ordering::SeqCst);
    let text = stub.replies.get(i).cloned().unwrap_or_default();
    Json(json!({
        "id": format!("msg_{}", i),
        "content": [{"type": "text", "text": text}],
        "model": body["model"],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 11, "output_tokens": 7}
    }))
    .into_response()
}

async fn spawn_llm(replies: &[&str]) -> String {
    let stub = LlmStub {
        replies: Arc::new(replies.iter().map(|r| r.to_string()).collect()),
        next: Arc::new(AtomicUsize::new(0)),
    };
    spawn(Router::new().route("/v1/messages", post(messages)).with_state(stub)).await
}

#[tokio::test]
async fn test_llm_client_completion() {
    let base = spawn_llm(&["Hello!"]).await;
    let client = LLMClient::new(&base, "good-key", "test-model").unwrap();
    let response = client.complete("hi", Some("be brief"), 64).await.unwrap();
    assert_eq!(response.content, "Hello!");
    assert_eq!(response.model, "test-model");
    assert_eq!(response.input_tokens, 11);
    assert_eq!(response.output_tokens, 7);
}

#[tokio::test]
async fn test_llm_client_error_message() {
    let base = spawn_llm(&[]).await;
    let client = LLMClient::new(&base, "bad-key", "test-model").unwrap();
    match client.complete("hi", None, 64).await {
        Err(Error::Llm(msg)) => {
            assert!(msg.contains("401"));
            assert!(msg.contains("invalid x-api-key"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

async fn cellosaurus_search(
    State(hits): State<Arc<AtomicUsize>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let found = query.get("q").map(String::as_str) == Some("idsy:\"K-562\"");
    let list = if found {
        json!([{"accession-list": [{"type": "primary", "value": "CVCL_0004"}]}])
    } else {
        json!([])
    };
    Json(json!({"Cellosaurus": {"cell-line-list": list}}))
}

async fn cellosaurus_record(Path(ac): Path<String>) -> Response {
    if ac != "CVCL_0004" {
        return (StatusCode::NOT_FOUND, "unknown accession").into_response();
    }
    Json(json!({
        "id": "K-562",
        "site": ["Bone marrow"],
        "di": ["Chronic myelogenous leukemia, BCR-ABL1 positive"],
        "ox": ["Homo sapiens"],
        "sx": "Female",
        "age": "53Y",
        "cell": "Cancer cell line"
    }))
    .into_response()
}

fn toolbox(base: &str, dir: &std::path::Path) -> ToolBox {
    let api: Arc<dyn JsonApi> =
        Arc::new(ApiClient::new(base, "litl-agent-test").unwrap().with_retry(RetryPolicy::none()));
    ToolBox::new(
        PubChemTools::new(
            api.clone(),
            format!("{}/view", base),
            ToolCache::new("pubchem", dir.join("pubchem")),
            10,
        ),
        ChemblTools::new(api.clone(), ToolCache::new("chembl", dir.join("chembl")), 10),
        CellosaurusTools::new(api, ToolCache::new("cellosaurus", dir.join("cellosaurus")), 10),
    )
}

async fn spawn_cellosaurus(hits: Arc<AtomicUsize>) -> String {
    spawn(
        Router::new()
            .route("/search/cell-line", get(cellosaurus_search))
            .route("/cell-line/{ac}", get(cellosaurus_record))
            .with_state(hits),
    )
    .await
}

#[tokio::test]
async fn test_toolbox_over_http_is_cached() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = spawn_cellosaurus(hits.clone()).await;
    let dir = tempdir().unwrap();
    let tools = toolbox(&base, dir.path());

    let mut params = HashMap::new();
    params.insert("query".to_string(), json!("K-562"));
    let first = tools.execute("search_cellosaurus_ac", &params).await;
    let second = tools.execute("search_cellosaurus_ac", &params).await;
    assert_eq!(
        first.observation(),
        "Cellosaurus ACs found for 'K-562': CVCL_0004"
    );
    assert_eq!(second.observation(), first.observation());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(tools.cache("cellosaurus").unwrap().stats().unwrap().count, 1);

    let mut params = HashMap::new();
    params.insert("ac".to_string(), json!("CVCL_0004"));
    let summary = tools.execute("get_cellosaurus_summary", &params).await.observation();
    assert!(summary.contains("- Recommended Name: K-562"));
    assert!(summary.contains("- Cell Type: Cancer cell line"));
}

#[tokio::test]
async fn test_predictor_end_to_end() {
    let hits = Arc::new(AtomicUsize::new(0));
    let tools_base = spawn_cellosaurus(hits.clone()).await;
    let llm_base = spawn_llm(&[
        r#"{"thought": "identify the cell line", "tool": "search_cellosaurus_ac", "args": {"query": "K-562"}}"#,
        r#"{"thought": "enough", "tool": "finish", "args": {}}"#,
        r#"{"ic50_pred": 0.3, "confidence": 65, "explanation": "CML line, BCR-ABL1 positive"}"#,
    ])
    .await;
    let dir = tempdir().unwrap();

    let model: Arc<dyn LanguageModel> =
        Arc::new(LLMClient::new(&llm_base, "good-key", "test-model").unwrap());
    let predictor = Predictor::new(model, Arc::new(toolbox(&tools_base, dir.path())));
    let task = PrismTask::new("imatinib", "K-562", 0.2, "uM");

    let (trace, usage) = predictor
        .predict_traced(&task, &PredictionContext::default())
        .await
        .unwrap();
    assert_eq!(trace.ic50_pred, Some(0.3));
    let trajectory = trace.trajectory.unwrap();
    assert_eq!(
        trajectory[0].observation,
        "Cellosaurus ACs found for 'K-562': CVCL_0004"
    );
    assert_eq!(usage.llm_calls, 3);
    assert_eq!(usage.input_tokens, 33);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
