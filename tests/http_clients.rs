//! OpenAI, Ollama and Pinecone clients against fake HTTP endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use scene_sync::config::{EmbeddingConfig, IndexConfig};
use scene_sync::digest::IndexMetadata;
use scene_sync::embedding::{EmbeddingProvider, OllamaProvider, OpenAIProvider};
use scene_sync::http::RetryPolicy;
use scene_sync::index::pinecone::PineconeIndex;
use scene_sync::index::{UpsertItem, VectorIndex};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(5),
    }
}

fn embedding_config(provider: &str, addr: SocketAddr) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: provider.to_string(),
        model: Some("test-model".to_string()),
        dims: Some(3),
        url: Some(format!("http://{}", addr)),
        timeout_secs: 5,
        ..Default::default()
    }
}

fn index_config(addr: SocketAddr) -> IndexConfig {
    IndexConfig {
        provider: "pinecone".to_string(),
        host: Some(format!("http://{}", addr)),
        namespace: Some("scenes".to_string()),
        timeout_secs: 5,
        ..Default::default()
    }
}

fn metadata(id: &str) -> IndexMetadata {
    IndexMetadata {
        external_id: id.to_string(),
        chapter_index: 1,
        scene_index: 0,
        chapter_title: "出会い".to_string(),
        digest: "猫が鳴いた\nlocation: 庭\nmood: 切ない".to_string(),
        related_characters: vec!["c1".to_string()],
        related_context_ids: vec![],
        content_kind: "plot_text".to_string(),
        embedding_model: "test-model".to_string(),
    }
}

// ============ OpenAI ============

#[tokio::test]
async fn openai_sends_bearer_and_orders_by_index() {
    let seen_auth = Arc::new(Mutex::new(None::<String>));
    let app = Router::new()
        .route(
            "/embeddings",
            post(
                |State(seen): State<Arc<Mutex<Option<String>>>>,
                 headers: HeaderMap,
                 Json(body): Json<Value>| async move {
                    *seen.lock().unwrap() = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    assert_eq!(body["model"], "test-model");
                    assert_eq!(body["input"].as_array().unwrap().len(), 2);
                    // deliberately out of order
                    Json(json!({
                        "data": [
                            { "index": 1, "embedding": [0.0, 1.0, 0.0] },
                            { "index": 0, "embedding": [1.0, 0.0, 0.0] }
                        ]
                    }))
                },
            ),
        )
        .with_state(seen_auth.clone());
    let addr = serve(app).await;

    let provider =
        OpenAIProvider::with_api_key(&embedding_config("openai", addr), "sk-test".to_string())
            .unwrap()
            .with_retry(fast_retry(0));
    let vectors = provider
        .embed(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    assert_eq!(
        seen_auth.lock().unwrap().as_deref(),
        Some("Bearer sk-test")
    );
}

#[tokio::test]
async fn openai_retries_rate_limits() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/embeddings",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": "slow down"})))
                } else {
                    (
                        StatusCode::OK,
                        Json(json!({ "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }] })),
                    )
                }
            }),
        )
        .with_state(hits.clone());
    let addr = serve(app).await;

    let provider =
        OpenAIProvider::with_api_key(&embedding_config("openai", addr), "sk".to_string())
            .unwrap()
            .with_retry(fast_retry(3));
    let vectors = provider.embed(&["x".to_string()]).await.unwrap();

    assert_eq!(vectors.len(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unreadable_success_body_is_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/api/embed",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::OK, "{\"embeddings\": [[0.1,".to_string())
                } else {
                    (
                        StatusCode::OK,
                        json!({ "embeddings": [[0.1, 0.2, 0.3]] }).to_string(),
                    )
                }
            }),
        )
        .with_state(hits.clone());
    let addr = serve(app).await;

    let provider = OllamaProvider::new(&embedding_config("ollama", addr))
        .unwrap()
        .with_retry(fast_retry(2));
    let vectors = provider.embed(&["x".to_string()]).await.unwrap();

    assert_eq!(vectors, vec![vec![0.1, 0.2, 0.3]]);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn openai_does_not_retry_client_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/embeddings",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::BAD_REQUEST, Json(json!({"error": "bad input"})))
            }),
        )
        .with_state(hits.clone());
    let addr = serve(app).await;

    let provider =
        OpenAIProvider::with_api_key(&embedding_config("openai", addr), "sk".to_string())
            .unwrap()
            .with_retry(fast_retry(3));
    let err = provider.embed(&["x".to_string()]).await.unwrap_err();

    assert!(err.to_string().contains("400"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ============ Ollama ============

#[tokio::test]
async fn ollama_embed_endpoint() {
    let app = Router::new().route(
        "/api/embed",
        post(|Json(body): Json<Value>| async move {
            let n = body["input"].as_array().map_or(0, |a| a.len());
            Json(json!({ "embeddings": vec![vec![0.5, 0.5, 0.0]; n] }))
        }),
    );
    let addr = serve(app).await;

    let provider = OllamaProvider::new(&embedding_config("ollama", addr))
        .unwrap()
        .with_retry(fast_retry(0));
    let vectors = provider
        .embed(&["a".to_string(), "b".to_string(), "c".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors.len(), 3);
    assert_eq!(provider.model_name(), "test-model");
    assert_eq!(provider.dims(), 3);
}

#[tokio::test]
async fn ollama_unreachable_is_an_error() {
    // Bind and drop to get a port nobody listens on.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let provider = OllamaProvider::new(&embedding_config("ollama", addr))
        .unwrap()
        .with_retry(fast_retry(1));

    let err = provider.embed(&["a".to_string()]).await.unwrap_err();
    assert!(err.to_string().contains("Ollama connection error"));
}

// ============ Pinecone ============

#[derive(Clone, Default)]
struct FakePinecone {
    dimension: u64,
    upserts: Arc<Mutex<Vec<Value>>>,
    api_keys: Arc<Mutex<Vec<String>>>,
}

fn pinecone_app(state: FakePinecone) -> Router {
    Router::new()
        .route(
            "/describe_index_stats",
            post(|State(s): State<FakePinecone>| async move {
                Json(json!({ "dimension": s.dimension, "totalVectorCount": 0 }))
            }),
        )
        .route(
            "/vectors/upsert",
            post(
                |State(s): State<FakePinecone>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    if let Some(key) = headers.get("api-key").and_then(|v| v.to_str().ok()) {
                        s.api_keys.lock().unwrap().push(key.to_string());
                    }
                    let count = body["vectors"].as_array().map_or(0, |v| v.len());
                    s.upserts.lock().unwrap().push(body);
                    Json(json!({ "upsertedCount": count }))
                },
            ),
        )
        .route(
            "/query",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["topK"], 2);
                assert_eq!(body["namespace"], "scenes");
                Json(json!({
                    "matches": [
                        {
                            "id": "plot-ch1-0",
                            "score": 0.92,
                            "metadata": serde_json::to_value(metadata("plot-ch1-0")).unwrap()
                        },
                        { "id": "plot-ch2-3", "score": 0.41 }
                    ]
                }))
            }),
        )
        .with_state(state)
}

#[tokio::test]
async fn pinecone_upsert_carries_namespace_and_metadata() {
    let state = FakePinecone {
        dimension: 3,
        ..Default::default()
    };
    let addr = serve(pinecone_app(state.clone())).await;
    let index = PineconeIndex::with_api_key(&index_config(addr), "pc-key".to_string())
        .unwrap()
        .with_retry(fast_retry(0));

    index.ensure_dimension(3).await.unwrap();
    index
        .upsert(&[UpsertItem {
            id: "plot-ch1-0".to_string(),
            values: vec![0.1, 0.2, 0.3],
            metadata: metadata("plot-ch1-0"),
        }])
        .await
        .unwrap();

    let upserts = state.upserts.lock().unwrap().clone();
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0]["namespace"], "scenes");
    let vector = &upserts[0]["vectors"][0];
    assert_eq!(vector["id"], "plot-ch1-0");
    assert_eq!(vector["metadata"]["embedding_model"], "test-model");
    assert_eq!(vector["metadata"]["content_kind"], "plot_text");
    assert_eq!(state.api_keys.lock().unwrap().as_slice(), ["pc-key"]);
}

#[tokio::test]
async fn pinecone_dimension_mismatch_is_refused() {
    let addr = serve(pinecone_app(FakePinecone {
        dimension: 1536,
        ..Default::default()
    }))
    .await;
    let index = PineconeIndex::with_api_key(&index_config(addr), "k".to_string())
        .unwrap()
        .with_retry(fast_retry(0));

    let err = index.ensure_dimension(3).await.unwrap_err();
    assert!(err.to_string().contains("1536"));
}

#[tokio::test]
async fn pinecone_query_parses_matches() {
    let addr = serve(pinecone_app(FakePinecone::default())).await;
    let index = PineconeIndex::with_api_key(&index_config(addr), "k".to_string())
        .unwrap()
        .with_retry(fast_retry(0));

    let matches = index.query(&[0.1, 0.2, 0.3], 2).await.unwrap();

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].id, "plot-ch1-0");
    assert!((matches[0].score - 0.92).abs() < 1e-6);
    assert_eq!(
        matches[0].metadata.as_ref().map(|m| m.chapter_title.as_str()),
        Some("出会い")
    );
    assert!(matches[1].metadata.is_none());
}
