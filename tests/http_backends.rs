//! HTTP backend clients against a mock server.

use ai_lib_orchestrator::backend::{
    collect, BackendRequest, GenerationBackend, HttpSettings, OllamaBackend, RemoteChatBackend,
};
use ai_lib_orchestrator::embeddings::Embedder;
use ai_lib_orchestrator::{BackendId, Error};
use mockito::{Matcher, Server};
use serde_json::json;
use std::time::Duration;

fn settings() -> HttpSettings {
    HttpSettings::default().with_timeout(Duration::from_secs(5))
}

fn ndjson(lines: &[serde_json::Value]) -> String {
    lines
        .iter()
        .map(|l| format!("{}\n", l))
        .collect::<String>()
}

#[tokio::test]
async fn ollama_streams_ndjson_chunks() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({
            "model": "llama3.2",
            "prompt": "explain TCP handshake",
            "stream": true,
            "system": "be brief",
        })))
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body(ndjson(&[
            json!({"model": "llama3.2", "response": "SYN, ", "done": false}),
            json!({"model": "llama3.2", "response": "SYN-ACK, ", "done": false}),
            json!({"model": "llama3.2", "response": "ACK", "done": false}),
            json!({"model": "llama3.2", "response": "", "done": true}),
        ]))
        .create_async()
        .await;

    let backend = OllamaBackend::new(&server.url(), "llama3.2", &settings()).unwrap();
    let req = BackendRequest::new("explain TCP handshake", "llama3.2")
        .with_system(Some("be brief".into()));
    let text = collect(backend.generate(req).await.unwrap()).await.unwrap();

    assert_eq!(text, "SYN, SYN-ACK, ACK");
    mock.assert_async().await;
}

#[tokio::test]
async fn ollama_stream_without_done_is_a_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(ndjson(&[json!({"response": "half", "done": false})]))
        .create_async()
        .await;

    let backend = OllamaBackend::new(&server.url(), "llama3.2", &settings()).unwrap();
    let err = collect(
        backend
            .generate(BackendRequest::new("p", "llama3.2"))
            .await
            .unwrap(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::GenerationFailed(ref m) if m.contains("before completion")));
}

#[tokio::test]
async fn ollama_error_line_fails_the_stream() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(ndjson(&[json!({"error": "model not found"})]))
        .create_async()
        .await;

    let backend = OllamaBackend::new(&server.url(), "llama3.2", &settings()).unwrap();
    let err = collect(
        backend
            .generate(BackendRequest::new("p", "llama3.2"))
            .await
            .unwrap(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "Generation failed: model not found");
}

#[tokio::test]
async fn ollama_status_codes_map_to_the_taxonomy() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({"model": "down"})))
        .with_status(503)
        .create_async()
        .await;
    server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({"model": "bad"})))
        .with_status(400)
        .with_body("invalid options")
        .create_async()
        .await;

    let backend = OllamaBackend::new(&server.url(), "llama3.2", &settings()).unwrap();
    let down = backend
        .generate(BackendRequest::new("p", "down"))
        .await
        .err()
        .unwrap();
    assert!(down.is_fallbackable());
    assert_eq!(down.status_code(), 503);

    let bad = backend
        .generate(BackendRequest::new("p", "bad"))
        .await
        .err()
        .unwrap();
    assert!(matches!(bad, Error::GenerationFailed(ref m) if m.contains("invalid options")));
}

#[tokio::test]
async fn unreachable_ollama_is_unavailable() {
    let backend = OllamaBackend::new("http://127.0.0.1:1", "llama3.2", &settings()).unwrap();
    let err = backend
        .generate(BackendRequest::new("p", "llama3.2"))
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::BackendUnavailable {
            backend: BackendId::Local,
            ..
        }
    ));
    assert!(!backend.ready().await);
}

#[tokio::test]
async fn ollama_tags_drive_readiness_and_model_listing() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_body(
            json!({"models": [{"name": "mistral:7b"}, {"name": "nomic-embed-text"}]}).to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let backend = OllamaBackend::new(&server.url(), "llama3.2", &settings()).unwrap();
    assert!(backend.ready().await);
    assert_eq!(
        backend.models().await.unwrap(),
        vec!["llama3.2", "mistral:7b", "nomic-embed-text"]
    );
}

#[tokio::test]
async fn ollama_embeddings() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/embeddings")
        .match_body(Matcher::PartialJson(
            json!({"model": "nomic-embed-text", "prompt": "hello"}),
        ))
        .with_status(200)
        .with_body(json!({"embedding": [0.1, 0.2, 0.3]}).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/api/embeddings")
        .match_body(Matcher::PartialJson(json!({"prompt": "nothing"})))
        .with_status(200)
        .with_body(json!({"embedding": []}).to_string())
        .create_async()
        .await;

    let backend = OllamaBackend::new(&server.url(), "llama3.2", &settings())
        .unwrap()
        .with_embedding_model("nomic-embed-text");
    assert_eq!(Embedder::name(&backend), "nomic-embed-text");
    assert_eq!(backend.embed("hello").await.unwrap(), vec![0.1, 0.2, 0.3]);
    assert!(matches!(
        backend.embed("nothing").await.unwrap_err(),
        Error::GenerationFailed(_)
    ));
}

fn remote(server: &Server) -> RemoteChatBackend {
    RemoteChatBackend::new(&server.url(), "sk-test", "openai/gpt-4o-mini", &settings()).unwrap()
}

#[tokio::test]
async fn remote_chat_completion_returns_one_chunk() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "openai/gpt-4o-mini",
            "messages": [{"role": "user", "content": "design a cache"}],
        })))
        .with_status(200)
        .with_body(
            json!({"choices": [{"message": {"role": "assistant", "content": "use three tiers"}}]})
                .to_string(),
        )
        .create_async()
        .await;

    let backend = remote(&server);
    assert_eq!(backend.id(), BackendId::Remote);
    let text = collect(
        backend
            .generate(BackendRequest::new("design a cache", "openai/gpt-4o-mini"))
            .await
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(text, "use three tiers");
    mock.assert_async().await;
}

#[tokio::test]
async fn remote_rate_limit_carries_retry_after() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_header("retry-after", "7")
        .create_async()
        .await;

    let err = remote(&server)
        .generate(BackendRequest::new("p", "m"))
        .await
        .err()
        .unwrap();
    match err {
        Error::BackendUnavailable {
            backend,
            retry_after,
            ..
        } => {
            assert_eq!(backend, BackendId::Remote);
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn remote_server_error_is_fallbackable_and_client_error_is_not() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({"model": "flaky"})))
        .with_status(502)
        .create_async()
        .await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({"model": "unknown"})))
        .with_status(400)
        .with_body(json!({"error": {"message": "no such model"}}).to_string())
        .create_async()
        .await;

    let backend = remote(&server);
    let flaky = backend
        .generate(BackendRequest::new("p", "flaky"))
        .await
        .err()
        .unwrap();
    assert!(flaky.is_fallbackable());

    let unknown = backend
        .generate(BackendRequest::new("p", "unknown"))
        .await
        .err()
        .unwrap();
    assert!(!unknown.is_fallbackable());
    assert!(unknown.to_string().contains("no such model"));
}

#[tokio::test]
async fn remote_empty_content_is_a_failed_generation() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(json!({"choices": [{"message": {"content": ""}}]}).to_string())
        .create_async()
        .await;

    let err = remote(&server)
        .generate(BackendRequest::new("p", "m"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "E3001");
}

#[tokio::test]
async fn remote_readiness_uses_models_endpoint() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/models")
        .match_header("authorization", "Bearer sk-test")
        .with_status(200)
        .with_body(r#"{"data":[]}"#)
        .create_async()
        .await;

    assert!(remote(&server).ready().await);
}
