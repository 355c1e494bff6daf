use std::io::Cursor;

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use super::*;
use crate::config::OllamaConfig;

fn client_for(server: &MockServer, batch_size: u32) -> OllamaClient {
    let address = server.address();
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: address.ip().to_string(),
        port: address.port(),
        embedding_model: "embed-model".to_string(),
        chat_model: "chat-model".to_string(),
        batch_size,
    };
    OllamaClient::new(&config)
        .expect("Failed to create client")
}

/// Answers each embedding request with one vector per input
struct EchoEmbeddings;

impl Respond for EchoEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("request body should be JSON");
        let inputs = body["input"].as_array().expect("input should be an array");
        let embeddings: Vec<Vec<f32>> = inputs
            .iter()
            .enumerate()
            .map(|(i, _)| vec![i as f32, 1.0, 0.5])
            .collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embeddings": embeddings }))
    }
}

fn ndjson(lines: &[serde_json::Value]) -> String {
    lines
        .iter()
        .map(|line| format!("{line}\n"))
        .collect::<String>()
}

fn fragment(content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": "chat-model",
        "message": { "role": "assistant", "content": content },
        "done": false
    })
}

fn done() -> serde_json::Value {
    serde_json::json!({
        "model": "chat-model",
        "message": { "role": "assistant", "content": "" },
        "done": true
    })
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        embedding_model: "test-embed".to_string(),
        chat_model: "test-chat".to_string(),
        batch_size: 128,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.embedding_model, "test-embed");
    assert_eq!(client.chat_model, "test-chat");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
}

#[test]
fn model_availability_accepts_implicit_latest_tag() {
    let models = vec![
        ModelInfo {
            name: "gemma:2b".to_string(),
        },
        ModelInfo {
            name: "nomic-embed-text:latest".to_string(),
        },
    ];

    assert!(is_model_available(&models, "gemma:2b"));
    assert!(is_model_available(&models, "nomic-embed-text"));
    assert!(!is_model_available(&models, "gemma"));
    assert!(!is_model_available(&models, "gemma:7b"));
}

#[tokio::test(flavor = "multi_thread")]
async fn embed_texts_batches_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(serde_json::json!({ "model": "embed-model" })))
        .respond_with(EchoEmbeddings)
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();

    let embeddings = client.embed_texts(&texts).expect("embeddings should succeed");

    assert_eq!(embeddings.len(), 5);
    assert_eq!(embeddings[0], vec![0.0, 1.0, 0.5]);
    assert_eq!(embeddings[1], vec![1.0, 1.0, 0.5]);
    assert_eq!(embeddings[4], vec![0.0, 1.0, 0.5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn embed_texts_with_no_input_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EchoEmbeddings)
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    let embeddings = client.embed_texts(&[]).expect("empty input is fine");
    assert!(embeddings.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn embed_text_returns_single_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EchoEmbeddings)
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    let embedding = client
        .embed_text("what is rust?")
        .expect("query embedding should succeed");
    assert_eq!(embedding, vec![0.0, 1.0, 0.5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_count_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "embeddings": [[0.1, 0.2]] })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    let texts = vec!["one".to_string(), "two".to_string()];

    let error = client.embed_texts(&texts).expect_err("mismatch should fail");
    assert!(format!("{error:#}").contains("Mismatch"));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_fail_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    let error = client
        .embed_texts(&["text".to_string()])
        .expect_err("404 should fail");
    assert!(format!("{error:#}").contains("HTTP 404"));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_fail_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    let started = std::time::Instant::now();
    let error = client
        .embed_texts(&["x".to_string()])
        .expect_err("503 should fail");

    assert!(format!("{error:#}").contains("HTTP 503"));
    assert!(started.elapsed() < Duration::from_secs(1));
    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    assert_eq!(requests.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_requires_both_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [
                { "name": "embed-model:latest", "size": 1234 },
                { "name": "chat-model:latest" }
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    client.ping().expect("ping should succeed");
    client.health_check().expect("both models are present");

    let models = client.list_models().expect("models should list");
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "embed-model:latest");
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_reports_missing_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "embed-model:latest" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    let error = client.health_check().expect_err("chat model is missing");
    assert!(error.to_string().contains("chat-model"));
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_stream_yields_fragments_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "model": "chat-model",
            "stream": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            ndjson(&[fragment("Olá"), fragment(", "), fragment("mundo"), done()]),
            "application/x-ndjson",
        ))
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    let stream = client
        .chat_stream(&[ChatMessage::user("Diga olá")])
        .expect("stream should start");

    let fragments: Vec<String> = stream
        .collect::<Result<_>>()
        .expect("stream should complete");
    assert_eq!(fragments, vec!["Olá", ", ", "mundo"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_stream_connection_failure_surfaces_at_start() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    assert!(client.chat_stream(&[ChatMessage::user("hi")]).is_err());
}

#[test]
fn stream_error_line_ends_the_stream() {
    let body = ndjson(&[
        fragment("partial"),
        serde_json::json!({ "error": "model crashed" }),
        fragment("never seen"),
    ]);
    let mut stream = ChatStream::from_reader(Cursor::new(body));

    assert_eq!(
        stream.next().map(|r| r.expect("first fragment is fine")),
        Some("partial".to_string())
    );
    let error = stream
        .next()
        .expect("error should be yielded")
        .expect_err("error line should fail");
    assert!(error.to_string().contains("model crashed"));
    assert!(stream.next().is_none());
}

#[test]
fn truncated_stream_is_an_error() {
    let body = ndjson(&[fragment("cut")]);
    let mut stream = ChatStream::from_reader(Cursor::new(body));

    assert!(matches!(stream.next(), Some(Ok(ref s)) if s == "cut"));
    assert!(matches!(stream.next(), Some(Err(_))));
    assert!(stream.next().is_none());
}

#[test]
fn malformed_line_is_an_error() {
    let mut stream = ChatStream::from_reader(Cursor::new("not json\n"));
    assert!(matches!(stream.next(), Some(Err(_))));
    assert!(stream.next().is_none());
}

#[test]
fn blank_lines_and_empty_fragments_are_skipped() {
    let body = format!(
        "\n{}\n{}{}",
        fragment(""),
        ndjson(&[fragment("text")]),
        ndjson(&[done()])
    );
    let fragments: Vec<String> = ChatStream::from_reader(Cursor::new(body))
        .collect::<Result<_>>()
        .expect("stream should complete");
    assert_eq!(fragments, vec!["text"]);
}
