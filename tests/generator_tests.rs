mod common;

use instagram_relay::{
    error::GenerationError,
    generator::{ChatCompletion, Completion, Inference, Provider, ReplyGenerator},
};
use reqwest::StatusCode;
use serde_json::json;
use wiremock::{
    matchers::{bearer_token, body_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

const API_KEY: &str = "sk-test";

#[tokio::test]
async fn test_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .and(bearer_token(API_KEY))
        .and(body_json(json!({
            "prompt": "hello",
            "max_tokens": 100,
            "temperature": 0.7
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"generated_text": " hi \n"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = Provider::Completion(
        Completion::new(reqwest::Client::new(), API_KEY).base_url(mock_server.uri()),
    );
    let generation = provider.generate("hello", None).await.unwrap();

    assert_eq!(generation.text, "hi");
    assert_eq!(generation.conversation_handle, None);
}

#[tokio::test]
async fn test_completion_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"generated_text": ""})))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&mock_server)
        .await;

    let provider = Completion::new(reqwest::Client::new(), API_KEY).base_url(mock_server.uri());

    let err = provider.generate("hello", None).await.unwrap_err();
    assert!(
        matches!(&err, GenerationError::Status { status, body } if *status == StatusCode::TOO_MANY_REQUESTS && body == "slow down"),
        "{err:?}"
    );

    let err = provider.generate("hello", None).await.unwrap_err();
    assert!(matches!(err, GenerationError::Empty), "{err:?}");

    let err = provider.generate("hello", None).await.unwrap_err();
    assert!(matches!(err, GenerationError::Parse(_)), "{err:?}");
}

#[tokio::test]
async fn test_unreachable_provider() {
    // nothing listens on the discard port
    let provider = Completion::new(reqwest::Client::new(), API_KEY).base_url("http://127.0.0.1:9");
    let err = provider.generate("hello", None).await.unwrap_err();
    assert!(matches!(err, GenerationError::Network(_)), "{err:?}");
}

#[tokio::test]
async fn test_inference() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gpt2"))
        .and(bearer_token(API_KEY))
        .and(body_json(json!({
            "inputs": "hello",
            "parameters": {"max_new_tokens": 100, "return_full_text": false}
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"generated_text": "hi there"}])),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = Inference::new(reqwest::Client::new(), API_KEY, "gpt2").base_url(mock_server.uri());
    let generation = provider.generate("hello", None).await.unwrap();

    assert_eq!(generation.text, "hi there");
}

#[tokio::test]
async fn test_chat_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(bearer_token(API_KEY))
        .and(body_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "Answer in one sentence."},
                {"role": "user", "content": "hello"}
            ],
            "max_tokens": 150,
            "temperature": 0.7
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi! How can I help?\n"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = Provider::Chat(
        ChatCompletion::new(reqwest::Client::new(), API_KEY)
            .base_url(mock_server.uri())
            .model("gpt-4o-mini")
            .system_prompt("Answer in one sentence."),
    );
    let generation = provider.generate("hello", None).await.unwrap();

    assert_eq!(generation.text, "Hi! How can I help?");
    assert_eq!(provider.name(), "chat");
}

#[tokio::test]
async fn test_chat_completion_without_choices() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&mock_server)
        .await;

    let provider = ChatCompletion::new(reqwest::Client::new(), API_KEY).base_url(mock_server.uri());
    let err = provider.generate("hello", None).await.unwrap_err();

    assert!(matches!(err, GenerationError::Empty), "{err:?}");
}
