//! Integration tests for the chat-completions client.
//!
//! The ignored tests make real API calls.
//! Run with: LABFORGE_API_URL=... LABFORGE_API_KEY=... LABFORGE_API_MODEL=... \
//!   cargo test --test llm_integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use labforge::error::LlmError;
use labforge::extract::detect_tables;
use labforge::llm::{Credentials, GenerationRequest, LlmProvider, Message, OpenAiCompatClient};
use labforge::metadata::ReportMetadata;
use labforge::synth::{figure_requests, PromptInput, SynthesisPolicy, Synthesizer};

fn env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| panic!("{key} must be set for integration tests"))
}

fn test_credentials() -> Credentials {
    Credentials::new(
        env("LABFORGE_API_URL"),
        env("LABFORGE_API_KEY"),
        env("LABFORGE_API_MODEL"),
    )
}

fn create_test_client() -> OpenAiCompatClient {
    OpenAiCompatClient::new(&test_credentials(), Duration::from_secs(120))
        .expect("credentials should be complete")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {}",
        content
    );
}

#[tokio::test]
#[ignore]
async fn test_report_synthesis() {
    let credentials = test_credentials();
    let client = OpenAiCompatClient::new(&credentials, Duration::from_secs(300))
        .expect("credentials should be complete");
    let synthesizer = Synthesizer::new(
        Arc::new(client),
        credentials.model.clone(),
        SynthesisPolicy::default(),
    );

    let tables = detect_tables("U (V),I (mA)\n1.0,2.0\n2.0,4.1\n3.0,6.0\n", "ohm.csv");
    let metadata = ReportMetadata {
        experiment_name: "Ohm's Law".to_string(),
        ..Default::default()
    };
    let input = PromptInput {
        metadata: &metadata,
        guide_text: "Verify Ohm's law by measuring the current at several voltages.",
        guide_parts: &[],
        tables: &tables,
        previous: None,
        feedback: None,
    };

    let sections = synthesizer
        .synthesize(&input)
        .await
        .expect("synthesis should succeed");
    assert!(!sections.is_empty());
    for (_, request) in figure_requests(&sections) {
        assert!(request.tables.iter().all(|t| *t < tables.len()));
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transient() {
    let credentials = Credentials::new("http://127.0.0.1:9/v1", "sk-test", "test-model");
    let client = OpenAiCompatClient::new(&credentials, Duration::from_secs(5))
        .expect("credentials are complete");

    let request = GenerationRequest::new("", vec![Message::user("test")]).with_max_tokens(5);
    let err = client.generate(request).await.expect_err("nothing listens on port 9");
    assert!(err.is_transient(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_incomplete_credentials_rejected() {
    let credentials = Credentials::new("http://127.0.0.1:9/v1", "", "test-model");
    let err = OpenAiCompatClient::new(&credentials, Duration::from_secs(5)).unwrap_err();
    assert!(matches!(err, LlmError::InvalidConfig(_)));
}
