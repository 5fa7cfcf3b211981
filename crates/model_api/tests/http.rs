use chat_contract::{Content, GenerateContentConfig, GenerateContentRequest};
use model_api::{ModelApiClient, ModelApiConfig, ModelApiError};

fn request(model: &str, contents: Vec<Content>) -> GenerateContentRequest {
    GenerateContentRequest {
        model: model.to_string(),
        contents,
        config: GenerateContentConfig::default(),
    }
}

#[test]
fn http_request_targets_streaming_endpoint() {
    let config = ModelApiConfig::new("key").with_base_url("https://example.test/api");
    let client = ModelApiClient::new(config).expect("client");

    let http_request = client
        .build_request(&request("gemini-2.5-pro", vec![Content::user_text("hi")]))
        .expect("build request")
        .build()
        .expect("request");

    assert_eq!(
        http_request.url().as_str(),
        "https://example.test/api/v1beta/models/gemini-2.5-pro:streamGenerateContent?alt=sse"
    );
    assert_eq!(http_request.method(), "POST");
    assert_eq!(
        http_request
            .headers()
            .get("x-goog-api-key")
            .and_then(|value| value.to_str().ok()),
        Some("key")
    );
    let body = http_request
        .body()
        .and_then(|body| body.as_bytes())
        .expect("buffered json body");
    let body: serde_json::Value = serde_json::from_slice(body).expect("json body");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
}

#[test]
fn request_without_contents_is_rejected_before_sending() {
    let client = ModelApiClient::new(ModelApiConfig::new("key")).expect("client");
    assert!(matches!(
        client.build_request(&request("gemini-2.5-pro", Vec::new())),
        Err(ModelApiError::InvalidRequest(_))
    ));
}

#[test]
fn invalid_extra_header_is_reported() {
    let config = ModelApiConfig::new("key").insert_header("bad header", "value");
    let client = ModelApiClient::new(config).expect("client");
    assert!(matches!(
        client.build_headers(),
        Err(ModelApiError::InvalidHeader(_))
    ));
}
