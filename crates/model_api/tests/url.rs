use model_api::{stream_endpoint, ModelApiError, DEFAULT_API_VERSION};

#[test]
fn endpoint_appends_version_and_model() {
    assert_eq!(
        stream_endpoint("https://generativelanguage.googleapis.com/", DEFAULT_API_VERSION, "gemini-2.5-pro")
            .expect("endpoint"),
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:streamGenerateContent?alt=sse"
    );
}

#[test]
fn endpoint_keeps_existing_version_segment() {
    assert_eq!(
        stream_endpoint("http://127.0.0.1:8080/v1beta", "v1beta", "models/gemini-2.5-flash")
            .expect("endpoint"),
        "http://127.0.0.1:8080/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
    );
}

#[test]
fn empty_base_falls_back_to_default_service() {
    let endpoint = stream_endpoint("  ", "v1", "gemini-2.5-pro").expect("endpoint");
    assert!(endpoint.starts_with("https://generativelanguage.googleapis.com/v1/models/"));
}

#[test]
fn unsupported_scheme_and_empty_model_are_rejected() {
    assert!(matches!(
        stream_endpoint("ftp://example.com", "v1beta", "gemini"),
        Err(ModelApiError::InvalidBaseUrl(_))
    ));
    assert!(matches!(
        stream_endpoint("https://example.com", "v1beta", "models/"),
        Err(ModelApiError::InvalidRequest(_))
    ));
}
