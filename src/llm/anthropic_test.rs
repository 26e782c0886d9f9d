use super::*;

#[test]
fn parse_response_keeps_text_and_usage() {
    let json = r#"{
        "content": [
            {"type": "text", "text": "Revenue is trending up."},
            {"type": "thinking", "thinking": "hidden"}
        ],
        "model": "claude-sonnet-4-5-20250929",
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 120, "output_tokens": 30}
    }"#;

    let resp = parse_response(json).unwrap();
    assert_eq!(resp.content, vec![ContentBlock::Text { text: "Revenue is trending up.".into() }]);
    assert_eq!(resp.text(), "Revenue is trending up.");
    assert_eq!(resp.total_tokens(), 150);
    assert_eq!(resp.stop_reason, "end_turn");
}

#[test]
fn parse_response_rejects_malformed_body() {
    let err = parse_response("{\"content\": 5}").unwrap_err();
    assert!(matches!(err, LlmError::ApiParse(_)));
}

#[test]
fn text_joins_multiple_blocks() {
    let resp = ChatResponse {
        content: vec![ContentBlock::Text { text: "a".into() }, ContentBlock::Text { text: "b".into() }],
        model: "m".into(),
        stop_reason: "end_turn".into(),
        input_tokens: 1,
        output_tokens: 1,
    };
    assert_eq!(resp.text(), "a\nb");
}

#[test]
fn retryable_only_for_transient_statuses() {
    use crate::error::ErrorCode;

    assert!(LlmError::ApiResponse { status: 429, body: String::new() }.retryable());
    assert!(LlmError::ApiResponse { status: 503, body: String::new() }.retryable());
    assert!(!LlmError::ApiResponse { status: 400, body: String::new() }.retryable());
    assert!(!LlmError::ApiParse("x".into()).retryable());
}

#[test]
fn null_stop_reason_is_tolerated() {
    let json = r#"{"content": [], "model": "m", "stop_reason": null, "usage": {"input_tokens": 1, "output_tokens": 0}}"#;
    let resp = parse_response(json).unwrap();
    assert_eq!(resp.stop_reason, "");
    assert!(resp.text().is_empty());
}

#[test]
fn request_omits_empty_system_and_pins_temperature() {
    let messages = vec![Message::user("<report>{}</report>")];
    let with_system = serde_json::to_value(build_request("m", 600, "be brief", &messages)).unwrap();
    assert_eq!(with_system["system"], "be brief");
    assert_eq!(with_system["max_tokens"], 600);
    assert!((with_system["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    assert_eq!(with_system["messages"][0]["role"], "user");

    let without = serde_json::to_value(build_request("m", 10, "", &messages)).unwrap();
    assert!(without.get("system").is_none());
}

#[test]
fn long_error_bodies_are_truncated_on_char_boundary() {
    let body = "é".repeat(MAX_ERROR_BODY);
    let cut = truncate_body(body);
    assert!(cut.len() <= MAX_ERROR_BODY);
    assert!(cut.chars().all(|c| c == 'é'));
    assert_eq!(truncate_body("short".into()), "short");
}
