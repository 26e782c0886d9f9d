use super::*;

/// # Safety
/// Env mutation; variables are unique to this module.
unsafe fn clear_llm_env() {
    unsafe {
        std::env::remove_var("LLM_API_KEY_ENV");
        std::env::remove_var("LLM_MODEL");
        std::env::remove_var("LLM_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("LLM_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("__FL_TEST_LLM_KEY__");
    }
}

#[test]
fn from_env_reads_key_and_overrides() {
    unsafe {
        clear_llm_env();
        std::env::set_var("LLM_API_KEY_ENV", "__FL_TEST_LLM_KEY__");
        std::env::set_var("__FL_TEST_LLM_KEY__", "secret");
        std::env::set_var("LLM_REQUEST_TIMEOUT_SECS", "42");
    }

    let cfg = LlmConfig::from_env().unwrap();
    assert_eq!(cfg.api_key, "secret");
    assert_eq!(cfg.model, DEFAULT_MODEL);
    assert_eq!(cfg.request_timeout, Duration::from_secs(42));
    assert_eq!(cfg.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));

    // Missing key var named by LLM_API_KEY_ENV.
    unsafe { std::env::remove_var("__FL_TEST_LLM_KEY__") };
    let err = LlmConfig::from_env().unwrap_err();
    assert!(matches!(err, LlmError::MissingApiKey { ref var } if var == "__FL_TEST_LLM_KEY__"));

    unsafe { clear_llm_env() };
    let err = LlmConfig::from_env().unwrap_err();
    assert!(matches!(err, LlmError::MissingApiKey { ref var } if var == "LLM_API_KEY_ENV"));
}
