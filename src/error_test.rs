use super::*;

#[derive(Debug, thiserror::Error)]
enum SampleError {
    #[error("thing {0} missing")]
    Missing(u32),
    #[error("database error: {0}")]
    Db(String),
}

impl ErrorCode for SampleError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_SAMPLE_MISSING",
            Self::Db(_) => E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Missing(_) => StatusCode::NOT_FOUND,
            Self::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Db(_))
    }
}

#[test]
fn from_code_keeps_message_for_client_errors() {
    let err = ApiError::from_code(&SampleError::Missing(7));
    assert_eq!(err.status, StatusCode::NOT_FOUND);
    assert_eq!(err.code, "E_SAMPLE_MISSING");
    assert_eq!(err.message, "thing 7 missing");
    assert!(!err.retryable);
}

#[test]
fn from_code_masks_database_detail() {
    let err = ApiError::from_code(&SampleError::Db("relation \"secret\" does not exist".into()));
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.code, E_DATABASE);
    assert!(!err.message.contains("secret"));
    assert!(err.retryable);
}

#[test]
fn sqlx_error_maps_to_database_code() {
    let err: ApiError = sqlx::Error::RowNotFound.into();
    assert_eq!(err.code, E_DATABASE);
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn display_includes_code_and_status() {
    let err = ApiError::bad_request("name is required");
    assert_eq!(err.to_string(), "E_INVALID_INPUT (400): name is required");
}

#[tokio::test]
async fn into_response_sets_status() {
    let response = ApiError::unauthorized().into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
