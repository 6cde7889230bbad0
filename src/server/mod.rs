//! 웹 서버 모듈 - 데모 엔드포인트
//!
//! - `GET /` : 데모 페이지
//! - `POST /generate` : MCQ 생성
//! - `GET /health` : 상태 확인

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generation::has_groq_api_key;
use crate::mcq::{clamp_num_questions, McqError, McqService};
use crate::syllabus::Subject;

/// 데모 페이지 (빌드 시점에 포함)
const INDEX_HTML: &str = include_str!("index.html");

// ============================================================================
// Request / Response Types
// ============================================================================

/// MCQ 생성 요청
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub num_questions: Option<u32>,
}

/// MCQ 생성 응답
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub mcqs: String,
    pub subject: Subject,
    pub chapter: String,
}

/// 상태 확인 응답
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub groq_available: bool,
    pub cache_size: usize,
}

/// 에러 응답 본문
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

// ============================================================================
// ApiError
// ============================================================================

/// HTTP 에러
///
/// 파이프라인 에러를 상태 코드 + JSON `{ error }` 본문으로 매핑합니다.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!("Request failed: {}", self);
        }

        let body = ErrorBody {
            error: self.to_string(),
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<McqError> for ApiError {
    fn from(err: McqError) -> Self {
        match err {
            McqError::TopicMismatch { subject, topic } => ApiError::BadRequest(format!(
                "The topic '{topic}' does not appear to be related to {subject}.\n\n\
                 Please either:\n\
                 - Enter a {subject}-related topic, or\n\
                 - Select the correct subject for this topic",
            )),
            McqError::NoContent(topic) => {
                ApiError::NotFound(format!("No content found for: {topic}"))
            }
            McqError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

// ============================================================================
// Router / Handlers
// ============================================================================

/// 공유 상태
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<McqService>,
}

/// 라우터 구성
pub fn router(service: Arc<McqService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/", get(index_handler))
        .route("/generate", post(generate_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// 서버 실행
pub async fn serve(service: Arc<McqService>, addr: SocketAddr) -> Result<()> {
    let app = router(service);

    tracing::info!("Listening on http://{}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("Server error")
}

/// `GET /` - 데모 페이지
async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /health` - 상태 확인
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        groq_available: has_groq_api_key(),
        cache_size: state.service.cache_size(),
    })
}

/// `POST /generate` - MCQ 생성
async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let topic = request.topic.trim();
    if topic.is_empty() {
        return Err(ApiError::BadRequest("Topic is required".to_string()));
    }

    let subject = Subject::from_str(&request.subject)
        .map_err(|_| ApiError::BadRequest("Invalid subject".to_string()))?;

    let num_questions = clamp_num_questions(request.num_questions);

    tracing::info!(
        "Generate request: subject={} topic='{}' n={}",
        subject.as_str(),
        topic,
        num_questions
    );

    let generated = state
        .service
        .generate(subject, topic, num_questions)
        .await?;

    Ok(Json(GenerateResponse {
        mcqs: generated.mcqs,
        subject,
        chapter: generated.chapter,
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_deserialization() {
        let request: GenerateRequest = serde_json::from_str(
            r#"{"subject": "biology", "topic": "mitochondria", "num_questions": 3}"#,
        )
        .unwrap();

        assert_eq!(request.subject, "biology");
        assert_eq!(request.topic, "mitochondria");
        assert_eq!(request.num_questions, Some(3));
    }

    #[test]
    fn test_generate_request_defaults() {
        // 누락된 필드는 기본값으로
        let request: GenerateRequest = serde_json::from_str(r#"{"topic": "optics"}"#).unwrap();

        assert_eq!(request.subject, "");
        assert_eq!(request.num_questions, None);
    }

    #[test]
    fn test_generate_response_serialization() {
        let response = GenerateResponse {
            mcqs: "Q1. ...".to_string(),
            subject: Subject::Physics,
            chapter: "Wave Optics".to_string(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["subject"], "physics");
        assert_eq!(json["chapter"], "Wave Optics");
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_mcq_error_mapping() {
        let err: ApiError = McqError::TopicMismatch {
            subject: Subject::Biology,
            topic: "thermodynamics".to_string(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("thermodynamics"));
        assert!(err.to_string().contains("Biology"));

        let err: ApiError = McqError::NoContent("xyz".to_string()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_index_page_embedded() {
        assert!(INDEX_HTML.contains("MCQ Generator"));
        assert!(INDEX_HTML.contains("/generate"));
    }
}
