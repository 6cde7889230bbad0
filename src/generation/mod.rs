//! 생성 모듈 - Groq API를 통한 LLM 호출
//!
//! MCQ 생성, 주제 검증, 단원 감지에 사용하는 챗 컴플리션 클라이언트입니다.
//! Groq의 OpenAI 호환 엔드포인트를 사용합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let groq = GroqClient::from_env()?;
//! let answer = groq.complete("You are a teacher.", "Say hello", ChatOptions::default()).await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// ChatProvider Trait
// ============================================================================

/// 챗 호출 옵션
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    /// 샘플링 온도
    pub temperature: f32,
    /// 최대 생성 토큰 수
    pub max_tokens: u32,
    /// nucleus sampling (None이면 서버 기본값)
    pub top_p: Option<f32>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1024,
            top_p: None,
        }
    }
}

/// 챗 프로바이더 트레이트
///
/// 시스템/유저 프롬프트 한 쌍으로 단발 호출하는 인터페이스입니다.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// 단발 챗 컴플리션
    ///
    /// 어시스턴트 응답 텍스트를 트림하여 반환합니다.
    async fn complete(&self, system: &str, user: &str, options: ChatOptions) -> Result<String>;

    /// 모델 이름
    fn model_name(&self) -> &str;
}

// ============================================================================
// Groq Client
// ============================================================================

/// Groq 챗 컴플리션 엔드포인트 (OpenAI 호환)
const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// 기본 모델
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Groq API 클라이언트
#[derive(Debug)]
pub struct GroqClient {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl GroqClient {
    /// 새 클라이언트 생성 (기본 모델)
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    /// 모델을 지정하여 생성
    pub fn with_model(api_key: String, model: &str) -> Result<Self> {
        if model.trim().is_empty() {
            anyhow::bail!("Model name must not be empty");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            model: model.to_string(),
        })
    }

    /// 환경변수(GROQ_API_KEY)에서 키를 읽어 생성
    pub fn from_env() -> Result<Self> {
        let api_key = get_groq_api_key()?;
        Self::new(api_key)
    }
}

/// 챗 메시지
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Groq API 요청 본문
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

/// Groq API 응답
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Groq API 에러 응답
#[derive(Debug, Deserialize)]
struct GroqError {
    error: GroqErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GroqErrorDetail {
    message: String,
    #[serde(default, rename = "type")]
    error_type: String,
}

#[async_trait]
impl ChatProvider for GroqClient {
    async fn complete(&self, system: &str, user: &str, options: ChatOptions) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 재시도 루프 (429 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            let response = match self
                .client
                .post(GROQ_CHAT_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send chat request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let chat_response: ChatResponse =
                    serde_json::from_str(&body).context("Failed to parse chat response")?;

                let content = chat_response
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| anyhow::anyhow!("Chat response contained no choices"))?;

                return Ok(content.trim().to_string());
            }

            if status.as_u16() == 429 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                // 429 외의 에러는 즉시 실패
                if let Ok(error) = serde_json::from_str::<GroqError>(&body) {
                    anyhow::bail!(
                        "Groq API error ({}): {}",
                        error.error.error_type,
                        error.error.message
                    );
                }
                anyhow::bail!("Groq API error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after {} retries", MAX_RETRIES)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// GROQ_API_KEY 환경변수에서 API 키 로드
pub fn get_groq_api_key() -> Result<String> {
    match std::env::var("GROQ_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => anyhow::bail!(
            "GROQ_API_KEY not set.\n\
             Get a free API key at: https://console.groq.com/keys"
        ),
    }
}

/// GROQ_API_KEY 존재 여부 확인
pub fn has_groq_api_key() -> bool {
    std::env::var("GROQ_API_KEY")
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
