//! Gemini API 공통 모듈
//!
//! 임베딩/생성 클라이언트가 공유하는 HTTP 호출, Rate Limiter, 재시도 정책,
//! API 키 관리를 담당합니다.
//!
//! API 키는 URL이 아닌 `x-goog-api-key` 헤더로 전송합니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{RagError, Result};

/// Gemini API 기본 URL
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이 (1000ms = 60 RPM 준수)
const MIN_DELAY_MS: u64 = 1000;
/// 429/전송 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// API 키 환경변수 (우선순위 순)
const API_KEY_VARS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY", "GOOGLE_API_KEY"];

// ============================================================================
// Rate Limiter
// ============================================================================

/// 임베딩/생성 클라이언트가 함께 쓰는 Rate Limiter
pub type SharedRateLimiter = Arc<Mutex<RateLimiter>>;

/// 기본 설정(60 RPM)의 공유 Rate Limiter
pub fn shared_rate_limiter() -> SharedRateLimiter {
    Arc::new(Mutex::new(RateLimiter::default()))
}

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
pub struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    pub(crate) async fn acquire(&mut self) {
        // 1. 최소 딜레이 적용 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        // 2. 윈도우 밖의 오래된 요청 제거
        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. Rate limit 초과 시 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        // 4. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            RATE_LIMIT_RPM,
            RATE_LIMIT_WINDOW,
            Duration::from_millis(MIN_DELAY_MS),
        )
    }
}

// ============================================================================
// Gemini HTTP Client
// ============================================================================

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

/// Gemini REST 호출기 (rate limit + 429 백오프)
///
/// 에러는 호출 측 서비스 분류(`EmbeddingService`, `GenerationService`)로 변환됩니다.
#[derive(Debug)]
pub(crate) struct GeminiClient {
    api_key: String,
    client: reqwest::Client,
    timeout: Duration,
    rate_limiter: SharedRateLimiter,
    service_error: fn(String) -> RagError,
}

impl GeminiClient {
    pub(crate) fn new(
        api_key: String,
        timeout: Duration,
        service_error: fn(String) -> RagError,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| service_error(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            timeout,
            rate_limiter: shared_rate_limiter(),
            service_error,
        })
    }

    /// 다른 클라이언트와 같은 Rate Limiter 사용
    pub(crate) fn set_rate_limiter(&mut self, limiter: SharedRateLimiter) {
        self.rate_limiter = limiter;
    }

    /// `{GEMINI_API_BASE}/models/{model}:{method}`
    pub(crate) fn model_url(model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", GEMINI_API_BASE, model, method)
    }

    /// JSON POST 후 응답 파싱 (재시도 루프 포함)
    pub(crate) async fn post_json<Req, Resp>(&self, url: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let fail = self.service_error;
        let mut last_error: Option<RagError> = None;

        for attempt in 0..=MAX_RETRIES {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

            let response = match self
                .client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    return Err(fail(format!("Request timed out after {:?}", self.timeout)));
                }
                Err(e) => {
                    last_error = Some(fail(format!("Failed to send request: {}", e)));
                    if attempt < MAX_RETRIES {
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
                .map_err(|e| fail(format!("Failed to read response body: {}", e)))?;

            if status.is_success() {
                return serde_json::from_str(&body)
                    .map_err(|e| fail(format!("Malformed response payload: {}", e)));
            }

            // 429 Rate Limit 에러 - 재시도
            if status.as_u16() == 429 {
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(fail("Rate limit exceeded (429)".to_string()));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                break;
            }

            // 다른 에러 - 즉시 실패
            return Err(fail(describe_error(status, &body)));
        }

        Err(last_error
            .unwrap_or_else(|| fail(format!("Request failed after {} retries", MAX_RETRIES))))
    }
}

/// 에러 응답 본문을 사람이 읽을 수 있는 메시지로 변환
fn describe_error(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<GeminiError>(body) {
        Ok(error) => format!(
            "Gemini API error ({}): {}",
            error.error.status, error.error.message
        ),
        Err(_) => format!("Gemini API error ({}): {}", status, body),
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY`
/// 2. `GOOGLE_AI_API_KEY`
/// 3. `GOOGLE_API_KEY`
pub fn get_api_key() -> Result<String> {
    for var in API_KEY_VARS {
        if let Ok(key) = std::env::var(var) {
            if !key.trim().is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    Err(RagError::Config(
        "API key not found. Set GEMINI_API_KEY, GOOGLE_AI_API_KEY or GOOGLE_API_KEY.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
            .to_string(),
    ))
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    API_KEY_VARS
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.trim().is_empty()).unwrap_or(false))
}

// ============================================================================
// Tests
// ============================================================================
