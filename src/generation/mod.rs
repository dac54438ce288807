//! 생성 모듈 - Gemini `generateContent` 호출
//!
//! 프롬프트 문자열을 응답 문자열로 변환합니다. 재시도는 rate limit(429)과
//! 전송 에러에만 적용되며, 나머지 실패는 `GenerationService` 에러입니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::gemini::{get_api_key, GeminiClient, SharedRateLimiter};

// ============================================================================
// GenerationProvider Trait
// ============================================================================

/// 생성 모델 프로바이더 트레이트
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 프롬프트로 응답 생성
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Generation
// ============================================================================

/// Google Gemini 생성 구현체
#[derive(Debug)]
pub struct GeminiGeneration {
    client: GeminiClient,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiGeneration {
    pub fn new(api_key: String, config: &GenerationConfig) -> Result<Self> {
        let client = GeminiClient::new(
            api_key,
            Duration::from_secs(config.timeout_secs),
            RagError::GenerationService,
        )?;

        Ok(Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(config: &GenerationConfig) -> Result<Self> {
        let api_key = get_api_key()?;
        let generator = Self::new(api_key, config)?;
        tracing::info!("Using Gemini generation model {}", generator.model);
        Ok(generator)
    }

    /// 임베딩 클라이언트와 Rate Limiter 공유
    pub fn with_rate_limiter(mut self, limiter: SharedRateLimiter) -> Self {
        self.client.set_rate_limiter(limiter);
        self
    }

    fn request(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationParams {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationParams {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// 첫 후보의 텍스트 파트를 이어 붙임 (비어 있으면 에러)
fn extract_answer(response: GenerateResponse) -> Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| RagError::generation("Empty response: no candidates"))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(RagError::generation(format!(
            "Empty response (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}

#[async_trait]
impl GenerationProvider for GeminiGeneration {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = GeminiClient::model_url(&self.model, "generateContent");
        let response: GenerateResponse = self.client.post_json(&url, &self.request(prompt)).await?;
        extract_answer(response)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
