//! 상태 싱크 - 수집 상태 전이를 외부에 통보
//!
//! 싱크 호출 실패는 로그로만 남기며 수집 상태 머신을 중단하지 않습니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::StatusCallbackConfig;
use crate::error::{RagError, Result};
use crate::knowledge::SourceStatus;

/// 상태 싱크 트레이트
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn report(&self, source_id: &str, status: SourceStatus, detail: Option<&str>)
        -> Result<()>;
}

/// 싱크에 통보하고 실패는 경고로만 기록
pub(crate) async fn notify(
    sink: &dyn StatusSink,
    source_id: &str,
    status: SourceStatus,
    detail: Option<&str>,
) {
    if let Err(e) = sink.report(source_id, status, detail).await {
        tracing::warn!(
            "Status sink failed for source {} ({}): {}",
            source_id,
            status,
            e
        );
    }
}

// ============================================================================
// LogStatusSink
// ============================================================================

/// 로그만 남기는 싱크 (콜백 미설정 시 기본값)
#[derive(Debug, Default)]
pub struct LogStatusSink;

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn report(
        &self,
        source_id: &str,
        status: SourceStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        match detail {
            Some(detail) => tracing::info!("Source {} -> {} ({})", source_id, status, detail),
            None => tracing::info!("Source {} -> {}", source_id, status),
        }
        Ok(())
    }
}

// ============================================================================
// HttpStatusSink
// ============================================================================

/// 콜백 요청 본문
#[derive(Debug, Serialize)]
struct StatusUpdate<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

/// `PATCH {base}/{source_id}/status` 로 통보하는 싱크
pub struct HttpStatusSink {
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
}

impl HttpStatusSink {
    pub fn new(config: &StatusCallbackConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            secret: config.secret.clone(),
        })
    }

    fn endpoint(&self, source_id: &str) -> String {
        format!("{}/{}/status", self.base_url, source_id)
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn report(
        &self,
        source_id: &str,
        status: SourceStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        let body = StatusUpdate {
            status: status.as_str(),
            details: detail,
        };

        let mut request = self.client.patch(self.endpoint(source_id)).json(&body);
        if let Some(secret) = &self.secret {
            request = request.header("X-Action-Secret", secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RagError::StatusCallback(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RagError::StatusCallback(format!(
                "HTTP {} from {}",
                response.status(),
                self.endpoint(source_id)
            )));
        }

        tracing::debug!("Reported {} for source {}", status, source_id);
        Ok(())
    }
}
