//! 웹 스크래퍼 모듈 - URL 콘텐츠 추출
//!
//! `website` 소스의 페이지를 가져와 제목과 본문 텍스트만 남깁니다.

use std::time::Duration;

use scraper::{ElementRef, Html, Selector};

use crate::error::{RagError, Result};

/// 본문 후보 셀렉터 (우선순위 순)
const CONTENT_SELECTORS: [&str; 6] = [
    "article",
    "main",
    "[role=main]",
    ".content",
    "#content",
    "body",
];

/// 본문으로 인정할 최소 길이
const MIN_CONTENT_CHARS: usize = 100;

/// 텍스트를 수집하지 않는 태그
const SKIPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

/// 스크랩된 콘텐츠
#[derive(Debug, Clone)]
pub struct ScrapedContent {
    /// 페이지 제목
    pub title: Option<String>,
    /// 본문 텍스트 (HTML 태그 제거됨)
    pub content: String,
    /// 원본 URL
    pub url: String,
}

impl ScrapedContent {
    /// 제목을 머리글로 붙인 수집용 텍스트
    pub fn to_text(&self) -> String {
        match &self.title {
            Some(title) if !self.content.is_empty() => format!("# {}\n\n{}", title, self.content),
            _ => self.content.clone(),
        }
    }
}

/// 웹 스크래퍼
pub struct WebScraper {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebScraper {
    /// 새 스크래퍼 생성
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chatbot-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::source_load(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// URL에서 콘텐츠 추출
    pub async fn scrape(&self, url: &str) -> Result<ScrapedContent> {
        let parsed = validate_url(url)?;
        tracing::info!("Scraping: {}", parsed);

        let response = self.client.get(parsed.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                RagError::source_load(format!("Timed out after {:?} fetching {}", self.timeout, url))
            } else {
                RagError::source_load(format!("HTTP request failed for {}: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RagError::source_load(format!(
                "HTTP {} fetching {}",
                status, url
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| RagError::source_load(format!("Failed to read response body: {}", e)))?;

        Ok(parse_html(&html, url))
    }
}

/// http/https URL만 허용
fn validate_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| RagError::source_load(format!("Invalid URL '{}': {}", raw, e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(RagError::source_load(format!(
            "Unsupported URL scheme: {}",
            other
        ))),
    }
}

/// HTML 문서에서 제목과 본문 추출
pub fn parse_html(html: &str, url: &str) -> ScrapedContent {
    let document = Html::parse_document(html);
    ScrapedContent {
        title: extract_title(&document),
        content: extract_content(&document),
        url: url.to_string(),
    }
}

/// 제목 추출 (`<title>`, 없으면 `<h1>`)
fn extract_title(document: &Html) -> Option<String> {
    ["title", "h1"].iter().find_map(|tag| {
        let selector = Selector::parse(tag).ok()?;
        let element = document.select(&selector).next()?;
        let title = collapse_whitespace(&element.text().collect::<String>());
        (!title.is_empty()).then_some(title)
    })
}

/// 본문 추출 (우선순위 셀렉터 중 충분히 긴 첫 요소, 없으면 body)
fn extract_content(document: &Html) -> String {
    let mut fallback = String::new();

    for selector_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = extract_text_from_element(&element);
            if text.chars().count() > MIN_CONTENT_CHARS {
                return text;
            }
            if selector_str == "body" {
                fallback = text;
            }
        }
    }

    fallback
}

/// 요소에서 텍스트 추출 (스크립트/스타일 제외)
fn extract_text_from_element(element: &ElementRef) -> String {
    let mut text = String::new();

    for node in element.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };

        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| SKIPPED_TAGS.contains(&e.name()))
                .unwrap_or(false)
        });
        if skipped {
            continue;
        }

        let trimmed = fragment.trim();
        if !trimmed.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(trimmed);
        }
    }

    collapse_whitespace(&text)
}

/// 연속 공백 정리
fn collapse_whitespace(text: &str) -> String {
    match regex::Regex::new(r"\s+") {
        Ok(re) => re.replace_all(text, " ").trim().to_string(),
        Err(_) => text.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scraper_creation() {
        assert!(WebScraper::new(Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn test_extract_title() {
        let html = r#"
            <html>
                <head><title>Test Page Title</title></head>
                <body><h1>Main Heading</h1></body>
            </html>
        "#;
        let page = parse_html(html, "https://example.com");
        assert_eq!(page.title, Some("Test Page Title".to_string()));
    }

    #[test]
    fn test_extract_title_h1_fallback() {
        let html = r#"
            <html>
                <head><title></title></head>
                <body><h1>H1 Heading</h1></body>
            </html>
        "#;
        let page = parse_html(html, "https://example.com");
        assert_eq!(page.title, Some("H1 Heading".to_string()));
    }

    #[test]
    fn test_extract_content_from_article() {
        let html = r#"
            <html>
                <body>
                    <nav>Navigation menu</nav>
                    <article>
                        This is the main article content.
                        It should be extracted as the primary content.
                        More text to ensure it's over 100 characters.
                    </article>
                    <footer>Footer content</footer>
                </body>
            </html>
        "#;
        let page = parse_html(html, "https://example.com");
        assert!(page.content.contains("main article content"));
        assert!(!page.content.contains("Navigation menu"));
    }

    #[test]
    fn test_scripts_and_styles_skipped() {
        let html = r#"
            <html>
                <head><style>body { color: red; }</style></head>
                <body>
                    <p>Visible   text</p>
                    <script>var secret = 1;</script>
                </body>
            </html>
        "#;
        let page = parse_html(html, "https://example.com");
        assert_eq!(page.content, "Visible text");
    }

    #[test]
    fn test_to_text_prepends_title() {
        let page = ScrapedContent {
            title: Some("Pricing".to_string()),
            content: "Plans start at $10.".to_string(),
            url: "https://example.com/pricing".to_string(),
        };
        assert_eq!(page.to_text(), "# Pricing\n\nPlans start at $10.");

        let empty = ScrapedContent {
            content: String::new(),
            ..page
        };
        assert_eq!(empty.to_text(), "");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/docs").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com"),
            Err(RagError::SourceLoad(_))
        ));
        assert!(validate_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_url_is_source_load_error() {
        let scraper = WebScraper::new(Duration::from_secs(5)).unwrap();
        let err = scraper.scrape("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, RagError::SourceLoad(_)));
    }
}
