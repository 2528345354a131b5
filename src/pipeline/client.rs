//! Vision-model interaction: build the request and drive the retry loop.
//!
//! The HTTP call itself sits behind the [`Transport`] trait. The production
//! [`GeminiTransport`] POSTs to `…/v1beta/models/{model}:generateContent`;
//! tests substitute a scripted transport to exercise rate-limit handling
//! without a network.
//!
//! ## Retry Strategy
//!
//! Every failed attempt (HTTP 429, any other status, network error,
//! unreadable response) waits the current backoff, doubles it and tries
//! again, up to `max_attempts` requests in total. No wait follows the last
//! attempt. With the defaults the sequence is 5 s → 10 s → 20 s → 40 s.

use crate::config::{ApiKey, ExtractionConfig};
use crate::error::{ImageError, RxError, TransportError};
use crate::pipeline::encode::{encode_image, InlineImage};
use crate::pipeline::pacing::{Backoff, Sleeper};
use crate::prompts::EXTRACTION_PROMPT;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ── Wire types ───────────────────────────────────────────────────────────

/// `generateContent` request body.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

/// One part of a multi-part message.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineImage,
    },
}

impl GenerateRequest {
    /// A single message: the prompt followed by the image.
    pub fn prompt_with_image(prompt: &str, image: InlineImage) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: prompt.to_string(),
                    },
                    Part::InlineData { inline_data: image },
                ],
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Pull `candidates[0].content.parts[0].text` out of a response body.
pub fn answer_text(body: &str) -> Result<String, TransportError> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::MalformedResponse(format!("invalid JSON body: {e}")))?;

    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| {
            TransportError::MalformedResponse(
                "missing candidates[0].content.parts[0].text".to_string(),
            )
        })
}

// ── Transport ────────────────────────────────────────────────────────────

/// One request/response exchange with the vision endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the model's raw text answer.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, TransportError>;
}

/// HTTP transport for Google's `generateContent` API.
pub struct GeminiTransport {
    http: reqwest::Client,
    url: String,
    key: ApiKey,
}

impl GeminiTransport {
    pub fn new(key: ApiKey, config: &ExtractionConfig) -> Result<Self, RxError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RxError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: generate_url(&config.endpoint, &config.model),
            key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// `{endpoint}/v1beta/models/{model}:generateContent`
pub fn generate_url(endpoint: &str, model: &str) -> String {
    format!(
        "{}/v1beta/models/{}:generateContent",
        endpoint.trim_end_matches('/'),
        model
    )
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, TransportError> {
        let response = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", self.key.expose())
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited);
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        answer_text(&body)
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Sends one image at a time to the vision model, retrying on failure.
pub struct ExtractionClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    config: ExtractionConfig,
}

impl ExtractionClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            transport,
            sleeper,
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Suspend through the client's sleeper; used for the pause between images.
    pub async fn pause(&self, duration: Duration) {
        self.sleeper.sleep(duration).await;
    }

    /// Build the request body for one image.
    pub fn build_request(&self, image_bytes: &[u8]) -> GenerateRequest {
        let prompt = self.config.prompt.as_deref().unwrap_or(EXTRACTION_PROMPT);
        GenerateRequest::prompt_with_image(
            prompt,
            encode_image(image_bytes, &self.config.mime_type),
        )
    }

    /// Ask the model about one image and return its raw text answer.
    ///
    /// `file` only labels log lines and the returned error.
    pub async fn request_extraction(
        &self,
        file: &str,
        image_bytes: &[u8],
    ) -> Result<String, ImageError> {
        let request = self.build_request(image_bytes);
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let max = self.config.max_attempts;
        let mut last_err: Option<TransportError> = None;

        for attempt in 1..=max {
            match self.transport.generate(&request).await {
                Ok(text) => {
                    debug!("{}: answered on attempt {} ({} chars)", file, attempt, text.len());
                    return Ok(text);
                }
                Err(e) => {
                    let is_last = attempt == max;
                    let wait = backoff.peek();
                    match &e {
                        TransportError::RateLimited if !is_last => warn!(
                            "{}: Too Many Requests. Waiting {:?} before retry {}/{}",
                            file,
                            wait,
                            attempt + 1,
                            max
                        ),
                        _ if !is_last => warn!(
                            "{}: attempt {} failed: {}. Waiting {:?}",
                            file, attempt, e, wait
                        ),
                        _ => warn!("{}: attempt {} failed: {}", file, attempt, e),
                    }
                    last_err = Some(e);
                    if !is_last {
                        if let Some(d) = backoff.next() {
                            self.sleeper.sleep(d).await;
                        }
                    }
                }
            }
        }

        Err(ImageError::RetriesExhausted {
            file: file.to_string(),
            attempts: max,
            detail: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}
