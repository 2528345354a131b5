//! Configuration types for enhancement and extraction batches.
//!
//! Enhancement is controlled by [`EnhanceConfig`]; extraction by
//! [`ExtractionConfig`], built via its [`ExtractionConfigBuilder`]. The API
//! credential lives in its own [`ApiKey`] value, read once at startup and
//! handed to the client at construction.
//!
//! Defaults reproduce the constants the pipeline was tuned with: an
//! 800 px target width, NL-means strength 10, CLAHE clip 2.0 on an 8×8 grid,
//! five attempts starting at a 5 s backoff, and 20–40 s between images.

use crate::error::RxError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the vision API key.
pub const API_KEY_ENV: &str = "GEMINI_KEY";

/// Default vision endpoint root.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";

// ── Credential ───────────────────────────────────────────────────────────

/// API credential for the vision endpoint.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap an explicit key. Empty keys are rejected.
    pub fn new(key: impl Into<String>) -> Result<Self, RxError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(RxError::MissingCredential {
                var: API_KEY_ENV.to_string(),
            });
        }
        Ok(Self(key))
    }

    /// Read the key from [`API_KEY_ENV`]. Absent or empty is fatal.
    pub fn from_env() -> Result<Self, RxError> {
        Self::from_env_var(API_KEY_ENV)
    }

    /// Read the key from an arbitrary environment variable.
    pub fn from_env_var(var: &str) -> Result<Self, RxError> {
        match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => Ok(Self(v)),
            _ => Err(RxError::MissingCredential {
                var: var.to_string(),
            }),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

// ── Enhancement ──────────────────────────────────────────────────────────

/// Parameters of the fixed enhancement filter chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhanceConfig {
    /// Output width in pixels. Height follows the source aspect ratio. Default: 800.
    pub target_width: u32,

    /// Non-local-means filter strength `h`. Default: 10.0.
    ///
    /// Larger values remove more noise and more fine detail.
    pub denoise_strength: f32,

    /// Side of the square patch compared by NL-means (odd). Default: 7.
    pub denoise_patch: u32,

    /// Side of the square search window scanned by NL-means (odd). Default: 21.
    pub denoise_search: u32,

    /// CLAHE clip limit relative to a uniform histogram. Default: 2.0.
    pub clahe_clip_limit: f32,

    /// CLAHE tile grid (tiles per axis). Default: 8.
    pub clahe_grid: u32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            target_width: 800,
            denoise_strength: 10.0,
            denoise_patch: 7,
            denoise_search: 21,
            clahe_clip_limit: 2.0,
            clahe_grid: 8,
        }
    }
}

impl EnhanceConfig {
    /// Check invariants the filters rely on.
    pub fn validate(&self) -> Result<(), RxError> {
        if self.target_width == 0 {
            return Err(RxError::InvalidConfig("target width must be ≥ 1".into()));
        }
        if self.denoise_patch % 2 == 0 || self.denoise_search % 2 == 0 {
            return Err(RxError::InvalidConfig(format!(
                "NL-means windows must be odd, got patch {} / search {}",
                self.denoise_patch, self.denoise_search
            )));
        }
        if self.denoise_patch > self.denoise_search {
            return Err(RxError::InvalidConfig(
                "NL-means patch window must not exceed the search window".into(),
            ));
        }
        if self.clahe_grid == 0 {
            return Err(RxError::InvalidConfig("CLAHE grid must be ≥ 1".into()));
        }
        if self.clahe_clip_limit <= 0.0 {
            return Err(RxError::InvalidConfig(format!(
                "CLAHE clip limit must be positive, got {}",
                self.clahe_clip_limit
            )));
        }
        Ok(())
    }
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Configuration for an extraction batch.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use rxparse::ExtractionConfig;
/// use std::time::Duration;
///
/// let config = ExtractionConfig::builder()
///     .model("gemini-1.5-flash")
///     .max_attempts(3)
///     .pacing(Duration::ZERO, Duration::ZERO)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 3);
/// ```
#[derive(Clone, PartialEq)]
pub struct ExtractionConfig {
    /// Endpoint root, without the `/v1beta/...` path. Default: Google's public API.
    pub endpoint: String,

    /// Model identifier. Default: `gemini-1.5-pro`.
    pub model: String,

    /// Maximum request attempts per image. Default: 5.
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles after every failure. Default: 5 s.
    pub initial_backoff: Duration,

    /// Ceiling for the doubling backoff. `None` lets it grow unbounded. Default: 300 s.
    pub max_backoff: Option<Duration>,

    /// Lower bound of the randomised pause after each image. Default: 20 s.
    pub pacing_min: Duration,

    /// Upper bound of the randomised pause after each image. Default: 40 s.
    pub pacing_max: Duration,

    /// Per-request HTTP timeout. Default: 120 s.
    pub request_timeout: Duration,

    /// Custom instruction prompt. If None, uses the built-in one.
    pub prompt: Option<String>,

    /// MIME type declared for the inline image payload. Default: `image/jpeg`.
    pub mime_type: String,

    /// Folder receiving `<stem>.json` records.
    pub output_dir: PathBuf,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_attempts: 5,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Some(Duration::from_secs(300)),
            pacing_min: Duration::from_secs(20),
            pacing_max: Duration::from_secs(40),
            request_timeout: Duration::from_secs(120),
            prompt: None,
            mime_type: "image/jpeg".to_string(),
            output_dir: PathBuf::from("output_json_gemini"),
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("pacing", &(self.pacing_min, self.pacing_max))
            .field("request_timeout", &self.request_timeout)
            .field("prompt", &self.prompt.as_ref().map(|p| p.len()))
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn initial_backoff(mut self, d: Duration) -> Self {
        self.config.initial_backoff = d;
        self
    }

    pub fn max_backoff(mut self, d: Option<Duration>) -> Self {
        self.config.max_backoff = d;
        self
    }

    pub fn pacing(mut self, min: Duration, max: Duration) -> Self {
        self.config.pacing_min = min;
        self.config.pacing_max = max;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.config.request_timeout = d;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.config.mime_type = mime.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, RxError> {
        let c = &self.config;
        if c.max_attempts == 0 {
            return Err(RxError::InvalidConfig("max attempts must be ≥ 1".into()));
        }
        if c.pacing_min > c.pacing_max {
            return Err(RxError::InvalidConfig(format!(
                "pacing window is empty: {:?} > {:?}",
                c.pacing_min, c.pacing_max
            )));
        }
        if let Some(cap) = c.max_backoff {
            if cap < c.initial_backoff {
                return Err(RxError::InvalidConfig(format!(
                    "max backoff {:?} is below the initial backoff {:?}",
                    cap, c.initial_backoff
                )));
            }
        }
        if c.model.trim().is_empty() {
            return Err(RxError::InvalidConfig("model must not be empty".into()));
        }
        Ok(self.config)
    }
}
