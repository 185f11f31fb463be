//! Service configuration loaded from the process environment.
//!
//! Required variables are checked up front so a misconfigured process
//! refuses to start instead of failing on the first request.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const ENV_PUBLIC_URL: &str = "PARLEY_PUBLIC_URL";

const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_CLASSIFIER_URL: &str =
    "https://api-inference.huggingface.co/models/google/vit-base-patch16-224";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Number of turns kept per session.
pub const HISTORY_CAPACITY: usize = 25;

/// Number of classifier labels folded into a grounded prompt.
pub const GROUNDING_TOP_K: usize = 3;

/// Configuration error. Any of these is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingVar { var: String },

    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },

    #[error("Multiple configuration errors: {0:?}")]
    Multiple(Vec<ConfigError>),
}

/// API credential. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Largest accepted multipart upload.
    pub max_upload_bytes: usize,
}

/// Gemini conversation settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: ApiKey,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    /// Default model and generation settings for `api_key`.
    pub fn with_key(api_key: ApiKey) -> Self {
        Self {
            api_key,
            model: DEFAULT_GEMINI_MODEL.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.into(),
            temperature: 1.0,
            top_p: 0.95,
            top_k: 64,
            max_output_tokens: 8192,
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub url: String,
    pub token: Option<ApiKey>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Timeout for fetching a remote image.
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            idle_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthProbeConfig {
    /// Public base URL of this service; the probe hits `{base}/ping`.
    pub public_url: Url,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthProbeConfig {
    /// Full probe target.
    pub fn ping_url(&self) -> String {
        format!("{}/ping", self.public_url.as_str().trim_end_matches('/'))
    }
}

/// Root configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub classifier: ClassifierConfig,
    pub images: ImageConfig,
    pub sessions: SessionConfig,
    pub health: HealthProbeConfig,
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Every problem is collected before returning so one startup attempt
    /// reports all of them.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reader = EnvReader {
            lookup: &lookup,
            errors: Vec::new(),
        };

        let api_key = reader
            .optional(ENV_GEMINI_API_KEY)
            .or_else(|| reader.optional(ENV_GOOGLE_API_KEY));
        if api_key.is_none() {
            reader.errors.push(ConfigError::MissingVar {
                var: ENV_GEMINI_API_KEY.into(),
            });
        }

        let public_url = reader
            .required(ENV_PUBLIC_URL)
            .and_then(|raw| reader.http_url(ENV_PUBLIC_URL, &raw));

        let server = ServerConfig {
            host: reader.parsed("PARLEY_HOST", DEFAULT_HOST),
            port: reader.parsed("PARLEY_PORT", DEFAULT_PORT),
            max_upload_bytes: reader.positive("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
        };

        let mut gemini = GeminiConfig::with_key(ApiKey::new(api_key.clone().unwrap_or_default()));
        if let Some(model) = reader.optional("GEMINI_MODEL") {
            gemini.model = model;
        }
        if let Some(base_url) = reader.optional("GEMINI_BASE_URL") {
            if reader.http_url("GEMINI_BASE_URL", &base_url).is_some() {
                gemini.base_url = base_url.trim_end_matches('/').to_string();
            }
        }

        let classifier_url = reader
            .optional("CLASSIFIER_URL")
            .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.into());
        reader.http_url("CLASSIFIER_URL", &classifier_url);

        let classifier = ClassifierConfig {
            url: classifier_url,
            token: reader.optional("CLASSIFIER_TOKEN").map(ApiKey::new),
            request_timeout: Duration::from_secs(30),
        };

        let images = ImageConfig {
            fetch_timeout: Duration::from_secs(reader.positive("IMAGE_FETCH_TIMEOUT_SECS", 10)),
        };

        let defaults = SessionConfig::default();
        let sessions = SessionConfig {
            max_sessions: reader.positive("MAX_SESSIONS", defaults.max_sessions),
            idle_timeout: Duration::from_secs(
                reader.positive("SESSION_IDLE_TIMEOUT_SECS", defaults.idle_timeout.as_secs()),
            ),
            sweep_interval: defaults.sweep_interval,
        };

        let probe_interval = reader.positive("HEALTH_PROBE_INTERVAL_SECS", 600);

        let log_level = reader
            .optional("PARLEY_LOG_LEVEL")
            .unwrap_or_else(|| ObservabilityConfig::default().log_level);
        let log_format = reader.parsed("PARLEY_LOG_FORMAT", LogFormat::Pretty);

        match (api_key, public_url) {
            (Some(_), Some(public_url)) if reader.errors.is_empty() => Ok(Self {
                server,
                gemini,
                classifier,
                images,
                sessions,
                health: HealthProbeConfig {
                    public_url,
                    interval: Duration::from_secs(probe_interval),
                    timeout: Duration::from_secs(10),
                },
                observability: ObservabilityConfig {
                    log_level,
                    log_format,
                },
            }),
            _ => {
                let mut errors = reader.errors;
                if errors.len() == 1 {
                    Err(errors.remove(0))
                } else {
                    Err(ConfigError::Multiple(errors))
                }
            }
        }
    }
}

fn parse_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(format!("unsupported scheme '{scheme}'")),
    }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
    errors: Vec<ConfigError>,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty, trimmed value of `var`.
    fn optional(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&mut self, var: &str) -> Option<String> {
        let value = self.optional(var);
        if value.is_none() {
            self.errors.push(ConfigError::MissingVar { var: var.into() });
        }
        value
    }

    /// Parse `raw` as an http(s) URL, recording an error against `var`.
    fn http_url(&mut self, var: &str, raw: &str) -> Option<Url> {
        match parse_http_url(raw) {
            Ok(url) => Some(url),
            Err(reason) => {
                self.errors.push(ConfigError::InvalidValue {
                    var: var.into(),
                    reason,
                });
                None
            }
        }
    }

    fn parsed<T>(&mut self, var: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(var) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|e: T::Err| {
                self.errors.push(ConfigError::InvalidValue {
                    var: var.into(),
                    reason: e.to_string(),
                });
                default
            }),
        }
    }

    fn positive<T>(&mut self, var: &str, default: T) -> T
    where
        T: FromStr + PartialOrd + Default + Copy,
        T::Err: fmt::Display,
    {
        let value = self.parsed(var, default);
        if value <= T::default() {
            self.errors.push(ConfigError::InvalidValue {
                var: var.into(),
                reason: "must be greater than zero".into(),
            });
            return default;
        }
        value
    }
}
