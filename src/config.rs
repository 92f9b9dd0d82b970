//! Configuration types.
//!
//! All values are read once at startup and treated as read-only afterwards.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default flag threshold: scores at or above this are surfaced to reviewers.
pub const DEFAULT_FLAG_THRESHOLD: u8 = 30;

/// Scan scheduler sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of scans running at once.
    pub concurrency: usize,
    /// Maximum number of scans waiting for a worker slot.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            capacity: 500,
        }
    }
}

/// Retry policy applied per scan task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Base delay, doubled per attempt.
    pub base_delay: Duration,
    /// Hard ceiling on the jittered delay.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added before the ceiling.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub llm: LlmConfig,
    pub queue: QueueConfig,
    pub retry: RetryPolicy,
    /// Deadline for a single model call.
    pub request_timeout: Duration,
    /// Score at which a result is surfaced to a human reviewer.
    pub flag_threshold: u8,
    /// How long a processed message id stays in the dedupe cache.
    pub dedupe_ttl: Duration,
    /// Dedupe cache capacity before pruning kicks in.
    pub dedupe_max_entries: usize,
}

impl ScanConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("LLM_PROVIDER").as_deref().map(str::trim) {
            None | Some("") | Some("gemini") => LlmBackend::Gemini,
            Some("ollama") => LlmBackend::Ollama,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_PROVIDER".into(),
                    message: format!("expected 'gemini' or 'ollama', got '{other}'"),
                });
            }
        };

        let api_key = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty());
        if backend == LlmBackend::Gemini && api_key.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "GEMINI_API_KEY".into(),
                hint: "Required when LLM_PROVIDER=gemini.".into(),
            });
        }

        let llm = LlmConfig {
            backend,
            api_key: api_key.map(secrecy::SecretString::from),
            gemini_model: lookup("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            ollama_base_url: lookup("OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            ollama_model: lookup("OLLAMA_MODEL").unwrap_or_else(|| "gemma3:4b".to_string()),
        };

        let queue = QueueConfig {
            concurrency: parse_in_range(&lookup, "MAX_CONCURRENCY", 2usize, 1, 10)?,
            capacity: parse_in_range(&lookup, "MAX_QUEUE_SIZE", 500usize, 10, 5000)?,
        };

        let base_ms = parse_in_range(&lookup, "SCAN_RETRY_BASE_DELAY_MS", 1000u64, 0, 60_000)?;
        let max_ms = parse_in_range(&lookup, "SCAN_RETRY_MAX_DELAY_MS", 30_000u64, 0, 300_000)?;
        if max_ms < base_ms {
            return Err(ConfigError::InvalidValue {
                key: "SCAN_RETRY_MAX_DELAY_MS".into(),
                message: format!("must be >= SCAN_RETRY_BASE_DELAY_MS ({base_ms})"),
            });
        }
        let retry = RetryPolicy {
            attempts: parse_in_range(&lookup, "SCAN_RETRY_ATTEMPTS", 3u32, 1, 10)?,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            ..RetryPolicy::default()
        };

        let timeout_ms =
            parse_in_range(&lookup, "SCAN_REQUEST_TIMEOUT_MS", 30_000u64, 1000, 120_000)?;

        Ok(Self {
            llm,
            queue,
            retry,
            request_timeout: Duration::from_millis(timeout_ms),
            flag_threshold: parse_in_range(
                &lookup,
                "SCAN_FLAG_THRESHOLD",
                DEFAULT_FLAG_THRESHOLD,
                0,
                100,
            )?,
            dedupe_ttl: Duration::from_secs(parse_in_range(
                &lookup,
                "DEDUPE_TTL_SECS",
                60u64,
                1,
                86_400,
            )?),
            dedupe_max_entries: parse_in_range(
                &lookup,
                "DEDUPE_MAX_ENTRIES",
                1000usize,
                10,
                1_000_000,
            )?,
        })
    }
}

fn parse_in_range<F, T>(lookup: &F, key: &str, default: T, min: T, max: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };
    let value: T = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}' is not a valid number"),
    })?;
    if value < min || value > max {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{value} is outside [{min}, {max}]"),
        });
    }
    Ok(value)
}
