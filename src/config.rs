use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_MODEL: &str = "FINE_TUNED_MODEL";
pub const ENV_WEBHOOK_URL: &str = "MM_INCOMING_WEBHOOK_URL";
pub const ENV_TOKEN: &str = "MATTERMOST_TOKEN";

const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
const ENV_SYSTEM_PROMPT: &str = "SYSTEM_PROMPT";
const ENV_TEMPERATURE: &str = "LLM_TEMPERATURE";
const ENV_MAX_TOKENS: &str = "LLM_MAX_TOKENS";
const ENV_NOTIFY_TIMEOUT: &str = "NOTIFY_TIMEOUT_SECS";
const ENV_ACK_MODE: &str = "ACK_MODE";
const ENV_REQUIRE_WEBHOOK: &str = "REQUIRE_WEBHOOK_URL";
const ENV_BIND_ADDR: &str = "BIND_ADDR";

/// When the chat platform gets its acknowledgement relative to delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Answer and deliver inside the request, then acknowledge.
    #[default]
    AfterDelivery,
    /// Acknowledge immediately and relay in a background task.
    FireAndForget,
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckMode::AfterDelivery => write!(f, "after_delivery"),
            AckMode::FireAndForget => write!(f, "fire_and_forget"),
        }
    }
}

impl FromStr for AckMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "after_delivery" => Ok(AckMode::AfterDelivery),
            "fire_and_forget" => Ok(AckMode::FireAndForget),
            other => anyhow::bail!(
                "unknown ack mode '{}' (expected after_delivery or fire_and_forget)",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Incoming webhook URL. `None` means deliveries are skipped with a warning.
    pub url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub webhook: WebhookConfig,
    /// Shared secret the outgoing webhook sends as `token`.
    pub token: String,
    pub ack_mode: AckMode,
    pub bind_addr: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_system_prompt() -> String {
    "You are an academic assistant for SSAFY. \
     Answer students' questions about schedules, enrollment and course rules \
     clearly and concisely."
        .to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    600
}

fn default_notify_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn parse_var<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: '{}'", name, value)),
    }
}

/// Merge `.env` from the working directory into the process environment.
/// Must run before logging is initialised so `RUST_LOG` from the file applies.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

impl Config {
    /// Read the process environment. Call [`load_dotenv`] first.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    /// Empty or whitespace-only values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get(ENV_API_KEY);
        let model = get(ENV_MODEL);
        let token = get(ENV_TOKEN);
        let webhook_url = get(ENV_WEBHOOK_URL);
        let require_webhook = parse_var(ENV_REQUIRE_WEBHOOK, get(ENV_REQUIRE_WEBHOOK), false)?;

        let mut missing = Vec::new();
        if api_key.is_none() {
            missing.push(ENV_API_KEY);
        }
        if model.is_none() {
            missing.push(ENV_MODEL);
        }
        if token.is_none() {
            missing.push(ENV_TOKEN);
        }
        if require_webhook && webhook_url.is_none() {
            missing.push(ENV_WEBHOOK_URL);
        }
        if !missing.is_empty() {
            anyhow::bail!(
                "Missing required environment variables: {}",
                missing.join(", ")
            );
        }

        let notify_timeout_secs = parse_var(
            ENV_NOTIFY_TIMEOUT,
            get(ENV_NOTIFY_TIMEOUT),
            default_notify_timeout().as_secs(),
        )?;

        Ok(Config {
            llm: LlmConfig {
                api_key: api_key.unwrap_or_default(),
                model: model.unwrap_or_default(),
                base_url: get(ENV_BASE_URL)
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(default_base_url),
                system_prompt: get(ENV_SYSTEM_PROMPT).unwrap_or_else(default_system_prompt),
                temperature: parse_var(ENV_TEMPERATURE, get(ENV_TEMPERATURE), default_temperature())?,
                max_tokens: parse_var(ENV_MAX_TOKENS, get(ENV_MAX_TOKENS), default_max_tokens())?,
            },
            webhook: WebhookConfig {
                url: webhook_url,
                timeout: Duration::from_secs(notify_timeout_secs),
            },
            token: token.unwrap_or_default(),
            ack_mode: parse_var(ENV_ACK_MODE, get(ENV_ACK_MODE), AckMode::default())?,
            bind_addr: get(ENV_BIND_ADDR).unwrap_or_else(default_bind_addr),
        })
    }
}
