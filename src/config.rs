//! Process configuration from environment variables

use crate::auth::OAuthConfig;
use crate::generator::CloudinaryConfig;
use crate::runtime::Timeouts;
use crate::telegram::DEFAULT_API_BASE as TELEGRAM_API_BASE;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("Cloudinary is partially configured: {0} is missing")]
    IncompleteCloudinary(&'static str),
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base: String,
    pub poll_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub text_model: String,
    pub image_model: String,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BloggerConfig {
    pub blog_id: String,
    pub oauth: OAuthConfig,
    pub token_path: PathBuf,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` runs the HTTP surface only
    pub telegram: Option<TelegramConfig>,
    pub gemini: GeminiConfig,
    /// `None` embeds cover images as `data:` URIs
    pub cloudinary: Option<CloudinaryConfig>,
    pub blogger: BloggerConfig,
    pub port: u16,
    pub timeouts: Timeouts,
    pub session_idle_ttl: Duration,
}

impl AppConfig {
    /// Read the process environment, after loading `.env` if one exists
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Ignoring unreadable .env file");
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        let port = env.parse("PORT", 3000)?;

        let telegram = match env.optional("TELEGRAM_BOT_TOKEN") {
            Some(bot_token) => Some(TelegramConfig {
                bot_token,
                api_base: env.or("TELEGRAM_API_BASE", TELEGRAM_API_BASE),
                poll_timeout: Duration::from_secs(env.parse("TELEGRAM_POLL_TIMEOUT_SECS", 30)?),
            }),
            None => None,
        };

        let gemini = GeminiConfig {
            api_key: env.required("GEMINI_API_KEY")?,
            text_model: env.or("GEMINI_TEXT_MODEL", "gemini-2.0-flash-001"),
            image_model: env.or(
                "GEMINI_IMAGE_MODEL",
                "gemini-2.0-flash-preview-image-generation",
            ),
            api_base: env.optional("GEMINI_API_BASE"),
        };

        let cloudinary = cloudinary(&env)?;

        let blogger = BloggerConfig {
            blog_id: env.required("BLOGGER_BLOG_ID")?,
            oauth: OAuthConfig {
                client_id: env.required("CLIENT_ID")?,
                client_secret: env.required("CLIENT_SECRET")?,
                redirect_uri: env
                    .optional("REDIRECT_URI")
                    .unwrap_or_else(|| format!("http://localhost:{port}/oauth2callback")),
            },
            token_path: PathBuf::from(env.or("TOKEN_PATH", "token.json")),
            api_base: env.optional("BLOGGER_API_BASE"),
        };

        let timeouts = Timeouts {
            generation: Duration::from_secs(env.parse("GENERATION_TIMEOUT_SECS", 120)?),
            publish: Duration::from_secs(env.parse("PUBLISH_TIMEOUT_SECS", 60)?),
        };

        Ok(Self {
            telegram,
            gemini,
            cloudinary,
            blogger,
            port,
            timeouts,
            session_idle_ttl: Duration::from_secs(env.parse("SESSION_IDLE_TTL_SECS", 3600)?),
        })
    }
}

/// All three Cloudinary values, or none of them
fn cloudinary<F>(env: &Env<F>) -> Result<Option<CloudinaryConfig>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    const NAMES: [&str; 3] = [
        "CLOUDINARY_CLOUD_NAME",
        "CLOUDINARY_API_KEY",
        "CLOUDINARY_API_SECRET",
    ];
    let [cloud_name, api_key, api_secret] = NAMES.map(|name| env.optional(name));

    match (cloud_name, api_key, api_secret) {
        (None, None, None) => Ok(None),
        (Some(cloud_name), Some(api_key), Some(api_secret)) => Ok(Some(CloudinaryConfig {
            cloud_name,
            api_key,
            api_secret,
        })),
        (cloud_name, api_key, _) => {
            let missing = if cloud_name.is_none() {
                NAMES[0]
            } else if api_key.is_none() {
                NAMES[1]
            } else {
                NAMES[2]
            };
            Err(ConfigError::IncompleteCloudinary(missing))
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Set and not blank
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(name) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }
}
