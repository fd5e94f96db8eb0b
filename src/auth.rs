//! Google OAuth for the Blogger API
//!
//! The operator connects a Google account once through `/auth`; the
//! resulting token (with its refresh token) is persisted and refreshed
//! transparently before it expires.

mod token_store;

pub use token_store::{StoredToken, TokenResponse, TokenStore};

use chrono::{Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

pub const BLOGGER_SCOPE: &str = "https://www.googleapis.com/auth/blogger";
const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the access token actually expires
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no Blogger account connected; visit /auth to authorize")]
    NotAuthorized,
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token storage failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("token file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid OAuth configuration: {0}")]
    Config(String),
}

/// OAuth client credentials
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Authorization-code flow plus cached, self-refreshing access token
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
    store: TokenStore,
    cached: Mutex<Option<StoredToken>>,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, store: TokenStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            store,
            cached: Mutex::new(None),
        }
    }

    /// Consent page URL; offline access so Google issues a refresh token
    pub fn authorize_url(&self) -> Result<String, AuthError> {
        let url = reqwest::Url::parse_with_params(
            AUTH_ENDPOINT,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", BLOGGER_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| AuthError::Config(e.to_string()))?;
        Ok(url.into())
    }

    /// Exchange the code from the consent redirect and persist the token
    pub async fn exchange_code(&self, code: &str) -> Result<(), AuthError> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;

        let mut cached = self.cached.lock().await;
        let token = StoredToken::from_response(response, cached.as_ref(), Utc::now());
        self.store.save(&token).await?;
        *cached = Some(token);
        tracing::info!("Blogger account connected");
        Ok(())
    }

    /// Current access token, refreshed first if it is about to expire
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = self.store.load().await?;
        }
        let Some(token) = cached.as_ref() else {
            return Err(AuthError::NotAuthorized);
        };

        if !token.expires_within(Utc::now(), Duration::seconds(EXPIRY_MARGIN_SECS)) {
            return Ok(token.access_token.clone());
        }

        let refreshed = self.refresh(token).await?;
        let access_token = refreshed.access_token.clone();
        *cached = Some(refreshed);
        Ok(access_token)
    }

    /// Refresh regardless of the recorded expiry (after the API answered 401)
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = self.store.load().await?;
        }
        let Some(token) = cached.as_ref() else {
            return Err(AuthError::NotAuthorized);
        };

        let refreshed = self.refresh(token).await?;
        let access_token = refreshed.access_token.clone();
        *cached = Some(refreshed);
        Ok(access_token)
    }

    /// Whether a token has been stored
    pub async fn is_authorized(&self) -> bool {
        let cached = self.cached.lock().await;
        if cached.is_some() {
            return true;
        }
        matches!(self.store.load().await, Ok(Some(_)))
    }

    async fn refresh(&self, token: &StoredToken) -> Result<StoredToken, AuthError> {
        let Some(refresh_token) = token.refresh_token.as_deref() else {
            return Err(AuthError::NotAuthorized);
        };

        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;

        let refreshed = StoredToken::from_response(response, Some(token), Utc::now());
        self.store.save(&refreshed).await?;
        tracing::debug!("Refreshed Blogger access token");
        Ok(refreshed)
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self.http.post(TOKEN_ENDPOINT).form(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}
