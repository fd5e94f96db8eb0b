//! HTTP request handlers

use super::types::{ErrorResponse, HealthResponse, OAuthCallbackQuery};
use super::AppState;
use crate::markup::escape_html;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        // Blogger authorization (consent redirect and callback)
        .route("/auth", get(start_auth))
        .route("/oauth2callback", get(oauth_callback))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let status = if state.auth.is_authorized().await {
        "✅ Blogger is connected. Send the bot a topic on Telegram to get started."
    } else {
        "⚠️ Blogger is not connected yet. <a href=\"/auth\">Authorize access</a> to enable publishing."
    };
    Html(page("Blog Pilot", status))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        authorized: state.auth.is_authorized().await,
    })
}

async fn start_auth(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let url = state
        .auth
        .authorize_url()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Redirect::temporary(&url))
}

async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        tracing::warn!(error = %error, "Authorization declined");
        return (
            StatusCode::BAD_REQUEST,
            Html(page(
                "Authorization failed",
                &format!("Google reported: {}", escape_html(&error)),
            )),
        )
            .into_response();
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(page("Authorization failed", "No authorization code provided.")),
        )
            .into_response();
    };

    match state.auth.exchange_code(&code).await {
        Ok(()) => {
            tracing::info!("Blogger authorization stored");
            Html(page(
                "Authorization complete",
                "✅ Blogger access granted. You can close this tab and publish from Telegram.",
            ))
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "OAuth code exchange failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(page(
                    "Authorization failed",
                    &format!("Could not exchange the authorization code: {}", escape_html(&e.to_string())),
                )),
            )
                .into_response()
        }
    }
}

/// Minimal HTML page; `body` must already be escaped
fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{body}</p></body></html>"
    )
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
