//! Blog Pilot - Telegram assistant that drafts and publishes blog posts
//!
//! Users send a topic, get a generated draft with action buttons, and
//! confirm it to publish on Blogger with a generated cover image.

mod api;
mod auth;
mod config;
mod generator;
mod markup;
mod publisher;
mod runtime;
mod state_machine;
mod store;
mod telegram;

use api::{create_router, AppState};
use auth::{OAuthClient, TokenStore};
use config::AppConfig;
use generator::{
    CloudinaryHost, DataUriHost, GeminiClient, GeminiGenerator, GenerationError, ImageHost,
};
use publisher::BloggerPublisher;
use runtime::{ProductionRuntime, RuntimeManager, TelegramOutbox};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::InMemorySessionStore;
use telegram::{run_poller, TelegramClient};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blog_pilot=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env()?;

    let auth = Arc::new(OAuthClient::new(
        config.blogger.oauth.clone(),
        TokenStore::new(&config.blogger.token_path),
    ));
    if !auth.is_authorized().await {
        tracing::warn!(
            port = config.port,
            "No Blogger token on file. Open /auth to connect an account before publishing."
        );
    }

    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    match &config.telegram {
        Some(telegram) => {
            let client = Arc::new(TelegramClient::new(
                &telegram.bot_token,
                &telegram.api_base,
                telegram.poll_timeout,
            )?);
            let manager = Arc::new(build_runtime(&config, auth.clone(), client.clone())?);

            background.push(manager.start_idle_sweeper(config.session_idle_ttl, SWEEP_INTERVAL));
            background.push(tokio::spawn(run_poller(client, manager, shutdown.clone())));
            tracing::info!(
                text_model = %config.gemini.text_model,
                image_model = %config.gemini.image_model,
                "Telegram bot started"
            );
        }
        None => {
            tracing::warn!("TELEGRAM_BOT_TOKEN not set. Telegram bot won't start.");
        }
    }

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(auth))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Blog Pilot server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    for task in background {
        task.abort();
    }
    tracing::info!("Blog Pilot stopped");
    Ok(())
}

/// Wire the production adapters into a runtime manager
fn build_runtime(
    config: &AppConfig,
    auth: Arc<OAuthClient>,
    telegram: Arc<TelegramClient>,
) -> Result<ProductionRuntime, GenerationError> {
    let mut gemini = GeminiClient::new(&config.gemini.api_key, config.timeouts.generation)?;
    if let Some(api_base) = &config.gemini.api_base {
        gemini = gemini.with_api_base(api_base);
    }

    let host: Arc<dyn ImageHost> = match &config.cloudinary {
        Some(cloudinary) => Arc::new(CloudinaryHost::new(cloudinary.clone())),
        None => {
            tracing::info!("Cloudinary not configured, cover images will be embedded inline");
            Arc::new(DataUriHost)
        }
    };

    let generator = GeminiGenerator::new(
        gemini,
        &config.gemini.text_model,
        &config.gemini.image_model,
        host,
    );
    let mut publisher = BloggerPublisher::new(auth, &config.blogger.blog_id);
    if let Some(api_base) = &config.blogger.api_base {
        publisher = publisher.with_api_base(api_base);
    }

    Ok(RuntimeManager::new(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(generator),
        Arc::new(publisher),
        Arc::new(TelegramOutbox::new(telegram)),
        config.timeouts,
    ))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                shutdown.cancelled().await;
            }
        },
        () = shutdown.cancelled() => {}
    }
}
