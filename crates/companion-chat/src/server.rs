//! HTTP server startup and routing.
//!
//! Handlers reach every subsystem through `UnifiedAppState`; the only
//! outbound network call is the completion provider.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Method, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    api,
    auth::require_user,
    config::Config,
    crypto::MessageCodec,
    memory_db::MemoryDatabase,
    metrics,
    provider::OpenAiCompatibleProvider,
    shared_state::UnifiedAppState,
};

/// Open storage, build the provider and serve until ctrl-c
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    metrics::init_metrics();
    cfg.print_config();

    let api_key = cfg.require_llm_api_key()?.to_string();
    let codec = MessageCodec::from_config(cfg.encryption_key.as_deref())?;
    let database = Arc::new(MemoryDatabase::new(&cfg.database_path)?);
    info!("Chat database ready at {}", cfg.database_path.display());

    let provider = Arc::new(OpenAiCompatibleProvider::new(
        cfg.llm_base_url.as_str(),
        api_key,
        cfg.llm_model.as_str(),
    )?);
    let addr = cfg.api_addr()?;
    let state = UnifiedAppState::new(cfg, database, codec, provider)?;

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

pub fn build_router(state: UnifiedAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let authenticated = Router::new()
        .route("/chat/send", post(api::send_message))
        .route(
            "/chat/conversations",
            get(api::list_conversations).post(api::create_conversation),
        )
        .route(
            "/chat/conversations/:id",
            patch(api::rename_conversation).delete(api::delete_conversation),
        )
        .route("/chat/history", get(api::get_history))
        .route("/auth/me", get(api::current_user).patch(api::update_profile))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    Router::new()
        .merge(authenticated)
        .route("/healthz", get(|| async { "OK" }))
        .route("/metrics", get(metrics::get_metrics))
        .layer(middleware::from_fn(track_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Bounds time to first byte only; SSE bodies are bounded by the stream timeout
        .layer(TimeoutLayer::new(Duration::from_secs(600)))
        .with_state(state)
}

async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    metrics::inc_request(&route, response.status().as_str());
    response
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
