//! Read API over the stored market data.
//!
//! Everything under `/api/v1` sits behind the API-key gate; `/` and
//! `/health` are open.

pub mod guard;
pub mod handlers;

use crate::auth::AuthGate;
use crate::error::ApiError;
use crate::storage::{Repository, SqlStore};
use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct ApiState {
    pub repo: Arc<Repository>,
    pub gate: AuthGate,
    /// Upper bound on any single store call made by a handler.
    pub op_timeout: Duration,
}

impl ApiState {
    pub fn new(repo: Arc<Repository>, op_timeout: Duration) -> Self {
        Self {
            gate: AuthGate::new(Arc::clone(&repo), op_timeout),
            repo,
            op_timeout,
        }
    }

    /// Run blocking store work off the async runtime, bounded by `op_timeout`.
    pub async fn with_repo<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T> + Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        let task = tokio::task::spawn_blocking(move || f(&repo));
        match tokio::time::timeout(self.op_timeout, task).await {
            Ok(Ok(result)) => result.map_err(ApiError::Internal),
            Ok(Err(e)) => Err(ApiError::Internal(anyhow::Error::new(e).context("store task panicked"))),
            Err(_) => {
                warn!("Store call exceeded {:?}", self.op_timeout);
                Err(ApiError::Unavailable("Database timed out".to_string()))
            }
        }
    }

    /// [`with_repo`](Self::with_repo) for a single store session.
    pub async fn query<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&SqlStore<'_>) -> Result<T> + Send + 'static,
    {
        self.with_repo(move |repo| repo.session(f)).await
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let v1 = Router::new()
        .route("/securities", get(handlers::list_securities))
        .route("/securities/:symbol", get(handlers::get_security))
        .route("/securities/:symbol/prices", get(handlers::get_prices))
        .route("/securities/:symbol/latest", get(handlers::get_latest_price))
        .route("/market/summary", get(handlers::get_market_summary))
        .route("/market/movers", get(handlers::get_top_movers))
        .route("/market/indices", get(handlers::get_market_indices))
        .route("/account/usage", get(handlers::get_account_usage))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            guard::require_api_key,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", v1)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C.
pub async fn serve(state: Arc<ApiState>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("ZSE market data API listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("API server shutting down");
        })
        .await
        .context("API server error")
}
