use crate::config::Config;
use crate::error::{SearchError, ServeError};
use crate::metrics::{MeterRegistry, TaggedCounter};
use crate::provider::{SearchRequest, SearchResult, TwitterSearch};
use crate::router::FanOutRouter;
use crate::sink::FileSink;
use axum::extract::rejection::QueryRejection;
use axum::extract::FromRequestParts;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub router: FanOutRouter,
    pub metrics: MeterRegistry,
}

#[derive(Deserialize)]
pub struct SearchParams {
    q: Option<String>,
}

/// `/search` and `/metrics`, with the search page served from `static_dir`.
pub fn app(state: AppState, static_dir: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/search", get(handle_search))
        .route("/metrics", get(handle_metrics))
        .fallback_service(ServeDir::new(static_dir.as_ref()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Assembles the service from `config` and serves it until the listener fails.
pub async fn serve(config: &Config) -> Result<(), ServeError> {
    let provider = TwitterSearch::new(
        config.twitter_api_url.clone(),
        config.twitter_bearer_token.clone(),
        config.twitter_max_results,
    )?;

    let metrics = MeterRegistry::new();
    let per_keyword = Arc::new(TaggedCounter::new(
        "per_keyword_messages",
        "keyword",
        &metrics,
    ));
    let router = FanOutRouter::new(
        Arc::new(provider),
        Arc::new(FileSink::new(&config.log_dir)),
        per_keyword,
        metrics.clone(),
    );
    let app_state = AppState { router, metrics };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.bind_addr,
            source,
        })?;

    tracing::info!("Server running on http://{}", config.bind_addr);
    axum::serve(listener, app(app_state, &config.static_dir))
        .await
        .map_err(ServeError::Serve)
}

// Taps keep running after the response is sent
async fn handle_search(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<SearchParams>,
) -> Result<AppJson<SearchResult>, AppError> {
    let request = SearchRequest::new(params.q.unwrap_or_default());
    let dispatched = state.router.dispatch(request).await?;
    Ok(AppJson(dispatched.result))
}

async fn handle_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

pub struct AppJson<T>(pub T);

impl<T> IntoResponse for AppJson<T>
where
    axum::Json<T>: IntoResponse,
{
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

pub enum AppError {
    // The query string could not be deserialized
    QueryRejection(QueryRejection),
    // The search provider could not be reached or refused the search
    Search(SearchError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message) = match self {
            AppError::QueryRejection(rejection) => (rejection.status(), rejection.body_text()),
            AppError::Search(_) => {
                // Already logged by the router; don't expose provider details
                (
                    StatusCode::BAD_GATEWAY,
                    "Search provider unavailable".to_owned(),
                )
            }
        };

        (status, AppJson(ErrorResponse { message })).into_response()
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::QueryRejection(rejection)
    }
}

impl From<SearchError> for AppError {
    fn from(error: SearchError) -> Self {
        Self::Search(error)
    }
}
