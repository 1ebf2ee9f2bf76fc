use crate::auth::AuthUser;
use crate::catalog::Catalog;
use crate::config::{Backend, Config};
use crate::error::ApiError;
use crate::models::{
    CatalogSnapshot, Director, DirectorPatch, Genre, GenrePatch, Movie, MoviePatch,
};
use crate::query::{LimitQuery, MovieQuery, DEFAULT_RELATED, DEFAULT_TOP_RATED};
use crate::seed;
use crate::store::{DocumentStore, MemoryStore, MongoStore};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, ConnectInfo, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 1024 * 1024; // 1MB safety cap
const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub token_secret: Arc<str>,
    pub rate_limit: RateLimit,
    pub rate_limits: Arc<Mutex<HashMap<String, WindowCounter>>>,
}

/// Per-IP requests allowed in one minute window, on top of which `burst` more are tolerated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            per_minute: 120,
            burst: 20,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WindowCounter {
    pub window: u64,
    pub count: u32,
}

impl WindowCounter {
    /// Counts one request in `window`. Returns false once `cap` is reached.
    fn hit(&mut self, window: u64, cap: u32) -> bool {
        if self.window != window {
            *self = Self { window, count: 0 };
        }
        if self.count >= cap {
            return false;
        }
        self.count += 1;
        true
    }
}

impl AppState {
    pub fn new(catalog: Catalog, token_secret: &str, rate_limit: RateLimit) -> Self {
        Self {
            catalog,
            token_secret: Arc::from(token_secret),
            rate_limit,
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub async fn build_store(backend: &Backend) -> Result<Arc<dyn DocumentStore>> {
    match backend {
        Backend::Mongo(mongo) => Ok(Arc::new(
            MongoStore::connect(&mongo.uri, &mongo.database).await?,
        )),
        Backend::Memory { seed_file } => {
            let store = MemoryStore::new();
            match seed_file {
                Some(path) => {
                    let snapshot = seed::merge([seed::read_snapshot(path)?]);
                    let summary = seed::seed_store(&store, snapshot).await?;
                    info!("Memory catalog preloaded from {:?}: {}", path, summary);
                }
                None => warn!("Memory catalog starts empty (CATALOG_SEED_FILE not set)"),
            }
            Ok(Arc::new(store))
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let store = build_store(&config.backend).await?;
    let state = AppState::new(Catalog::new(store), &config.jwt_secret, config.rate_limit);
    let app = build_router(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/data", get(get_data))
        .route("/auth/verify", get(verify_auth))
        .route("/top-rated", get(top_rated))
        .route("/movies", get(list_movies).post(create_movie))
        .route(
            "/movies/:id",
            get(get_movie).put(update_movie).delete(delete_movie),
        )
        .route("/movies/:id/related", get(related_movies))
        .route("/genres", get(list_genres).post(create_genre))
        .route(
            "/genres/:id",
            get(get_genre).put(update_genre).delete(delete_genre),
        )
        .route("/genres/:id/movies", get(genre_movies))
        .route("/directors", get(list_directors).post(create_director))
        .route(
            "/directors/:id",
            get(get_director).put(update_director).delete(delete_director),
        )
        .route("/directors/:id/movies", get(director_movies))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .nest("/api", api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::map_response(json_payload_too_large))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AppState>) -> StatusCode {
    match state.catalog.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn get_data(State(state): State<AppState>) -> Result<Json<CatalogSnapshot>, ApiError> {
    let snapshot = state
        .catalog
        .snapshot()
        .await
        .map_err(|e| ApiError::catalog(e, "fetch data"))?;
    Ok(Json(snapshot))
}

async fn verify_auth(AuthUser(claims): AuthUser) -> Json<Value> {
    Json(json!({
        "user": {
            "id": claims.user_id,
            "email": claims.email,
        }
    }))
}

// ---- movies ----

async fn list_movies(
    State(state): State<AppState>,
    query: Result<Query<MovieQuery>, QueryRejection>,
) -> Result<Json<Vec<Movie>>, ApiError> {
    let query = query_params(query)?;
    let movies = if query.is_empty() {
        state.catalog.list_movies().await
    } else {
        state.catalog.search_movies(&query).await
    }
    .map_err(|e| ApiError::catalog(e, "fetch movies"))?;
    Ok(Json(movies))
}

async fn top_rated(
    State(state): State<AppState>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Vec<Movie>>, ApiError> {
    let limit = query_params(query)?.or(DEFAULT_TOP_RATED);
    let movies = state
        .catalog
        .top_rated(limit)
        .await
        .map_err(|e| ApiError::catalog(e, "fetch movies"))?;
    Ok(Json(movies))
}

async fn create_movie(
    State(state): State<AppState>,
    _user: AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Movie>), ApiError> {
    let movie: Movie = parse_json(&headers, &body)?;
    let created = state
        .catalog
        .create_movie(movie)
        .await
        .map_err(|e| ApiError::catalog(e, "create movie"))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Movie>, ApiError> {
    let movie = state
        .catalog
        .get_movie(&id)
        .await
        .map_err(|e| ApiError::catalog(e, "fetch movie"))?;
    Ok(Json(movie))
}

async fn update_movie(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Movie>, ApiError> {
    let patch: MoviePatch = parse_json(&headers, &body)?;
    let movie = state
        .catalog
        .update_movie(&id, patch)
        .await
        .map_err(|e| ApiError::catalog(e, "update movie"))?;
    Ok(Json(movie))
}

async fn delete_movie(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .catalog
        .delete_movie(&id)
        .await
        .map_err(|e| ApiError::catalog(e, "delete movie"))?;
    Ok(Json(json!({ "message": "Movie deleted successfully" })))
}

async fn related_movies(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Vec<Movie>>, ApiError> {
    let limit = query_params(query)?.or(DEFAULT_RELATED);
    let movies = state
        .catalog
        .related_movies(&id, limit)
        .await
        .map_err(|e| ApiError::catalog(e, "fetch related movies"))?;
    Ok(Json(movies))
}

// ---- genres ----

async fn list_genres(State(state): State<AppState>) -> Result<Json<Vec<Genre>>, ApiError> {
    let genres = state
        .catalog
        .list_genres()
        .await
        .map_err(|e| ApiError::catalog(e, "fetch genres"))?;
    Ok(Json(genres))
}

async fn create_genre(
    State(state): State<AppState>,
    _user: AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Genre>), ApiError> {
    let genre: Genre = parse_json(&headers, &body)?;
    let created = state
        .catalog
        .create_genre(genre)
        .await
        .map_err(|e| ApiError::catalog(e, "create genre"))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_genre(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Genre>, ApiError> {
    let genre = state
        .catalog
        .get_genre(&id)
        .await
        .map_err(|e| ApiError::catalog(e, "fetch genre"))?;
    Ok(Json(genre))
}

async fn update_genre(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Genre>, ApiError> {
    let patch: GenrePatch = parse_json(&headers, &body)?;
    let genre = state
        .catalog
        .update_genre(&id, patch)
        .await
        .map_err(|e| ApiError::catalog(e, "update genre"))?;
    Ok(Json(genre))
}

async fn delete_genre(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .catalog
        .delete_genre(&id)
        .await
        .map_err(|e| ApiError::catalog(e, "delete genre"))?;
    Ok(Json(json!({ "message": "Genre deleted successfully" })))
}

async fn genre_movies(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Movie>>, ApiError> {
    let movies = state
        .catalog
        .movies_in_genre(&id)
        .await
        .map_err(|e| ApiError::catalog(e, "fetch genre movies"))?;
    Ok(Json(movies))
}

// ---- directors ----

async fn list_directors(State(state): State<AppState>) -> Result<Json<Vec<Director>>, ApiError> {
    let directors = state
        .catalog
        .list_directors()
        .await
        .map_err(|e| ApiError::catalog(e, "fetch directors"))?;
    Ok(Json(directors))
}

async fn create_director(
    State(state): State<AppState>,
    _user: AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Director>), ApiError> {
    let director: Director = parse_json(&headers, &body)?;
    let created = state
        .catalog
        .create_director(director)
        .await
        .map_err(|e| ApiError::catalog(e, "create director"))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_director(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Director>, ApiError> {
    let director = state
        .catalog
        .get_director(&id)
        .await
        .map_err(|e| ApiError::catalog(e, "fetch director"))?;
    Ok(Json(director))
}

async fn update_director(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Director>, ApiError> {
    let patch: DirectorPatch = parse_json(&headers, &body)?;
    let director = state
        .catalog
        .update_director(&id, patch)
        .await
        .map_err(|e| ApiError::catalog(e, "update director"))?;
    Ok(Json(director))
}

async fn delete_director(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .catalog
        .delete_director(&id)
        .await
        .map_err(|e| ApiError::catalog(e, "delete director"))?;
    Ok(Json(json!({ "message": "Director deleted successfully" })))
}

async fn director_movies(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Movie>>, ApiError> {
    let movies = state
        .catalog
        .movies_by_director(&id)
        .await
        .map_err(|e| ApiError::catalog(e, "fetch director movies"))?;
    Ok(Json(movies))
}

// ---- request plumbing ----

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// The body limit layer and the `Bytes` extractor answer 413 in plain text.
async fn json_payload_too_large(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json {
        warn!("Rejecting request: body exceeds {} bytes", MAX_BODY_BYTES);
        return ApiError::PayloadTooLarge.into_response();
    }
    response
}

fn parse_json<T: DeserializeOwned>(headers: &HeaderMap, body: &Bytes) -> Result<T, ApiError> {
    let content_type_ok = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        == Some(true);
    if !content_type_ok {
        warn!(
            "Rejecting request: unsupported content-type {:?}",
            headers.get(header::CONTENT_TYPE)
        );
        return Err(ApiError::UnsupportedMediaType);
    }

    serde_json::from_slice(body).map_err(|e| {
        warn!("Rejecting request: invalid JSON body: {}", e);
        ApiError::BadRequest(format!("Invalid request body: {e}"))
    })
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);
    if !check_rate_limit(&state, &ip).await {
        warn!("Rate limit exceeded for {}", ip);
        return ApiError::TooManyRequests.into_response();
    }
    next.run(request).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let source = tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    };
    info!("Shutdown signal received ({}), draining connections", source);
}

/// Proxy headers win; otherwise the socket peer address is the client.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = ["cf-connecting-ip", "x-real-ip", "x-forwarded-for"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .find_map(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

async fn check_rate_limit(state: &AppState, ip: &str) -> bool {
    let window = (Utc::now().timestamp() / 60) as u64;
    let cap = state.rate_limit.per_minute + state.rate_limit.burst;
    let mut counters = state.rate_limits.lock().await;
    if counters.len() > MAX_RATE_LIMIT_ENTRIES {
        counters.retain(|_, c| c.window == window);
    }
    counters
        .entry(ip.to_string())
        .or_insert(WindowCounter { window, count: 0 })
        .hit(window, cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_proxy_headers_then_peer() {
        let peer = Some(SocketAddr::from(([192, 0, 2, 10], 51000)));
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer), "192.0.2.10");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer), "203.0.113.7");
        headers.insert("cf-connecting-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, peer), "198.51.100.2");
    }

    #[test]
    fn window_counter_resets_on_new_window() {
        let mut counter = WindowCounter { window: 7, count: 0 };
        assert!(counter.hit(7, 1));
        assert!(!counter.hit(7, 1));
        assert!(counter.hit(8, 1));
        assert_eq!(counter.count, 1);
    }

    #[test]
    fn parse_json_checks_content_type_before_parsing() {
        let body = Bytes::from_static(br#"{"name":"Drama"}"#);
        let err = parse_json::<GenrePatch>(&HeaderMap::new(), &body).unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedMediaType));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let patch = parse_json::<GenrePatch>(&headers, &body).unwrap();
        assert_eq!(patch.name.as_deref(), Some("Drama"));

        let bad = Bytes::from_static(b"{not json");
        assert!(matches!(
            parse_json::<GenrePatch>(&headers, &bad),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn rate_limit_allows_limit_plus_burst_per_window() {
        let state = AppState::new(
            Catalog::new(Arc::new(MemoryStore::new())),
            "secret",
            RateLimit {
                per_minute: 2,
                burst: 1,
            },
        );
        for _ in 0..3 {
            assert!(check_rate_limit(&state, "1.2.3.4").await);
        }
        assert!(!check_rate_limit(&state, "1.2.3.4").await);
        assert!(check_rate_limit(&state, "5.6.7.8").await);
    }
}
