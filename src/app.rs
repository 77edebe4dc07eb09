use crate::auth::{AuthService, ProfileUpdate, User};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::ApiError;
use crate::favorites::FavoritesService;
use crate::models::Movie;
use crate::recommend::{self, RecommendationData};
use crate::search::SearchGate;
use crate::store::{FileStore, KvStore};
use crate::tmdb::{DiscoverQuery, TmdbApi, TmdbClient};
use anyhow::Result;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, RequestPartsExt, Router,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const MAX_BODY_BYTES: usize = 64 * 1024;
const SUGGESTION_LIMIT: usize = 8;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub auth: AuthService,
    pub favorites: FavoritesService,
    pub search: SearchGate,
}

impl AppState {
    pub fn new(
        tmdb: Arc<dyn TmdbApi>,
        store: Arc<dyn KvStore>,
        session_secret: &str,
        search: SearchGate,
    ) -> Self {
        Self {
            catalog: Catalog::new(tmdb),
            auth: AuthService::new(store.clone(), session_secret),
            favorites: FavoritesService::new(store),
            search,
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::new(
        config.tmdb_api_key.clone(),
        config.tmdb_base_url.clone(),
    )?);
    let store: Arc<dyn KvStore> = Arc::new(FileStore::open(&config.data_path).await?);
    info!("Using data file {}", config.data_path.display());

    let state = AppState::new(
        tmdb,
        store,
        &config.session_secret,
        SearchGate::new(config.search_debounce),
    );
    if state.catalog.test_connection().await {
        info!("TMDB API connection successful");
    } else {
        tracing::warn!("TMDB API unreachable at startup, catalog routes will return empty data");
    }

    let app = build_router(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/home", get(home))
        .route("/api/movies", get(discover_movies))
        .route("/api/movies/trending", get(trending))
        .route("/api/movies/popular", get(popular))
        .route("/api/movies/:id", get(movie_info))
        .route("/api/movies/:id/cast", get(movie_cast))
        .route("/api/movies/:id/videos", get(movie_trailers))
        .route("/api/movies/:id/similar", get(similar_movies))
        .route("/api/movies/:id/recommendations", get(recommended_movies))
        .route("/api/genres", get(genres))
        .route("/api/search", get(search))
        .route("/api/search/suggest", get(suggest))
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/login", post(sign_in))
        .route("/api/auth/google", post(sign_in_google))
        .route("/api/auth/logout", post(sign_out))
        .route("/api/profile", get(profile).patch(update_profile))
        .route(
            "/api/favorites",
            get(list_favorites)
                .post(add_favorite)
                .delete(clear_favorites),
        )
        .route("/api/favorites/toggle", post(toggle_favorite))
        .route(
            "/api/favorites/:id",
            get(favorite_status).delete(remove_favorite),
        )
        .route("/api/recommendations", get(recommendations))
        .fallback(not_found)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The signed-in user behind the request's bearer token.
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| ApiError::Unauthorized)?;
        let token = bearer.token().to_string();
        let user = state
            .auth
            .session(&token)
            .await?
            .ok_or(ApiError::Unauthorized)?;
        Ok(CurrentUser { user, token })
    }
}

/// A numeric `:id` path segment; anything else is a validation error.
pub struct MovieId(pub i32);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for MovieId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, ApiError> {
        let Path(id) = Path::<i32>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                debug!("Rejected movie id: {}", rejection.body_text());
                ApiError::Validation("Movie id must be an integer".to_string())
            })?;
        Ok(MovieId(id))
    }
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
}

impl PageQuery {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
    page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    current: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Credentials {
    email: String,
    password: String,
    full_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecommendationsResponse {
    #[serde(flatten)]
    data: RecommendationData,
    reasons: HashMap<i32, Vec<String>>,
}

async fn health() -> &'static str {
    "OK"
}

async fn api_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let connected = state.catalog.test_connection().await;
    Json(json!({ "tmdb": connected }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}

async fn home(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.home_rows().await)
}

async fn discover_movies(
    State(state): State<AppState>,
    Query(query): Query<DiscoverQuery>,
) -> impl IntoResponse {
    Json(state.catalog.discover(&query).await)
}

async fn trending(State(state): State<AppState>, Query(q): Query<PageQuery>) -> impl IntoResponse {
    Json(state.catalog.trending(q.page()).await)
}

async fn popular(State(state): State<AppState>, Query(q): Query<PageQuery>) -> impl IntoResponse {
    Json(state.catalog.popular(q.page()).await)
}

async fn movie_info(
    State(state): State<AppState>,
    MovieId(id): MovieId,
) -> Result<impl IntoResponse, ApiError> {
    state
        .catalog
        .movie_info(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Movie {id} not found")))
}

async fn movie_cast(State(state): State<AppState>, MovieId(id): MovieId) -> impl IntoResponse {
    Json(state.catalog.cast(id).await)
}

async fn movie_trailers(State(state): State<AppState>, MovieId(id): MovieId) -> impl IntoResponse {
    Json(state.catalog.trailers(id).await)
}

async fn similar_movies(
    State(state): State<AppState>,
    MovieId(id): MovieId,
    Query(q): Query<PageQuery>,
) -> impl IntoResponse {
    Json(state.catalog.similar(id, q.page()).await)
}

async fn recommended_movies(
    State(state): State<AppState>,
    MovieId(id): MovieId,
) -> impl IntoResponse {
    Json(state.catalog.recommended(id).await)
}

async fn genres(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.genres().await)
}

async fn search(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> impl IntoResponse {
    Json(state.catalog.search(&q.query, q.page.unwrap_or(1).max(1)).await)
}

async fn suggest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<SearchQuery>,
) -> Response {
    let key = client_key(&headers);
    let catalog = state.catalog.clone();
    let query = q.query.clone();
    let outcome = state
        .search
        .run(&key, async move { catalog.search(&query, 1).await })
        .await;
    match outcome {
        Some(page) => {
            let results: Vec<Movie> = page.results.into_iter().take(SUGGESTION_LIMIT).collect();
            Json(json!({ "query": q.query.trim(), "results": results })).into_response()
        }
        None => {
            debug!("Suggestion request for '{}' superseded", q.query);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

async fn sign_up(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .auth
        .sign_up(&creds.email, &creds.password, creds.full_name.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.auth.sign_in(&creds.email, &creds.password).await?;
    Ok(Json(session))
}

async fn sign_in_google(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let session = state.auth.sign_in_with_google().await?;
    Ok(Json(session))
}

async fn sign_out(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state.auth.sign_out(&current.token).await?;
    info!("Signed out user {}", current.user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn profile(current: CurrentUser) -> impl IntoResponse {
    Json(current.user)
}

async fn update_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth.update_profile(&current.user.id, update).await?;
    Ok(Json(user))
}

async fn list_favorites(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let favorites = state.favorites.list(&current.user.id).await?;
    Ok(Json(json!({ "count": favorites.len(), "favorites": favorites })))
}

async fn add_favorite(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(movie): Json<Movie>,
) -> Result<impl IntoResponse, ApiError> {
    let favorites = state.favorites.add(&current.user.id, movie).await?;
    Ok(Json(json!({ "count": favorites.len(), "favorites": favorites })))
}

async fn toggle_favorite(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(movie): Json<Movie>,
) -> Result<impl IntoResponse, ApiError> {
    let movie_id = movie.id;
    let favorited = state.favorites.toggle(&current.user.id, movie).await?;
    Ok(Json(json!({ "id": movie_id, "favorited": favorited })))
}

async fn favorite_status(
    State(state): State<AppState>,
    current: CurrentUser,
    MovieId(id): MovieId,
) -> Result<impl IntoResponse, ApiError> {
    let favorited = state.favorites.is_favorited(&current.user.id, id).await?;
    Ok(Json(json!({ "id": id, "favorited": favorited })))
}

async fn remove_favorite(
    State(state): State<AppState>,
    current: CurrentUser,
    MovieId(id): MovieId,
) -> Result<impl IntoResponse, ApiError> {
    let favorites = state.favorites.remove(&current.user.id, id).await?;
    Ok(Json(json!({ "count": favorites.len(), "favorites": favorites })))
}

async fn clear_favorites(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state.favorites.clear(&current.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn recommendations(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(q): Query<RecommendationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let favorites = state.favorites.list(&current.user.id).await?;
    let mut rng = StdRng::from_entropy();
    let data =
        recommend::generate_recommendations(&state.catalog, &favorites, q.current, &mut rng)
            .await;
    let reasons = data
        .personalized
        .iter()
        .map(|m| (m.id, recommend::recommendation_reasons(m, &data.profile)))
        .collect();
    Ok(Json(RecommendationsResponse { data, reasons }))
}

/// Debounce key: the session token when present, otherwise the caller's address.
fn client_key(headers: &HeaderMap) -> String {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match bearer {
        Some(token) => format!("session:{token}"),
        None => format!("ip:{}", extract_ip(headers)),
    }
}

fn extract_ip(headers: &HeaderMap) -> String {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
