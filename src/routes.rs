use std::{collections::HashSet, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderName, HeaderValue, StatusCode, header::CONTENT_DISPOSITION},
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::{
    config::{AppConfig, ConfigError},
    error::{ApiError, DownloadError},
    pipeline::{DOWNLOAD_FILENAME_HEADER, ScratchSpace, fetch_and_serve},
    resolver::{ResolveError, StreamResolver, with_timeout},
    sanitize::safe_filename,
    selector::{SelectionPolicy, SelectionRule, select_stream},
    validate::{DownloadKind, validate_request},
};

pub const VIDEO_ROUTE: &str = "/AnotherAPI/downloader/YT/mp4/";
pub const AUDIO_ROUTE: &str = "/AnotherAPI/new_downloader/YT/mp3/";

/// Everything a handler needs. Immutable and cheap to clone; requests share
/// nothing mutable through it.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<dyn StreamResolver>,
    pub selection: Arc<SelectionPolicy>,
    pub scratch: ScratchSpace,
    pub resolve_timeout: Duration,
    pub fetch_timeout: Duration,
    pub stale_scratch_after: Duration,
}

impl AppState {
    pub fn new(resolver: Arc<dyn StreamResolver>, config: &AppConfig) -> Self {
        Self {
            resolver,
            selection: Arc::new(config.selection.clone()),
            scratch: ScratchSpace::new(config.scratch_dir.clone()),
            resolve_timeout: config.resolve_timeout,
            fetch_timeout: config.fetch_timeout,
            stale_scratch_after: config.stale_scratch_after,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    youtube_url: String,
}

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(VIDEO_ROUTE, post(download_video))
        .route(AUDIO_ROUTE, post(download_audio))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

type DownloadParams = Result<Query<DownloadQuery>, QueryRejection>;

async fn download_video(
    State(state): State<AppState>,
    query: DownloadParams,
) -> Result<Response, ApiError> {
    handle_download(&state, query, DownloadKind::Video).await
}

async fn download_audio(
    State(state): State<AppState>,
    query: DownloadParams,
) -> Result<Response, ApiError> {
    handle_download(&state, query, DownloadKind::Audio).await
}

#[instrument(skip_all, fields(kind = %kind))]
async fn handle_download(
    state: &AppState,
    query: DownloadParams,
    kind: DownloadKind,
) -> Result<Response, ApiError> {
    serve_download(state, query, kind).await.map_err(|failure| {
        if failure.status() == StatusCode::INTERNAL_SERVER_ERROR {
            error!("An unexpected error occurred during {kind} download: {failure:?}");
        } else {
            warn!("{kind} download rejected: {failure}");
        }
        ApiError::from(failure)
    })
}

async fn serve_download(
    state: &AppState,
    query: DownloadParams,
    kind: DownloadKind,
) -> Result<Response, DownloadError> {
    let Query(query) = query?;
    let request = validate_request(&query.youtube_url, kind)?;
    info!("Received URL for {kind}: {}", request.url());

    let video = with_timeout(
        state.resolve_timeout,
        ResolveError::Timeout,
        state.resolver.resolve(request.url()),
    )
    .await?;
    info!("Processing {kind} for: {}", video.title);

    let selection = select_stream(&video.streams, request.kind(), &state.selection)
        .ok_or(DownloadError::NoStreamAvailable(kind))?;
    if selection.rule == SelectionRule::TallestProgressive {
        warn!(
            "{}p stream not found, using best available {} stream",
            state.selection.preferred_height, state.selection.container
        );
    }
    debug!(
        format_id = %selection.stream.source.format_id,
        rule = %selection.rule,
        "stream selected"
    );

    let filename = safe_filename(&video.title, &video.video_id, kind.extension());
    state.scratch.reap_stale(state.stale_scratch_after).await;

    fetch_and_serve(
        state.resolver.as_ref(),
        selection.stream,
        &filename,
        kind,
        &state.scratch,
        state.fetch_timeout,
    )
    .await
}

/// CORS limited to an explicit origin list. Allowed origins may use any method
/// and header, with credentials.
pub fn build_cors_layer(origins: &[String]) -> Result<CorsLayer, ConfigError> {
    let normalized_origins = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| ConfigError::InvalidOrigin(origin.clone()))
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate({
        let allowed_origins = Arc::clone(&allowed_origins);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }
    });
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins.iter().collect::<Vec<_>>()
    );

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        ]))
}

/// `scheme://host[:port]` with the default port dropped; `None` for anything
/// that is not a bare http(s) origin.
pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}
