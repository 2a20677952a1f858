//! Reverse image lookup front end.
//!
//! Accepts an uploaded image or a URL to one, validates it while it
//! arrives, and asks a similarity matcher for the closest entries in the
//! configured services. Every lookup answers with an XML document.
//!
//! [`router`] builds the HTTP surface; [`lookup::LookupService`] is the
//! pipeline behind it and can be driven directly.

use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, RawQuery, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tower_http::services::ServeDir;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

pub mod config;
pub mod fetch;
pub mod lookup;
pub mod matcher;
pub mod thumbnail;
pub mod xml;

use crate::config::{AppConfig, ConfigError, NO_CACHE_CONTROL};
use crate::fetch::{TracingReporter, TransferError};
use crate::lookup::{LookupError, LookupService, MatchRequest};

#[derive(Error, Debug)]
pub enum ImgQueryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("HTTP client error: {0}")]
    Client(#[from] TransferError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImgQueryError>;

// Upload failure codes, numbered like the classic form-upload error codes.
pub const UPLOAD_ERR_SIZE: u16 = 1;
pub const UPLOAD_ERR_PARTIAL: u16 = 3;
pub const UPLOAD_ERR_NO_FILE: u16 = 4;
pub const UPLOAD_ERR_CANT_WRITE: u16 = 7;

/// Room for multipart framing and the small text fields around the file.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

/// Parameters of a fetch-by-URL lookup, from the query string and/or an
/// urlencoded form body. `service` may repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParams {
    pub url: String,
    pub request: MatchRequest,
    pub quiet: bool,
}

impl UrlParams {
    /// Merge the query string with an `application/x-www-form-urlencoded`
    /// body. The last `url` wins, so the body overrides the query;
    /// `service` values from both are kept in order. Fails when no
    /// non-empty http(s) `url` was given or either input is malformed.
    pub fn parse(query: &str, body: &[u8]) -> std::result::Result<Self, String> {
        let mut pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(query).map_err(|e| format!("Invalid query: {}", e))?;
        if !body.is_empty() {
            let form: Vec<(String, String)> =
                serde_urlencoded::from_bytes(body).map_err(|e| format!("Invalid form data: {}", e))?;
            pairs.extend(form);
        }

        let mut url = None;
        let mut request = MatchRequest::default();
        let mut quiet = false;
        for (key, value) in pairs {
            match key.as_str() {
                "url" => url = Some(value.trim().to_string()),
                "service" | "service[]" => push_services(&mut request.services, &value),
                "forcegray" => request.forcegray = is_truthy(&value),
                "quiet" => quiet = is_truthy(&value),
                _ => {}
            }
        }

        let url = url.filter(|u| !u.is_empty()).ok_or_else(|| "No URL given".to_string())?;
        let scheme_ok = reqwest::Url::parse(&url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !scheme_ok {
            return Err(format!("Invalid URL: {}", url));
        }
        Ok(Self { url, request, quiet })
    }
}

fn push_services(services: &mut Vec<String>, value: &str) {
    services.extend(value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from));
}

/// Checkbox semantics: present and not explicitly off.
fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "off" | "no")
}

fn xml_response(result: std::result::Result<String, LookupError>) -> Response {
    let body = match result {
        Ok(xml) => {
            METRICS.matches.fetch_add(1, Ordering::Relaxed);
            xml
        }
        Err(e) => {
            METRICS.errors.fetch_add(1, Ordering::Relaxed);
            if let LookupError::Transfer { error, .. } = &e {
                if error.is_rejection() {
                    METRICS.rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
            tracing::info!("Lookup failed: {}", e);
            xml::error_document(&e.to_string())
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml; charset=utf-8"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE_CONTROL));
    (headers, body).into_response()
}

/// An uploaded file spooled to disk, plus the selected services.
struct Upload {
    path: TempPath,
    name: String,
    request: MatchRequest,
}

/// `POST /upload`: multipart with a `file` part and `service` fields.
/// Upload problems become an error document carrying an upload code.
async fn upload_handler(
    State(service): State<Arc<LookupService>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    METRICS.uploads.fetch_add(1, Ordering::Relaxed);
    let upload = match multipart {
        Ok(mut multipart) => read_upload(service.config(), &mut multipart).await,
        Err(rejection) => {
            tracing::debug!("Rejected upload body: {}", rejection);
            Err(UPLOAD_ERR_NO_FILE)
        }
    };
    let result = match upload {
        Ok(upload) => service.lookup_file(&upload.path, &upload.name, &upload.request).await,
        Err(code) => Err(LookupError::Upload(code)),
    };
    xml_response(result)
}

async fn read_upload(config: &AppConfig, multipart: &mut Multipart) -> std::result::Result<Upload, u16> {
    let mut file: Option<(TempPath, String)> = None;
    let mut request = MatchRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_code(&e))? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let original = field.file_name().unwrap_or("upload").to_string();
                let path = spool_field(config, field).await?;
                file = Some((path, original));
            }
            "service" | "service[]" => {
                let text = field.text().await.map_err(|e| multipart_code(&e))?;
                push_services(&mut request.services, &text);
            }
            "forcegray" => {
                let text = field.text().await.map_err(|e| multipart_code(&e))?;
                request.forcegray = is_truthy(&text);
            }
            _ => {}
        }
    }

    let (path, name) = file.ok_or(UPLOAD_ERR_NO_FILE)?;
    Ok(Upload { path, name, request })
}

async fn spool_field(config: &AppConfig, mut field: Field<'_>) -> std::result::Result<TempPath, u16> {
    let tmp = tempfile::Builder::new()
        .prefix("imgquery-upload-")
        .tempfile_in(&config.fetch.temp_dir)
        .map_err(|e| {
            tracing::error!("Cannot create upload file: {}", e);
            UPLOAD_ERR_CANT_WRITE
        })?;
    let (file, path) = tmp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut size = 0usize;
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_code(&e))? {
        size += chunk.len();
        if size > config.max_upload_size {
            return Err(UPLOAD_ERR_SIZE);
        }
        file.write_all(&chunk).await.map_err(|_| UPLOAD_ERR_CANT_WRITE)?;
    }
    if size == 0 {
        return Err(UPLOAD_ERR_NO_FILE);
    }
    file.flush().await.map_err(|_| UPLOAD_ERR_CANT_WRITE)?;
    Ok(path)
}

fn multipart_code(e: &MultipartError) -> u16 {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UPLOAD_ERR_SIZE
    } else {
        UPLOAD_ERR_PARTIAL
    }
}

/// `GET|POST /url?url=...&service=...`: fetch the image, then look it up.
async fn url_handler(
    State(service): State<Arc<LookupService>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    METRICS.url_lookups.fetch_add(1, Ordering::Relaxed);
    let params = match UrlParams::parse(query.as_deref().unwrap_or(""), &body) {
        Ok(p) => p,
        Err(msg) => return xml_response(Err(LookupError::Request(msg))),
    };
    tracing::debug!("URL lookup: url={}, services={:?}, forcegray={}", params.url, params.request.services, params.request.forcegray);

    let mut reporter = TracingReporter::new(params.url.clone());
    let result = service.lookup_url(&params.url, &params.request, params.quiet, &mut reporter).await;
    xml_response(result)
}

// ====================================================================================
// OBSERVABILITY
// ====================================================================================

use std::sync::atomic::{AtomicU64, Ordering};

/// Global request counters
pub struct Metrics {
    pub uploads: AtomicU64,
    pub url_lookups: AtomicU64,
    pub matches: AtomicU64,
    pub errors: AtomicU64,
    pub rejected: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            uploads: AtomicU64::new(0),
            url_lookups: AtomicU64::new(0),
            matches: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    static ref METRICS: Metrics = Metrics::new();
}

/// Health check endpoint
async fn health_handler(State(service): State<Arc<LookupService>>) -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "imgquery",
        "services": service.config().services,
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler() -> impl IntoResponse {
    let metrics = format!(
        "# HELP imgquery_uploads_total Total number of upload lookups\n\
         # TYPE imgquery_uploads_total counter\n\
         imgquery_uploads_total {}\n\
         # HELP imgquery_url_lookups_total Total number of fetch-by-URL lookups\n\
         # TYPE imgquery_url_lookups_total counter\n\
         imgquery_url_lookups_total {}\n\
         # HELP imgquery_matches_total Total number of lookups answered with results\n\
         # TYPE imgquery_matches_total counter\n\
         imgquery_matches_total {}\n\
         # HELP imgquery_errors_total Total number of lookups answered with an error\n\
         # TYPE imgquery_errors_total counter\n\
         imgquery_errors_total {}\n\
         # HELP imgquery_rejected_total Total number of images rejected by validation\n\
         # TYPE imgquery_rejected_total counter\n\
         imgquery_rejected_total {}\n",
        METRICS.uploads.load(Ordering::Relaxed),
        METRICS.url_lookups.load(Ordering::Relaxed),
        METRICS.matches.load(Ordering::Relaxed),
        METRICS.errors.load(Ordering::Relaxed),
        METRICS.rejected.load(Ordering::Relaxed),
    );

    (StatusCode::OK, [("Content-Type", "text/plain; version=0.0.4")], metrics)
}

/// Router backed by the bundled collaborators.
///
/// Validates `config` first, so a misconfigured server fails at startup
/// rather than on the first request.
pub fn router(config: AppConfig) -> Result<Router> {
    config.validate()?;
    let service = LookupService::new(config)?;
    Ok(service_router(Arc::new(service)))
}

/// Router over an existing [`LookupService`], for callers that supply
/// their own thumbnailer, matcher or renderer.
///
/// Lookup routes sit behind the body limit and, when configured, the
/// per-peer rate limiter. `/health` and `/metrics` are never limited.
/// Generated thumbnails are served from `/thumbs`.
pub fn service_router(service: Arc<LookupService>) -> Router {
    let config = service.config().clone();

    // Observability endpoints - NO rate limiting
    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(service.clone());

    let mut lookup_routes = Router::new()
        .route("/upload", post(upload_handler))
        .route("/url", get(url_handler).post(url_handler))
        .layer(DefaultBodyLimit::max(config.max_upload_size + UPLOAD_OVERHEAD))
        .with_state(service);

    match config.rate_limit {
        Some(limit) => {
            match GovernorConfigBuilder::default()
                .per_second(limit.per_second)
                .burst_size(limit.burst_size)
                .finish()
            {
                Some(governor_conf) => {
                    tracing::info!(
                        "Router configured with rate limiting: {}/sec, burst {}",
                        limit.per_second,
                        limit.burst_size
                    );
                    lookup_routes = lookup_routes.layer(GovernorLayer {
                        config: Box::leak(Box::new(governor_conf)),
                    });
                }
                None => tracing::warn!("Invalid rate limit {:?}, rate limiting disabled", limit),
            }
        }
        None => tracing::info!("Rate limiting disabled"),
    }

    Router::new()
        .merge(observability_routes)
        .merge(lookup_routes)
        .nest_service("/thumbs", ServeDir::new(&config.thumb_dir))
}
