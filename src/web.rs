use std::any::Any;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    Json, Router,
    extract::{Path as UrlPath, State, rejection::JsonRejection},
    http::header,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::AppError;
use crate::generator::{DetailLevel, Style};
use crate::image_processing::PADDED_SUFFIX;
use crate::printer::{PrintResult, PrinterListing};
use crate::service::{ColoringRequest, ColoringService};
use crate::voice;

const INDEX_HTML: &str = include_str!("../templates/index.html");
const OUTPUT_ROUTE: &str = "/output";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<ColoringService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let service = ColoringService::from_config(&config);
        Self {
            config: Arc::new(config),
            service: Arc::new(service),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/print", post(print_file))
        .route("/output/{filename}", get(serve_output))
        .route("/gallery", get(gallery))
        .route("/printers", get(printers))
        .route("/alice", post(voice::alice_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "Handler panicked");
    AppError::Internal(detail).into_response()
}

pub fn output_url(filename: &str) -> String {
    format!("{OUTPUT_ROUTE}/{filename}")
}

fn url_for(path: &Path) -> String {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_url(&filename)
}

/// Maps a caller-supplied file name onto an existing file directly inside
/// `output_dir`. Anything with path structure is refused before touching disk.
pub async fn resolve_output_file(output_dir: &Path, filename: &str) -> Result<PathBuf, AppError> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(AppError::Validation("Filename is required".to_string()));
    }
    let mut components = Path::new(filename).components();
    let single_name = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    let has_separator = filename.contains(|c: char| matches!(c, '/' | '\\' | ':' | '\0'));
    if !single_name || has_separator || filename.contains("..") {
        return Err(AppError::Validation("Invalid filename".to_string()));
    }

    let candidate = output_dir.join(filename);
    let resolved = match fs::canonicalize(&candidate).await {
        Ok(path) => path,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        Err(err) => return Err(AppError::Internal(format!("resolve {filename}: {err}"))),
    };
    let root = fs::canonicalize(output_dir)
        .await
        .map_err(|err| AppError::Internal(format!("resolve output dir: {err}")))?;
    if !resolved.starts_with(&root) || !resolved.is_file() {
        return Err(AppError::NotFound("File not found".to_string()));
    }
    Ok(resolved)
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub generation_configured: bool,
    pub printing_enabled: bool,
    pub page_size: Option<String>,
    pub print_facility: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let printer = state.service.printer();
    Json(HealthResponse {
        status: "ok".to_string(),
        generation_configured: state.service.generator().is_configured(),
        printing_enabled: printer.is_enabled(),
        page_size: printer.page_size().map(str::to_string),
        print_facility: printer.facility().to_string(),
    })
}

#[derive(Deserialize, Debug)]
pub struct GenerateRequest {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub detail_level: Option<String>,
    #[serde(default)]
    pub print: bool,
    #[serde(default)]
    pub enhance: Option<bool>,
    #[serde(default)]
    pub outline: bool,
}

impl GenerateRequest {
    pub fn into_coloring_request(self) -> Result<ColoringRequest, AppError> {
        let mut request = ColoringRequest::new(self.subject.as_deref().unwrap_or_default())?;
        request.style = self
            .style
            .as_deref()
            .map(Style::from_label)
            .unwrap_or_default();
        request.detail_level = self
            .detail_level
            .as_deref()
            .map(DetailLevel::from_label)
            .unwrap_or_default();
        request.print = self.print;
        request.enhance = self.enhance.unwrap_or(true);
        request.outline = self.outline;
        Ok(request)
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GenerateResponse {
    pub success: bool,
    pub filename: String,
    pub image_url: String,
    pub original_url: Option<String>,
    pub enhanced_url: Option<String>,
    pub outline_url: Option<String>,
    pub printed: bool,
    pub print_message: Option<String>,
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let Json(payload) = payload?;
    let request = payload.into_coloring_request()?;
    let outcome = state.service.create(&request).await?;

    let filename = outcome.image.filename();
    Ok(Json(GenerateResponse {
        success: true,
        image_url: output_url(&filename),
        filename,
        original_url: outcome.image.source_url.clone(),
        enhanced_url: outcome.enhanced_path.as_deref().map(url_for),
        outline_url: outcome.outline_path.as_deref().map(url_for),
        printed: outcome.print.as_ref().is_some_and(|result| result.success),
        print_message: outcome.print.map(|result| result.message),
    }))
}

#[derive(Deserialize, Debug)]
pub struct PrintRequest {
    #[serde(default)]
    pub filename: String,
}

async fn print_file(
    State(state): State<AppState>,
    payload: Result<Json<PrintRequest>, JsonRejection>,
) -> Result<Json<PrintResult>, AppError> {
    let Json(payload) = payload?;
    let path = resolve_output_file(state.output_dir(), &payload.filename).await?;
    info!(filename = %payload.filename, "Print requested");
    Ok(Json(state.service.printer().print_image(&path).await))
}

async fn serve_output(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Result<Response, AppError> {
    let path = resolve_output_file(state.output_dir(), &filename).await?;
    let bytes = fs::read(&path)
        .await
        .map_err(|err| AppError::Internal(format!("read {}: {err}", path.display())))?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&path))], bytes).into_response())
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub filename: String,
    pub url: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GalleryResponse {
    pub files: Vec<GalleryEntry>,
}

/// Every `.png` in `output_dir`, newest first. Transient padded copies are skipped.
pub async fn list_gallery(output_dir: &Path) -> Result<Vec<GalleryEntry>, AppError> {
    let mut dir = match fs::read_dir(output_dir).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(AppError::Internal(format!("read output dir: {err}"))),
    };

    let mut entries: Vec<(SystemTime, GalleryEntry)> = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|err| AppError::Internal(format!("read output dir: {err}")))?
    {
        let filename = entry.file_name().to_string_lossy().into_owned();
        if !filename.ends_with(".png") || filename.ends_with(&format!("{PADDED_SUFFIX}.png")) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let timestamp = DateTime::<Local>::from(modified)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        entries.push((
            modified,
            GalleryEntry {
                url: output_url(&filename),
                filename,
                timestamp,
            },
        ));
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.filename.cmp(&a.1.filename)));
    Ok(entries.into_iter().map(|(_, entry)| entry).collect())
}

async fn gallery(State(state): State<AppState>) -> Result<Json<GalleryResponse>, AppError> {
    let files = list_gallery(state.output_dir()).await?;
    Ok(Json(GalleryResponse { files }))
}

async fn printers(State(state): State<AppState>) -> Json<PrinterListing> {
    Json(state.service.printer().list_printers().await)
}
