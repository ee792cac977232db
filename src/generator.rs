use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, Local};
use image::ImageFormat;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::config::Config;
use crate::image_api::{ImageApiClient, ImagePayload};

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Image API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Image API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected image API response: {0}")]
    InvalidResponse(String),

    #[error("Image download failed: {0}")]
    Download(String),

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Simple,
    Cartoon,
    Realistic,
}

impl Style {
    /// Unknown labels quietly become [`Style::Simple`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "cartoon" => Self::Cartoon,
            "realistic" => Self::Realistic,
            _ => Self::Simple,
        }
    }

    fn prompt_phrase(self) -> &'static str {
        match self {
            Self::Simple => "simple line art, clean lines, minimalistic",
            Self::Cartoon => "cartoon style, fun and playful lines",
            Self::Realistic => "realistic line art, detailed outlines",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl DetailLevel {
    /// Unknown labels quietly become [`DetailLevel::Medium`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    fn prompt_phrase(self) -> &'static str {
        match self {
            Self::Low => "very simple, few details, suitable for young children",
            Self::Medium => "moderate amount of details, balanced complexity",
            Self::High => "highly detailed, intricate patterns, for advanced coloring",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Simple => "simple",
            Self::Cartoon => "cartoon",
            Self::Realistic => "realistic",
        })
    }
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// A picture that made it to disk. `source_url` points at third-party storage
/// that expires; `local_path` is the copy that matters.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub source_url: Option<String>,
    pub local_path: PathBuf,
    pub subject: String,
    pub created_at: DateTime<Local>,
}

impl GeneratedImage {
    pub fn filename(&self) -> String {
        self.local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub fn build_prompt(subject: &str, style: Style, detail: DetailLevel) -> String {
    format!(
        "Black and white coloring page of {subject}.\n\
{}.\n\
{}.\n\
Clear outlines, no shading, no colors, white background, ready to print and color.",
        style.prompt_phrase(),
        detail.prompt_phrase(),
    )
}

/// Keeps letters, digits, spaces, `-` and `_`, then joins the space-separated
/// words with single underscores: `"Cat & Dog!"` -> `"Cat_Dog"`.
pub fn sanitize_subject(subject: &str) -> String {
    let kept: String = subject
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let joined = kept
        .split(' ')
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if joined.is_empty() {
        "image".to_string()
    } else {
        joined
    }
}

/// Unique per subject and second; two requests for the same subject within
/// one second write the same file and the later one wins.
pub fn coloring_filename(subject: &str, timestamp: &DateTime<Local>) -> String {
    format!(
        "coloring_{}_{}.png",
        sanitize_subject(subject),
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

/// Re-encodes anything that is not already PNG so the `.png` file name holds.
pub fn ensure_png(bytes: Vec<u8>) -> Result<Vec<u8>, GenerationError> {
    if matches!(image::guess_format(&bytes), Ok(ImageFormat::Png)) {
        return Ok(bytes);
    }
    let decoded = image::load_from_memory(&bytes)
        .map_err(|err| GenerationError::InvalidResponse(format!("unreadable image data: {err}")))?;
    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|err| GenerationError::InvalidResponse(format!("re-encode as PNG: {err}")))?;
    debug!(from = bytes.len(), to = png.len(), "Converted image payload to PNG");
    Ok(png)
}

#[derive(Clone, Debug)]
pub struct ColoringPageGenerator {
    api: ImageApiClient,
    output_dir: PathBuf,
}

impl ColoringPageGenerator {
    pub fn new(api: ImageApiClient, output_dir: PathBuf) -> Self {
        Self { api, output_dir }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ImageApiClient::from_config(config), config.output_dir.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.api.is_configured()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn generate(
        &self,
        subject: &str,
        style: Style,
        detail: DetailLevel,
    ) -> Result<GeneratedImage, GenerationError> {
        let prompt = build_prompt(subject, style, detail);
        debug!(%prompt, "Generating coloring page");

        let (bytes, source_url) = match self.api.generate(&prompt).await? {
            ImagePayload::Url(url) => (self.api.download(&url).await?, Some(url.to_string())),
            ImagePayload::Base64(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|err| {
                        GenerationError::InvalidResponse(format!("bad b64_json: {err}"))
                    })?;
                (bytes, None)
            }
        };
        let bytes = ensure_png(bytes)?;

        let created_at = Local::now();
        let local_path = self.output_dir.join(coloring_filename(subject, &created_at));
        fs::write(&local_path, &bytes)
            .await
            .map_err(|source| GenerationError::Io {
                path: local_path.clone(),
                source,
            })?;
        info!(path = %local_path.display(), bytes = bytes.len(), "Image saved");

        Ok(GeneratedImage {
            source_url,
            local_path,
            subject: subject.to_string(),
            created_at,
        })
    }
}
