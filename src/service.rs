use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::generator::{ColoringPageGenerator, DetailLevel, GeneratedImage, Style};
use crate::image_processing;
use crate::printer::{PrintDispatcher, PrintResult};

/// A validated request for one coloring page.
#[derive(Debug, Clone, PartialEq)]
pub struct ColoringRequest {
    pub subject: String,
    pub style: Style,
    pub detail_level: DetailLevel,
    pub print: bool,
    pub enhance: bool,
    pub outline: bool,
}

impl ColoringRequest {
    pub fn new(subject: &str) -> Result<Self, AppError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(AppError::Validation("Subject is required".to_string()));
        }
        Ok(Self {
            subject: subject.to_string(),
            style: Style::default(),
            detail_level: DetailLevel::default(),
            print: false,
            enhance: true,
            outline: false,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ColoringOutcome {
    pub image: GeneratedImage,
    pub enhanced_path: Option<PathBuf>,
    pub outline_path: Option<PathBuf>,
    pub print: Option<PrintResult>,
}

impl ColoringOutcome {
    /// The file that goes to paper: the enhanced page when there is one.
    pub fn printable_path(&self) -> &Path {
        self.enhanced_path
            .as_deref()
            .unwrap_or(&self.image.local_path)
    }
}

/// Runs one request end to end: generate, post-process, optionally print.
#[derive(Clone, Debug)]
pub struct ColoringService {
    generator: ColoringPageGenerator,
    printer: PrintDispatcher,
}

impl ColoringService {
    pub fn new(generator: ColoringPageGenerator, printer: PrintDispatcher) -> Self {
        Self { generator, printer }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ColoringPageGenerator::from_config(config),
            PrintDispatcher::from_config(config),
        )
    }

    pub fn generator(&self) -> &ColoringPageGenerator {
        &self.generator
    }

    pub fn printer(&self) -> &PrintDispatcher {
        &self.printer
    }

    pub async fn create(&self, request: &ColoringRequest) -> Result<ColoringOutcome, AppError> {
        info!(
            subject = %request.subject,
            style = %request.style,
            detail = %request.detail_level,
            print = request.print,
            "Coloring page requested"
        );
        let image = self
            .generator
            .generate(&request.subject, request.style, request.detail_level)
            .await?;

        let enhanced_path = if request.enhance {
            Some(run_transform(&image.local_path, image_processing::enhance_for_coloring).await?)
        } else {
            None
        };
        let outline_path = if request.outline {
            Some(run_transform(&image.local_path, image_processing::create_outline_version).await?)
        } else {
            None
        };

        let mut outcome = ColoringOutcome {
            image,
            enhanced_path,
            outline_path,
            print: None,
        };
        if request.print {
            outcome.print = Some(self.printer.print_image(outcome.printable_path()).await);
        }
        Ok(outcome)
    }
}

async fn run_transform(
    path: &Path,
    transform: fn(&Path) -> Result<PathBuf, image_processing::ProcessError>,
) -> Result<PathBuf, AppError> {
    let source = path.to_path_buf();
    let output = tokio::task::spawn_blocking(move || transform(&source))
        .await
        .map_err(|err| AppError::Internal(format!("image task failed: {err}")))??;
    Ok(output)
}
