use std::env;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_MODEL: &str = "dall-e-3";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Process-wide settings, read once at startup and shared read-only.
#[derive(Clone, Debug)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub output_dir: PathBuf,
    pub printing: PrintSettings,
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Default)]
pub struct PrintSettings {
    pub enabled: bool,
    /// `None` prints to the system default printer.
    pub printer_name: Option<String>,
    /// `None` sends the file as-is, without padding it to a page shape.
    pub page_size: Option<String>,
    /// Overrides the facility's default executable (`lp`, `lpr`, `powershell`).
    pub command: Option<PathBuf>,
    pub options: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let openai_api_key = non_empty("OPENAI_API_KEY").ok_or(ConfigError::MissingApiKey)?;
        let port = match non_empty("PORT") {
            Some(value) => value.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let printing = PrintSettings {
            enabled: non_empty("ENABLE_PRINTING")
                .map(|value| parse_flag(&value))
                .unwrap_or(false),
            printer_name: non_empty("PRINTER_NAME"),
            page_size: non_empty("PAGE_SIZE"),
            command: non_empty("PRINT_COMMAND").map(PathBuf::from),
            options: non_empty("PRINT_OPTIONS")
                .map(|value| value.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        };

        Ok(Self {
            openai_api_key,
            openai_model: non_empty("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openai_base_url: non_empty("OPENAI_BASE_URL")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            output_dir: non_empty("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            printing,
            host: non_empty("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
