//! Hands finished pages to the host print spooler.
//!
//! Exactly one [`PrintFacility`] is active per host and it is picked once at
//! startup. Printing never fails loudly: every outcome, including a missing
//! executable, comes back as a [`PrintResult`].

use std::ffi::OsString;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::{Config, PrintSettings};
use crate::image_processing;

pub const STUB_MARKER: &str = "[STUB]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintFacility {
    /// Shell "print" verb of the default handler for the file type.
    WindowsPrint,
    /// CUPS `lp`.
    CupsPrint,
    /// BSD `lpr`.
    LprPrint,
}

impl PrintFacility {
    pub fn detect() -> Self {
        if cfg!(windows) {
            Self::WindowsPrint
        } else if cfg!(target_os = "macos") {
            Self::LprPrint
        } else {
            Self::CupsPrint
        }
    }

    pub fn default_command(self) -> &'static str {
        match self {
            Self::WindowsPrint => "powershell",
            Self::CupsPrint => "lp",
            Self::LprPrint => "lpr",
        }
    }

    fn listing_command(self) -> (&'static str, Vec<&'static str>) {
        match self {
            Self::WindowsPrint => (
                "powershell",
                vec![
                    "-NoProfile",
                    "-NonInteractive",
                    "-Command",
                    "Get-Printer | Select-Object -ExpandProperty Name",
                ],
            ),
            Self::CupsPrint | Self::LprPrint => ("lpstat", vec!["-p", "-d"]),
        }
    }
}

impl fmt::Display for PrintFacility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WindowsPrint => "windows",
            Self::CupsPrint => "cups",
            Self::LprPrint => "lpr",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintResult {
    pub success: bool,
    pub message: String,
}

impl PrintResult {
    fn ok(message: String) -> Self {
        Self {
            success: true,
            message,
        }
    }

    fn failed(message: String) -> Self {
        error!(%message, "Print failed");
        Self {
            success: false,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrinterListing {
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl fmt::Display for PrintInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PrintDispatcher {
    settings: PrintSettings,
    facility: PrintFacility,
}

impl PrintDispatcher {
    pub fn new(settings: PrintSettings, facility: PrintFacility) -> Self {
        Self { settings, facility }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.printing.clone(), PrintFacility::detect())
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn facility(&self) -> PrintFacility {
        self.facility
    }

    pub fn page_size(&self) -> Option<&str> {
        self.settings.page_size.as_deref()
    }

    pub fn build_invocation(&self, path: &Path) -> PrintInvocation {
        let program = self
            .settings
            .command
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.facility.default_command()));
        let printer = self.settings.printer_name.as_deref();
        let options = &self.settings.options;

        let args = match self.facility {
            PrintFacility::WindowsPrint => {
                let file = path.display().to_string().replace('\'', "''");
                let mut script = match printer {
                    Some(name) => format!(
                        "Start-Process -FilePath '{file}' -Verb PrintTo -ArgumentList '\"{}\"'",
                        name.replace('\'', "''")
                    ),
                    None => format!("Start-Process -FilePath '{file}' -Verb Print"),
                };
                for option in options {
                    script.push(' ');
                    script.push_str(option);
                }
                vec![
                    OsString::from("-NoProfile"),
                    OsString::from("-NonInteractive"),
                    OsString::from("-Command"),
                    OsString::from(script),
                ]
            }
            PrintFacility::CupsPrint | PrintFacility::LprPrint => {
                let selector = if self.facility == PrintFacility::CupsPrint {
                    "-d"
                } else {
                    "-P"
                };
                let mut args = Vec::new();
                if let Some(name) = printer {
                    args.push(OsString::from(selector));
                    args.push(OsString::from(name));
                }
                args.extend(options.iter().map(OsString::from));
                args.push(path.as_os_str().to_os_string());
                args
            }
        };

        PrintInvocation { program, args }
    }

    pub async fn print_image(&self, path: &Path) -> PrintResult {
        if !self.settings.enabled {
            let message = format!("{STUB_MARKER} Would print: {}", path.display());
            info!(%message, "Printing disabled");
            return PrintResult::ok(message);
        }

        let padded = match self.settings.page_size.clone() {
            Some(page_size) => {
                let source = path.to_path_buf();
                let task = tokio::task::spawn_blocking(move || {
                    image_processing::pad_to_page_aspect(&source, &page_size)
                });
                match task.await {
                    Ok(Ok(padded)) => Some(padded),
                    Ok(Err(err)) => {
                        return PrintResult::failed(format!("Failed to prepare page: {err}"));
                    }
                    Err(err) => {
                        return PrintResult::failed(format!("Failed to prepare page: {err}"));
                    }
                }
            }
            None => None,
        };
        let target = padded.as_deref().unwrap_or(path);

        let invocation = self.build_invocation(target);
        let destination = self
            .settings
            .printer_name
            .as_deref()
            .unwrap_or("default printer");
        info!(facility = %self.facility, command = %invocation, "Sending to printer");

        let result = match Command::new(&invocation.program)
            .args(&invocation.args)
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                PrintResult::ok(format!(
                    "Sent to {destination} ({}): {}",
                    self.facility,
                    stdout.trim()
                ))
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                PrintResult::failed(format!(
                    "{} exited with {}: {}",
                    invocation.program.display(),
                    output.status,
                    stderr.trim()
                ))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => PrintResult::failed(format!(
                "Print command not found: {} (set PRINT_COMMAND to its full path)",
                invocation.program.display()
            )),
            Err(err) => PrintResult::failed(format!(
                "Failed to run {}: {err}",
                invocation.program.display()
            )),
        };

        if result.success {
            if let Some(padded) = padded {
                if let Err(err) = tokio::fs::remove_file(&padded).await {
                    warn!(path = %padded.display(), error = %err, "Failed to remove padded copy");
                }
            }
        }
        result
    }

    pub async fn list_printers(&self) -> PrinterListing {
        let (program, args) = self.facility.listing_command();
        match Command::new(program).args(&args).output().await {
            Ok(output) if output.status.success() => PrinterListing {
                success: true,
                output: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            },
            Ok(output) => PrinterListing {
                success: false,
                output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
            Err(err) => PrinterListing {
                success: false,
                output: format!("{program}: {err}"),
            },
        }
    }
}
