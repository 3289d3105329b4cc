//! CLI output formatting (table, JSON).
//!
//! Every command can emit machine-readable JSON; the default is a
//! human-readable table rendered with `comfy_table`.

use crate::core::error::HarnessError;
use comfy_table::{Cell, Table};
use serde::Serialize;

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// Machine-readable JSON format.
    Json,
}

/// Structured CLI response envelope for JSON output.
#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOutput>,
}

/// Structured error output.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub tag: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub exit_code: i32,
}

impl From<&HarnessError> for ErrorOutput {
    fn from(err: &HarnessError) -> Self {
        Self {
            tag: err.tag().to_string(),
            message: err.to_string(),
            hint: err.hint().map(str::to_string),
            exit_code: err.exit_code(),
        }
    }
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Prints data in the requested format.
pub fn output<T: Serialize>(data: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let response = CliResponse::success(data);
            if let Ok(json) = serde_json::to_string_pretty(&response) {
                println!("{json}");
            }
        }
        OutputFormat::Table => {
            if let Ok(json) = serde_json::to_string_pretty(data) {
                println!("{json}");
            }
        }
    }
}

/// Prints an error in the requested format and returns its exit code.
pub fn output_error(err: &HarnessError, format: OutputFormat) -> i32 {
    match format {
        OutputFormat::Json => {
            let response = CliResponse::<()> {
                success: false,
                data: None,
                error: Some(ErrorOutput::from(err)),
            };
            if let Ok(json) = serde_json::to_string_pretty(&response) {
                eprintln!("{json}");
            }
        }
        OutputFormat::Table => {
            eprintln!("Error: {err}");
            if let Some(hint) = err.hint() {
                eprintln!("Hint: {hint}");
            }
        }
    }
    err.exit_code()
}

/// Creates a table with the given headers.
#[must_use]
pub fn create_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_header(headers.iter().map(|h| Cell::new(*h)));
    table
}
