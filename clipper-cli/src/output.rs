use clipper_engine::ClipOutput;
#[cfg(feature = "colored-output")]
use colored::*;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::{AppError, Result};

/// Success body, as returned by the clip endpoint.
#[derive(Debug, Serialize)]
struct ClipResponse<'a> {
    path: &'a str,
}

/// Failure body: the message plus the HTTP status it maps to.
#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    message: &'a str,
    error: u16,
}

pub fn format_clip(output: &ClipOutput, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(&ClipResponse {
            path: &output.relative_path,
        })?),
        OutputFormat::Pretty => Ok(format_pretty(output)),
    }
}

pub fn format_error(error: &AppError) -> String {
    let message = error.to_string();
    let body = ErrorResponse {
        message: &message,
        error: error.status_code(),
    };
    serde_json::to_string(&body)
        .unwrap_or_else(|_| format!(r#"{{"message":"internal error","error":{}}}"#, body.error))
}

fn format_pretty(output: &ClipOutput) -> String {
    let mut text = String::new();
    text.push_str(&label("Clip created"));
    text.push('\n');
    text.push_str(&format!("  Path:     {}\n", output.output_path.display()));
    text.push_str(&format!("  Clip ID:  {}\n", output.clip_id));
    text.push_str(&format!("  Segments: {}\n", output.segment_count));
    text.push_str(&format!("  Size:     {}\n", human_bytes(output.bytes)));
    text
}

#[cfg(feature = "colored-output")]
fn label(text: &str) -> String {
    text.green().bold().to_string()
}

#[cfg(not(feature = "colored-output"))]
fn label(text: &str) -> String {
    text.to_string()
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
