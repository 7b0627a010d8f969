use clipper_engine::ClipError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Clip(#[from] ClipError),

    #[error("Invalid config file {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// HTTP-style status used in the JSON error envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Clip(e) => e.status_code(),
            AppError::InvalidInput(_) => 400,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(e: toml::ser::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
