use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

/// Longest reason shown next to a row or image cell.
pub const REASON_MAX_CHARS: usize = 30;
/// Longest error chain written to the event log.
pub const DETAIL_MAX_CHARS: usize = 512;

/// Why a single generation call produced no image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationFailure {
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error("No image data")]
    NoImageData,
    #[error("{0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Auth failed: {0}")]
    Auth(String),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    Generation(#[from] GenerationFailure),

    #[error("Caption failed: {0}")]
    Caption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn transport(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Operator-facing status text, at most [`REASON_MAX_CHARS`] characters.
    pub fn short_reason(&self) -> String {
        let text = match self {
            Self::NotFound(_) => "File not found".to_string(),
            Self::Transport { source, .. } if source.is_timeout() => "Timeout".to_string(),
            Self::Transport { source, .. } => match source.status() {
                Some(status) => format!("HTTP {}", status.as_u16()),
                None => source.to_string(),
            },
            other => other.to_string(),
        };
        truncate_chars(&text, REASON_MAX_CHARS)
    }

    /// Full cause chain for the event log, at most [`DETAIL_MAX_CHARS`]
    /// characters plus an ellipsis.
    pub fn detail(&self) -> String {
        error_chain_text(self, DETAIL_MAX_CHARS)
    }
}

pub fn error_chain_text(err: &(dyn StdError + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(|last| last != trimmed).unwrap_or(true) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
