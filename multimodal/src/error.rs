use std::time::Duration;

use thiserror::Error;

pub type MultiModalResult<T> = Result<T, MediaConnectorError>;

#[derive(Debug, Error)]
pub enum MediaConnectorError {
    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported image URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Image host not allowed: {0}")]
    DomainNotAllowed(String),

    #[error("Image fetch failed: {0}")]
    Fetch(String),

    #[error("Image fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Image too large: {actual} {unit} exceeds the limit of {limit}")]
    TooLarge {
        unit: &'static str,
        actual: u64,
        limit: u64,
    },

    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Image aspect ratio {ratio:.1} exceeds the limit of {limit}")]
    AspectRatio { ratio: f64, limit: f64 },

    #[error("Image task failed: {0}")]
    Task(String),
}

impl MediaConnectorError {
    pub fn is_too_large(&self) -> bool {
        matches!(self, MediaConnectorError::TooLarge { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaConnectorError::Timeout(_))
    }
}

impl From<image::ImageError> for MediaConnectorError {
    fn from(err: image::ImageError) -> Self {
        MediaConnectorError::Decode(err.to_string())
    }
}
