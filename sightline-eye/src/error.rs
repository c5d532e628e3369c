//! Error types for sightline-eye

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Depth error: {0}")]
    Depth(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Feature extraction error: {0}")]
    Extraction(String),

    #[error("Descriptor store error: {0}")]
    Store(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, PerceptionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perception_error_display() {
        let err = PerceptionError::Decode("not base64".to_string());
        assert!(err.to_string().contains("Decode error"));
        assert!(err.to_string().contains("not base64"));
    }

    #[test]
    fn test_perception_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: PerceptionError = io_err.into();
        match err {
            PerceptionError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_perception_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: PerceptionError = json_err.into();
        assert!(matches!(err, PerceptionError::Json(_)));
    }
}
