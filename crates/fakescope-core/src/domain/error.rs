//! Error taxonomy shared by the pipeline and its boundaries.

/// Errors surfaced by the detection pipeline.
///
/// The variants carry distinct status semantics at the outer boundary:
/// input errors reject the request, everything else is an internal failure.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// Required storage location, credentials or checkpoint are missing.
    #[error("configuration error: {0}")]
    Config(String),
    /// The image could not be fetched or decoded.
    #[error("invalid input: {0}")]
    Input(String),
    /// Preprocessing, forward pass, saliency or artifact emission failed.
    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectError {
    /// Creates an input error.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Creates an inference error.
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if the caller supplied a bad image or location.
    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(self, Self::Input(_))
    }

    /// Returns true for missing configuration.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<candle_core::Error> for DetectError {
    fn from(err: candle_core::Error) -> Self {
        Self::Inference(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(DetectError::input("bad bytes").is_input());
        assert!(!DetectError::inference("boom").is_input());
        assert!(DetectError::config("no endpoint").is_config());
    }

    #[test]
    fn test_candle_error_is_inference() {
        let err: DetectError = candle_core::Error::Msg("shape".into()).into();
        assert!(matches!(err, DetectError::Inference(_)));
    }
}
