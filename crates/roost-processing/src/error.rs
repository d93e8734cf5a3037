/// Failures while turning an upload into stored variants.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    #[error("Input too large: {size} bytes (max: {max} bytes)")]
    InputTooLarge { size: usize, max: usize },

    #[error("Empty input")]
    EmptyInput,

    #[error("Encoding failed: {0}")]
    Encode(String),
}

impl From<TranscodeError> for roost_core::AppError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::InputTooLarge { .. } => {
                roost_core::AppError::PayloadTooLarge(err.to_string())
            }
            other => roost_core::AppError::ImageProcessing(other.to_string()),
        }
    }
}
