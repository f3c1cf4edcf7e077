//! Player error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced synchronously by a `play` request.
///
/// None of these leave hardware handles allocated or a session registered.
#[derive(Error, Debug)]
pub enum PlayerError {
    /// The stream does not start with a RIFF header, or ends before a required field.
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// The RIFF stream is not a plain `WAVE` / `fmt ` / `data` layout.
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    /// Channel count / bit depth combination outside {1,2} x {8,16}.
    #[error("unsupported format: {channels} channel(s), {bits_per_sample} bits per sample")]
    UnsupportedFormat { channels: u16, bits_per_sample: u16 },

    /// The container holds no complete sample.
    #[error("no samples in data chunk")]
    EmptyPayload,

    /// The audio backend refused to allocate a buffer or source.
    #[error("audio resources exhausted: {0}")]
    ResourceExhausted(String),

    /// Any other backend failure while setting up a session.
    #[error("audio backend error: {0}")]
    Backend(BackendError),

    /// Invalid player configuration.
    #[error("invalid config: {0}")]
    Config(String),

    /// Opening or reading the input failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BackendError> for PlayerError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::OutOfResources(what) => PlayerError::ResourceExhausted(what),
            other => PlayerError::Backend(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_exhaustion_maps_to_resource_exhausted() {
        let err: PlayerError = BackendError::OutOfResources("buffers".to_string()).into();
        assert!(matches!(err, PlayerError::ResourceExhausted(ref s) if s == "buffers"));
    }

    #[test]
    fn other_backend_errors_stay_backend() {
        let err: PlayerError = BackendError::InvalidHandle(7).into();
        assert!(matches!(err, PlayerError::Backend(BackendError::InvalidHandle(7))));
    }

    #[test]
    fn unsupported_format_message_names_the_combination() {
        let err = PlayerError::UnsupportedFormat {
            channels: 3,
            bits_per_sample: 16,
        };
        assert_eq!(
            err.to_string(),
            "unsupported format: 3 channel(s), 16 bits per sample"
        );
    }
}
