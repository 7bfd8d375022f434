use thiserror::Error;

/// Main error type for the clip-compositor library
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Clip error: {0}")]
    Clip(#[from] ClipError),

    #[error("Composition error: {0}")]
    Composition(#[from] CompositionError),

    #[error("Frame reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Audio processing error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by clip construction and time-indexed access
#[derive(Error, Debug)]
pub enum ClipError {
    #[error("Time {t:.4}s is outside of the clip (duration {duration:?})")]
    TimeOutOfRange { t: f64, duration: Option<f64> },

    #[error("Invalid range [{start}, {end:?}) for a clip of duration {duration:?}")]
    InvalidRange {
        start: f64,
        end: Option<f64>,
        duration: Option<f64>,
    },

    #[error("Clip assigned as a mask is not tagged as a mask")]
    NotAMask,

    #[error("{operation} requires the clip to have a duration")]
    MissingDuration { operation: String },

    #[error("{operation} requires an fps, either on the clip or as an argument")]
    MissingFps { operation: String },

    #[error("Frame computation failed: {reason}")]
    FrameFailed { reason: String },
}

/// Errors raised while building compositions. These are always raised at
/// construction time, never deferred to render time.
#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("Clip #{index} has size {found:?} but the chain requires {expected:?}")]
    SizeMismatch {
        index: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("Invalid clip grid: {reason}")]
    InvalidGrid { reason: String },

    #[error("{operation} needs at least one clip")]
    Empty { operation: String },
}

/// Errors raised by the subprocess-backed frame reader
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Failed to start decoder '{binary}': {reason}")]
    SpawnFailed { binary: String, reason: String },

    #[error("Failed to read the first frame of '{path}'; the file may be corrupted or the decoder unusable")]
    FirstFrameFailed { path: String },

    #[error("No video stream found in '{path}'")]
    NoVideoStream { path: String },

    #[error("Decoder stream is not open")]
    StreamClosed,
}

/// Errors raised while probing a media file
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Media file not found: {path}")]
    NotFound { path: String },

    #[error("'{path}' is a directory")]
    IsDirectory { path: String },

    #[error("Probe process failed: {reason}")]
    ProcessFailed { reason: String },

    #[error("Failed to read the duration of '{path}'")]
    MissingDuration { path: String },

    #[error("Malformed duration in line: {line}")]
    InvalidDuration { line: String },

    #[error("Failed to read the video dimensions of '{path}'")]
    MissingVideoSize { path: String },

    #[error("Failed to read the frame rate of '{path}'")]
    MissingFrameRate { path: String },
}

/// Errors raised while writing clips out
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Video encoding failed: {reason}")]
    EncodingFailed { reason: String },

    #[error("No codec known for extension '{extension}', pass one explicitly")]
    UnknownCodec { extension: String },

    #[error("Name format '{format}' has no %d placeholder")]
    InvalidNameFormat { format: String },
}

/// Audio-specific errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to load audio file: {path}")]
    LoadFailed { path: String },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Invalid audio parameters: {details}")]
    InvalidParameters { details: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("{binary} binary not usable at '{path}'")]
    BinaryNotFound { binary: String, path: String },
}

/// Convenience type alias for Results using CompositorError
pub type Result<T> = std::result::Result<T, CompositorError>;

impl CompositorError {
    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            // A fresh decoder process may succeed where the last one died
            Self::Reader(ReaderError::SpawnFailed { .. }) => true,
            Self::Reader(ReaderError::StreamClosed) => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(ConfigError::BinaryNotFound { binary, path }) => {
                format!(
                    "Could not run {} at '{}'. Install it or point the configuration at the right binary.",
                    binary, path
                )
            }
            Self::Reader(ReaderError::FirstFrameFailed { path }) => {
                format!(
                    "Could not decode any frame of '{}'. The file may be corrupted or use a format the installed ffmpeg cannot read.",
                    path
                )
            }
            Self::Probe(ProbeError::NotFound { path }) => {
                format!("Media file '{}' not found.", path)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
