/// Result alias that carries the custom [`SpectraError`] type.
pub type Result<T> = std::result::Result<T, SpectraError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SpectraError {
    /// The PCM source cannot deliver audio any more (or never could).
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(SourceFault),
    /// Invalid configuration detected at session start.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// Misuse of one of the direct analysis APIs.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
    /// Free-form message, mostly used for thread and channel failures.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

/// Why a source stopped producing samples.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceFault {
    #[error("end of stream")]
    EndOfStream,
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("failed to open source: {0}")]
    OpenFailed(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl SpectraError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    /// Shorthand for a [`SourceFault::OpenFailed`] error.
    pub fn open_failed<T: ToString>(reason: T) -> Self {
        Self::SourceUnavailable(SourceFault::OpenFailed(reason.to_string()))
    }

    /// Returns true for conditions the session absorbs by going idle
    /// instead of surfacing them to the caller.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SourceUnavailable(fault) => fault.is_recoverable(),
            _ => false,
        }
    }
}

impl SourceFault {
    /// Everything except a failed open happens mid-stream and is absorbed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::OpenFailed(_))
    }
}

impl From<SourceFault> for SpectraError {
    fn from(value: SourceFault) -> Self {
        Self::SourceUnavailable(value)
    }
}

impl From<&str> for SpectraError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SpectraError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
