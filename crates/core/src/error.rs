/// Result alias that carries the custom [`ChromaError`] type.
pub type Result<T> = std::result::Result<T, ChromaError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ChromaError {
    /// Free-form failure surfaced to the command line as-is.
    #[error("{0}")]
    Message(String),
    /// A caller broke a precondition (negative time step, negative duration,
    /// malformed configuration). The call was aborted without side effects.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A note name such as `C#4` could not be parsed.
    #[error("cannot parse note `{0}`")]
    NoteParse(String),
    /// The other end of the event relay channel is gone.
    #[error("{0} channel is disconnected")]
    Disconnected(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or script (de)serialisation failure.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// The spectral analysis backend rejected a buffer.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl ChromaError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for ChromaError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ChromaError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
