use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Completion provider error: {0}")]
    Provider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    /// The automation backend rejected or failed an action. Recoverable:
    /// the executor reports it back into the conversation.
    #[error("Desktop backend error: {0}")]
    Backend(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Session cancelled")]
    Cancelled,
}

impl PilotError {
    /// Transport-level failures abort the whole loop; everything else is
    /// reported back into the conversation so the model can self-correct.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PilotError::Backend(_) | PilotError::Agent(_))
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
