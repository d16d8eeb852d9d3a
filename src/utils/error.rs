use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Browser session could not be established or authenticated. This is the
    /// only error class that should abort a run before any snapshot write.
    #[error("Session error: {0}")]
    Session(String),

    #[error("Stale or non-interactable element: {target}: {message}")]
    Interaction { target: String, message: String },

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
