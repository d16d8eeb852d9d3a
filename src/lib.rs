pub mod config;
pub mod detector;
pub mod diagnostics;
pub mod document;
pub mod extractor;
pub mod locator;
pub mod notify;
pub mod pipeline;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
