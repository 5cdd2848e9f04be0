//! Error taxonomy shared by the price pipeline

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// No registered price source matches the category label.
    #[error("No price source supports category '{0}'")]
    UnsupportedCategory(String),

    /// The provider explicitly reported the instrument as unknown or invalid.
    #[error("Instrument {code} not found: {reason}")]
    InstrumentNotFound { code: String, reason: String },

    /// Network, timeout, status or parse failure while talking to a provider.
    #[error("Price source unavailable for {code}: {reason}")]
    SourceUnavailable { code: String, reason: String },

    #[error("Cache store unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(code: &str, reason: impl Into<String>) -> Self {
        Error::InstrumentNotFound {
            code: code.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(code: &str, reason: impl Into<String>) -> Self {
        Error::SourceUnavailable {
            code: code.to_string(),
            reason: reason.into(),
        }
    }

    /// Faults of our own infrastructure rather than an expected business outcome.
    pub fn is_system_fault(&self) -> bool {
        matches!(self, Error::CacheUnavailable(_) | Error::Persistence(_))
    }
}

impl From<fjall::Error> for Error {
    fn from(err: fjall::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Persistence(format!("Corrupt record: {err}"))
    }
}
