use thiserror::Error;

#[derive(Error, Debug)]
pub enum PkiError {
    #[error("Certificate not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Certificate {serial} revoked but CRL rebuild failed: {source}")]
    CrlStale {
        serial: String,
        source: Box<PkiError>,
    },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Certificate parsing error: {0}")]
    CertParsing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<der::Error> for PkiError {
    fn from(err: der::Error) -> Self {
        PkiError::Encoding(err.to_string())
    }
}

impl From<crate::cert::serial::SerialNumberParseError> for PkiError {
    fn from(err: crate::cert::serial::SerialNumberParseError) -> Self {
        PkiError::InvalidInput(format!("Invalid serial number: {err}"))
    }
}

impl PkiError {
    /// Whether the error came from the backing store rather than from the request
    pub fn is_storage(&self) -> bool {
        matches!(self, PkiError::Storage(_) | PkiError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, PkiError>;
