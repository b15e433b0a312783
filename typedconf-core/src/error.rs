use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("source configuration error: {0}")]
    SourceConfig(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("value for field '{0}' fails validation")]
    FailedValidation(String),

    #[error("bad validation rule for field '{field}': {reason}")]
    BadValidator { field: String, reason: String },

    #[error("missing {} required configuration field(s): {}", .0.len(), .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("cannot double register configuration type '{0}'")]
    DoubleRegistration(&'static str),

    #[error("configuration type '{0}' is not registered")]
    NotRegistered(&'static str),

    #[error("source '{0}' queried before schema fields were provided")]
    PrematureAccess(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Prefixes value errors with the field they belong to, leaving the
    /// invalid-value / type-mismatch distinction intact.
    pub(crate) fn for_field(self, field: &str) -> Error {
        match self {
            Error::InvalidValue(msg) => Error::InvalidValue(format!("field '{field}': {msg}")),
            Error::TypeMismatch(msg) => Error::TypeMismatch(format!("field '{field}': {msg}")),
            other => other,
        }
    }
}
