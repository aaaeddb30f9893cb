use thiserror::Error;

/// Input rejected before any aggregation or persistence happens.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("OCR result has {words} words but {confidences} confidence values")]
    LengthMismatch { words: usize, confidences: usize },

    #[error("word confidence {value} at index {index} is outside [-1, 100]")]
    ConfidenceOutOfRange { index: usize, value: i32 },

    #[error("line score {score} (page {page}, line {line}) is outside [0, 1]")]
    ScoreOutOfRange { page: usize, line: usize, score: f64 },

    #[error("timing value {0} is not a finite number of seconds")]
    InvalidTiming(f64),

    #[error("no user id in session context; refusing to store an unattributed invoice")]
    MissingUser,

    #[error("unsupported document: {0}")]
    UnsupportedFile(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("database connection lock poisoned")]
    LockPoisoned,

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid base64 attachment: {0}")]
    Decode(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;
