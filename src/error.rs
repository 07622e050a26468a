use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoadError>;

/// Every failure aborts the run, there is no local recovery.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The store is unreachable, the credentials were rejected, or the
    /// connection dropped mid-load.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    /// Source data does not fit the inferred or target schema.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("invalid table name {0:?}")]
    InvalidTableName(String),

    #[error("database error: {0}")]
    Database(String),
}

impl LoadError {
    pub fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> LoadError {
        LoadError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn download(url: &str, err: impl std::fmt::Display) -> LoadError {
        LoadError::Download {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<duckdb::Error> for LoadError {
    fn from(e: duckdb::Error) -> Self {
        LoadError::Database(e.to_string())
    }
}

impl From<postgres::Error> for LoadError {
    fn from(e: postgres::Error) -> Self {
        use postgres::error::SqlState;

        if e.is_closed() {
            return LoadError::Connection(e.to_string());
        }
        match e.code() {
            Some(code)
                if *code == SqlState::DATATYPE_MISMATCH
                    || code.code().starts_with("22") =>
            {
                LoadError::Schema(e.to_string())
            }
            Some(code)
                if code.code().starts_with("08")
                    || code.code().starts_with("28")
                    || *code == SqlState::INVALID_CATALOG_NAME =>
            {
                LoadError::Connection(e.to_string())
            }
            _ => LoadError::Database(e.to_string()),
        }
    }
}
