use std::fmt;

use thiserror::Error;

use crate::models::EntryKey;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("entry not found: {key}")]
    NotFound { key: EntryKey },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("storage failure: corrupt record: {0}")]
    CorruptRecord(String),
}

impl TrackerError {
    pub fn not_found(key: &EntryKey) -> Self {
        TrackerError::NotFound { key: key.clone() }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        TrackerError::InvalidArgument(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackerError::NotFound { .. } => ErrorKind::NotFound,
            TrackerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            TrackerError::Conflict(_) => ErrorKind::Conflict,
            TrackerError::Storage(_) | TrackerError::CorruptRecord(_) => {
                ErrorKind::StorageFailure
            }
        }
    }
}

// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Conflict,
    StorageFailure,
}

impl ErrorKind {
    /// Stable code identifier for machine parsing.
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "E1001",
            ErrorKind::NotFound => "E2001",
            ErrorKind::Conflict => "E2002",
            ErrorKind::StorageFailure => "E5001",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique() {
        let all = [
            ErrorKind::NotFound,
            ErrorKind::InvalidArgument,
            ErrorKind::Conflict,
            ErrorKind::StorageFailure,
        ];
        let codes: HashSet<_> = all.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn storage_errors_classify_as_storage_failure() {
        let err = TrackerError::from(rusqlite::Error::InvalidQuery);
        assert_eq!(err.kind(), ErrorKind::StorageFailure);

        let err = TrackerError::CorruptRecord("bad stage".into());
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
    }

    #[test]
    fn not_found_names_the_key() {
        let key = EntryKey::new("ana", "blind75", "42").unwrap();
        let err = TrackerError::not_found(&key);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("ana/blind75/42"));
    }
}
