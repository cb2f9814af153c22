use std::fmt;

use rusqlite::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Which uniqueness rule a conflicting write tripped over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Email,
    Phone,
    Domain,
    Section,
    PrimaryKey,
    Other,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConflictKind::Email => "email",
            ConflictKind::Phone => "phone",
            ConflictKind::Domain => "domain",
            ConflictKind::Section => "section",
            ConflictKind::PrimaryKey => "primary key",
            ConflictKind::Other => "record",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Conflict { kind: ConflictKind, message: String },

    #[error("{0}")]
    Precondition(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("{0}")]
    Infrastructure(String),

    #[error("{context}: {source}")]
    Db {
        context: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Classifies a raw SQLite error into the crate taxonomy. Authorizer
    /// denials and constraint violations become typed errors; everything
    /// else stays an infrastructure-level database error with context.
    pub fn db(context: impl Into<String>, source: rusqlite::Error) -> Self {
        match source.sqlite_error_code() {
            Some(ErrorCode::AuthorizationForStatementDenied) => {
                Error::Authorization(source.to_string())
            }
            Some(ErrorCode::ConstraintViolation) => classify_constraint(context.into(), source),
            _ => Error::Db {
                context: context.into(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

fn classify_constraint(context: String, source: rusqlite::Error) -> Error {
    let message = source.to_string();
    if message.contains("CHECK constraint failed") {
        if message.contains("check_section_year") {
            return Error::Validation(
                "school year must use the YYYY/YYYY format".to_string(),
            );
        }
        return Error::Validation(message);
    }
    if message.contains("UNIQUE constraint failed") {
        let kind = if message.contains(".email") {
            ConflictKind::Email
        } else if message.contains(".phone") {
            ConflictKind::Phone
        } else if message.contains(".domain") {
            ConflictKind::Domain
        } else if message.contains("sections.") {
            ConflictKind::Section
        } else if message.ends_with(".id") {
            ConflictKind::PrimaryKey
        } else {
            ConflictKind::Other
        };
        let message = match kind {
            ConflictKind::Email => "an account with this email already exists".to_string(),
            ConflictKind::Phone => "this phone number is already in use".to_string(),
            ConflictKind::Domain => "this domain is already registered".to_string(),
            ConflictKind::Section => {
                "a section with this class, code and year already exists".to_string()
            }
            ConflictKind::PrimaryKey => "a record with this id already exists".to_string(),
            ConflictKind::Other => message,
        };
        return Error::Conflict { kind, message };
    }
    Error::Db {
        context,
        source,
    }
}

/// Attaches query context while routing through the classifier.
pub(crate) trait DbResultExt<T> {
    fn ctx(self, context: &str) -> Result<T>;
}

impl<T> DbResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn ctx(self, context: &str) -> Result<T> {
        self.map_err(|e| Error::db(context, e))
    }
}
