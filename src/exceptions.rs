//! Error taxonomy exposed by the crate.

use thiserror::Error;

use crate::errors::render_sql_error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure surfaced by a [`Database`](crate::Database), its statements
/// or its cursors.
#[derive(Debug, Error)]
pub enum Error {
    /// SQL-level failure: parse/resolve errors at prepare time, transaction
    /// nesting violations and other `SQLITE_ERROR` results.
    ///
    /// When raised by `prepare`, `sql` carries the statement text and
    /// `offset` the byte position the engine blamed, if it reported one.
    #[error("{}", render_sql_error(.message, .sql, .offset))]
    Sql {
        code: i32,
        message: String,
        sql: Option<String>,
        offset: Option<usize>,
    },

    /// A constraint failed. Under `OR ROLLBACK` the engine has already ended
    /// the surrounding transaction.
    #[error("{message}")]
    Constraint { code: i32, message: String },

    /// The authorizer denied an operation.
    #[error("{message}")]
    Authorization { code: i32, message: String },

    /// The statement was aborted by [`Database::interrupt`](crate::Database::interrupt).
    #[error("{message}")]
    Interrupt { code: i32, message: String },

    /// Parameter count, name or index mismatch.
    #[error("{0}")]
    Binding(String),

    /// A bind argument whose shape cannot be turned into a scalar.
    #[error("unsupported bind value kind: {kind}")]
    UnsupportedType { kind: &'static str },

    /// A custom SQL function returned an error or panicked.
    #[error("error in function {name}: {source}")]
    Function {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Host-side failure with a free-form message, for callbacks that have
    /// no better variant to report.
    #[error("{0}")]
    User(String),

    /// Any other non-success engine status.
    #[error("{message}")]
    Engine { code: i32, message: String },

    /// Use of a closed database, statement or result set.
    #[error("{0}")]
    Misuse(&'static str),

    #[error("invalid database path: {0}")]
    InvalidPath(String),

    #[error("{what} contains a nul byte")]
    Nul { what: &'static str },
}

impl Error {
    /// Numeric engine status code, when the error came from the engine.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Sql { code, .. }
            | Error::Constraint { code, .. }
            | Error::Authorization { code, .. }
            | Error::Interrupt { code, .. }
            | Error::Engine { code, .. } => Some(*code),
            Error::Function { source, .. } => source.code(),
            Error::Misuse(_) => Some(libsqlite3_sys::SQLITE_MISUSE),
            Error::Binding(_) => Some(libsqlite3_sys::SQLITE_RANGE),
            _ => None,
        }
    }

    /// Byte offset into the SQL text blamed by a prepare failure.
    pub fn sql_offset(&self) -> Option<usize> {
        match self {
            Error::Sql { offset, .. } => *offset,
            _ => None,
        }
    }

    /// The engine message without the rendered SQL excerpt.
    pub fn engine_message(&self) -> Option<&str> {
        match self {
            Error::Sql { message, .. }
            | Error::Constraint { message, .. }
            | Error::Authorization { message, .. }
            | Error::Interrupt { message, .. }
            | Error::Engine { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.code(), Some(code) if code & 0xff == libsqlite3_sys::SQLITE_BUSY
            || code & 0xff == libsqlite3_sys::SQLITE_LOCKED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_error_reports_inner_code() {
        let err = Error::Function {
            name: "munge".to_string(),
            source: Box::new(Error::Constraint {
                code: libsqlite3_sys::SQLITE_CONSTRAINT,
                message: "CHECK constraint failed".to_string(),
            }),
        };
        assert_eq!(err.code(), Some(libsqlite3_sys::SQLITE_CONSTRAINT));
        assert_eq!(
            err.to_string(),
            "error in function munge: CHECK constraint failed"
        );
    }

    #[test]
    fn busy_detection_masks_extended_codes() {
        let err = Error::Engine {
            code: libsqlite3_sys::SQLITE_BUSY_SNAPSHOT,
            message: "database is locked".to_string(),
        };
        assert!(err.is_busy());
        assert!(!Error::Misuse("closed").is_busy());
    }
}
