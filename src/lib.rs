//! Synchronous SQLite execution core.
//!
//! A [`Database`] owns one engine connection and composes prepared
//! [`Statement`]s, forward-only [`ResultSet`] cursors, a transaction state
//! machine and engine callbacks (trace, authorizer, scalar functions,
//! interruption) into a small safe API.
//!
//! ```
//! use stepsqlite::{params, Database, Value};
//!
//! let db = Database::open_in_memory()?;
//! db.execute_batch("create table foo(b text); insert into foo values ('x');", ())?;
//! let value = db.get_first_value("select b from foo where b = ?", params!["x"])?;
//! assert_eq!(value, Some(Value::from("x")));
//! # Ok::<(), stepsqlite::Error>(())
//! ```

mod callbacks;
mod config;
mod connection;
mod conversion;
mod cursor;
mod errors;
mod exceptions;
mod parameters;
mod statement;
mod transaction;
mod types;
mod utils;

pub use callbacks::{AuthorizerRequest, FunctionContext};
pub use config::DatabaseConfig;
pub use connection::{Database, InterruptHandle};
pub use cursor::ResultSet;
pub use exceptions::{Error, Result};
pub use parameters::{BindSet, Param, Params};
pub use statement::Statement;
pub use types::{Authorization, Blob, ColumnInfo, Row, TransactionMode, TransactionState, Value};

/// Authorizer action codes, passed through from the engine.
pub mod action {
    pub use libsqlite3_sys::{
        SQLITE_DELETE, SQLITE_FUNCTION, SQLITE_INSERT, SQLITE_PRAGMA, SQLITE_READ,
        SQLITE_SELECT, SQLITE_TRANSACTION, SQLITE_UPDATE,
    };
}
