//! Transaction control.
//!
//! The engine is the source of truth: whether a transaction is open is read
//! from its autocommit flag on every call, so a transaction the engine ended
//! on its own (`INSERT OR ROLLBACK` hitting a constraint) is observed at once.

use libsqlite3_sys::{sqlite3_get_autocommit, SQLITE_ERROR};
use tracing::{debug, warn};

use crate::connection::Database;
use crate::exceptions::{Error, Result};
use crate::types::{TransactionMode, TransactionState};

fn nesting_error(message: &str) -> Error {
    Error::Sql {
        code: SQLITE_ERROR,
        message: message.to_string(),
        sql: None,
        offset: None,
    }
}

impl Database {
    pub fn transaction_state(&self) -> TransactionState {
        match self.handle() {
            // Safety: db is open.
            Ok(db) if unsafe { sqlite3_get_autocommit(db) } == 0 => TransactionState::Active,
            _ => TransactionState::None,
        }
    }

    pub fn transaction_active(&self) -> bool {
        self.transaction_state().is_active()
    }

    /// Start a transaction in the configured default mode.
    pub fn begin(&self) -> Result<()> {
        self.begin_with(self.config().default_transaction_mode)
    }

    /// Start a transaction. Fails if one is already active.
    pub fn begin_with(&self, mode: TransactionMode) -> Result<()> {
        self.handle()?;
        if self.transaction_active() {
            return Err(nesting_error("cannot start a transaction within a transaction"));
        }
        self.run_sql(mode.begin_sql())?;
        debug!(?mode, "transaction started");
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.handle()?;
        if !self.transaction_active() {
            return Err(nesting_error("cannot commit - no transaction is active"));
        }
        self.run_sql("COMMIT TRANSACTION")?;
        debug!("transaction committed");
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.handle()?;
        if !self.transaction_active() {
            return Err(nesting_error("cannot rollback - no transaction is active"));
        }
        self.run_sql("ROLLBACK TRANSACTION")?;
        debug!("transaction rolled back");
        Ok(())
    }

    /// Run `f` inside a transaction in the default mode.
    ///
    /// Commits when `f` succeeds. When `f` fails the transaction is rolled
    /// back (if the engine has not already ended it) and `f`'s error is
    /// returned. Ending the transaction from inside `f` makes the closing
    /// commit fail with a nesting error.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        self.transaction_with(self.config().default_transaction_mode, f)
    }

    pub fn transaction_with<T, F>(&self, mode: TransactionMode, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        self.begin_with(mode)?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if self.transaction_active() {
                    if let Err(rollback_err) = self.rollback() {
                        warn!(error = %rollback_err, "rollback after failed transaction block failed");
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute("create table t(a integer primary key)", ()).unwrap();
        db
    }

    #[test]
    fn begin_commit_round() {
        let db = db();
        assert_eq!(db.transaction_state(), TransactionState::None);
        db.begin().unwrap();
        assert!(db.transaction_active());
        db.commit().unwrap();
        assert!(!db.transaction_active());
    }

    #[test]
    fn begin_twice_is_a_nesting_error() {
        let db = db();
        db.begin_with(TransactionMode::Immediate).unwrap();
        let err = db.begin().unwrap_err();
        assert!(matches!(err, Error::Sql { .. }));
        assert!(err.to_string().contains("within a transaction"));
        assert!(db.transaction_active());
        db.rollback().unwrap();
    }

    #[test]
    fn commit_and_rollback_need_a_transaction() {
        let db = db();
        assert!(matches!(db.commit(), Err(Error::Sql { .. })));
        assert!(matches!(db.rollback(), Err(Error::Sql { .. })));
    }

    #[test]
    fn failed_block_rolls_back() {
        let db = db();
        let result: Result<()> = db.transaction(|db| {
            db.execute("insert into t values (1)", ())?;
            Err(Error::User("stop".into()))
        });
        assert!(matches!(result, Err(Error::User(ref m)) if m == "stop"));
        assert!(!db.transaction_active());
        assert!(db.execute("select * from t", ()).unwrap().is_empty());
    }
}
