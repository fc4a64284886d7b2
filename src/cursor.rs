//! Forward-only result cursor over a statement.

use std::ops::{Deref, DerefMut};

use crate::exceptions::{Error, Result};
use crate::statement::Statement;
use crate::types::Row;

enum Source<'s, 'db> {
    /// Created by `Database::query`; the statement dies with the cursor.
    Owned(Statement<'db>),
    /// Created by `Statement::execute`; closing only rewinds the statement.
    Borrowed(&'s mut Statement<'db>),
}

impl<'db> Deref for Source<'_, 'db> {
    type Target = Statement<'db>;

    fn deref(&self) -> &Self::Target {
        match self {
            Source::Owned(stmt) => stmt,
            Source::Borrowed(stmt) => stmt,
        }
    }
}

impl DerefMut for Source<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Source::Owned(stmt) => stmt,
            Source::Borrowed(stmt) => stmt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Open,
    Exhausted,
    Closed,
}

/// A single-pass view over a statement's rows.
///
/// Exhaustion is not an error: once the last row has been read, every
/// further [`next`](Self::next) returns `Ok(None)` without touching the
/// engine again. Re-reading requires executing the statement again.
/// The cursor closes itself when dropped.
pub struct ResultSet<'s, 'db> {
    stmt: Source<'s, 'db>,
    state: CursorState,
}

impl<'s, 'db> ResultSet<'s, 'db> {
    pub(crate) fn borrowed(stmt: &'s mut Statement<'db>) -> Self {
        ResultSet {
            stmt: Source::Borrowed(stmt),
            state: CursorState::Open,
        }
    }

    pub(crate) fn owned(stmt: Statement<'db>) -> Self {
        ResultSet {
            stmt: Source::Owned(stmt),
            state: CursorState::Open,
        }
    }

    /// Next row in the connection's current row shape, or `None` when the
    /// results are exhausted. A failing step closes the cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Row>> {
        match self.state {
            CursorState::Closed => return Err(Error::Misuse("cannot use a closed result set")),
            CursorState::Exhausted => return Ok(None),
            CursorState::Open => {}
        }
        match self.stmt.step() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.state = CursorState::Exhausted;
                Ok(None)
            }
            Err(err) => {
                self.close()?;
                Err(err)
            }
        }
    }

    /// Column names of the underlying statement.
    pub fn columns(&self) -> &[String] {
        self.stmt.columns()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    /// Release the statement. Safe to call any number of times, before or
    /// after exhaustion.
    pub fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.state = CursorState::Closed;
        if self.stmt.is_closed() {
            return Ok(());
        }
        match &mut self.stmt {
            Source::Owned(stmt) => stmt.close(),
            Source::Borrowed(stmt) => stmt.reset(),
        }
    }
}

impl Drop for ResultSet<'_, '_> {
    fn drop(&mut self) {
        // Errors cannot surface from drop; close only fails on misuse.
        let _ = self.close();
    }
}

impl std::fmt::Debug for ResultSet<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("statement", &*self.stmt)
            .field("state", &self.state)
            .finish()
    }
}
