//! Prepared statement handle.

use std::cell::Cell;
use std::ffi::{c_char, c_int};
use std::ptr;
use std::rc::Rc;

use libsqlite3_sys::{
    sqlite3_bind_parameter_count, sqlite3_bind_parameter_index, sqlite3_clear_bindings,
    sqlite3_column_count, sqlite3_column_decltype, sqlite3_column_name, sqlite3_finalize,
    sqlite3_prepare_v2, sqlite3_reset, sqlite3_step, sqlite3_stmt, SQLITE_DONE, SQLITE_OK,
    SQLITE_ROW, SQLITE_TOOBIG,
};
use tracing::{debug, trace};

use crate::connection::Database;
use crate::conversion::{bind_value, column_value};
use crate::cursor::ResultSet;
use crate::errors::{error_from_code, error_from_handle, prepare_error};
use crate::exceptions::{Error, Result};
use crate::parameters::{BindSet, Params};
use crate::types::{Row, Value};
use crate::utils::{cstr_to_string, to_cstring};

/// The native statement, shared between its [`Statement`] and the owning
/// connection's registry so `close` can finalize statements left open.
pub(crate) struct RawStatement {
    ptr: *mut sqlite3_stmt,
    finalized: Cell<bool>,
}

impl RawStatement {
    /// Idempotent; later calls are no-ops.
    pub(crate) fn finalize(&self) -> c_int {
        if self.finalized.replace(true) || self.ptr.is_null() {
            return SQLITE_OK;
        }
        // Safety: ptr came from sqlite3_prepare_v2 and is finalized only here.
        unsafe { sqlite3_finalize(self.ptr) }
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized.get()
    }
}

/// One prepared statement on a [`Database`].
///
/// Lifecycle: prepared, then any number of bind/step/reset rounds, then
/// closed. Closing is idempotent and also happens on drop.
pub struct Statement<'db> {
    db: &'db Database,
    raw: Rc<RawStatement>,
    sql: String,
    remainder: String,
    columns: Vec<String>,
    done: bool,
    running: bool,
}

impl<'db> Statement<'db> {
    /// Compile the first statement in `sql`. Any text after it is kept as
    /// [`remainder`](Self::remainder).
    pub(crate) fn prepare(db: &'db Database, sql: &str) -> Result<Self> {
        let handle = db.handle()?;
        let len = c_int::try_from(sql.len())
            .map_err(|_| error_from_code(SQLITE_TOOBIG, "SQL text is too long".to_string()))?;

        let mut stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        // Safety: handle is open; sql is valid for len bytes; tail receives a
        // pointer into sql.
        let rc = {
            let _busy = db.enter_step();
            unsafe { sqlite3_prepare_v2(handle, sql.as_ptr().cast(), len, &mut stmt, &mut tail) }
        };
        if rc != SQLITE_OK {
            db.take_callback_error();
            let err = prepare_error(handle, rc, sql);
            debug!(sql, error = %err, "prepare failed");
            return Err(err);
        }

        let consumed = if tail.is_null() {
            sql.len()
        } else {
            (tail as usize).saturating_sub(sql.as_ptr() as usize)
        };
        let remainder = sql.get(consumed..).unwrap_or_default().to_string();

        let columns = if stmt.is_null() {
            Vec::new()
        } else {
            // Safety: stmt is a freshly prepared statement.
            unsafe {
                (0..sqlite3_column_count(stmt))
                    .map(|i| cstr_to_string(sqlite3_column_name(stmt, i)).unwrap_or_default())
                    .collect()
            }
        };

        let raw = Rc::new(RawStatement {
            ptr: stmt,
            finalized: Cell::new(false),
        });
        db.register_statement(&raw);
        let sql = sql.get(..consumed).unwrap_or(sql).trim().to_string();
        debug!(sql = %sql, "prepared statement");

        Ok(Statement {
            db,
            raw,
            sql,
            remainder,
            columns,
            done: false,
            running: false,
        })
    }

    fn live_ptr(&self) -> Result<*mut sqlite3_stmt> {
        if self.raw.is_finalized() {
            return Err(Error::Misuse("cannot use a closed statement"));
        }
        Ok(self.raw.ptr)
    }

    /// The SQL text of this statement.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// SQL text following the first statement, not compiled.
    pub fn remainder(&self) -> &str {
        &self.remainder
    }

    /// True when the source held no statement (only whitespace or comments).
    pub fn is_empty(&self) -> bool {
        self.raw.ptr.is_null()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Declared type of each result column, `None` for expressions.
    pub fn types(&self) -> Result<Vec<Option<String>>> {
        let stmt = self.live_ptr()?;
        if stmt.is_null() {
            return Ok(Vec::new());
        }
        let count = c_int::try_from(self.columns.len()).unwrap_or(c_int::MAX);
        // Safety: stmt is live; decltype strings are copied immediately.
        Ok((0..count)
            .map(|i| unsafe { cstr_to_string(sqlite3_column_decltype(stmt, i)) })
            .collect())
    }

    pub fn bind_parameter_count(&self) -> usize {
        if self.raw.ptr.is_null() || self.raw.is_finalized() {
            return 0;
        }
        // Safety: ptr is live.
        let count = unsafe { sqlite3_bind_parameter_count(self.raw.ptr) };
        usize::try_from(count).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.raw.is_finalized()
    }

    /// True once stepping has returned the last row.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Rewind so the statement can run again; bindings are kept.
    pub fn reset(&mut self) -> Result<()> {
        let stmt = self.live_ptr()?;
        if !stmt.is_null() {
            // The return value repeats the last step's error, already reported.
            // Safety: stmt is live.
            unsafe { sqlite3_reset(stmt) };
        }
        self.done = false;
        self.running = false;
        Ok(())
    }

    /// Set every parameter back to NULL.
    pub fn clear_bindings(&mut self) -> Result<()> {
        let stmt = self.live_ptr()?;
        if !stmt.is_null() {
            // Safety: stmt is live.
            unsafe { sqlite3_clear_bindings(stmt) };
        }
        Ok(())
    }

    fn rewind_if_running(&mut self) -> Result<()> {
        if self.running {
            self.reset()?;
        }
        Ok(())
    }

    /// Bind `value` to the 1-based placeholder `index`.
    pub fn bind_index(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let stmt = self.live_ptr()?;
        self.rewind_if_running()?;
        let position = match c_int::try_from(index) {
            Ok(position) if position > 0 && index <= self.bind_parameter_count() => position,
            _ => {
                return Err(Error::Binding(format!(
                    "bind index {index} out of range (statement has {} parameters)",
                    self.bind_parameter_count()
                )))
            }
        };
        // Safety: stmt is live and reset; position is in range.
        let rc = unsafe { bind_value(stmt, position, &value.into()) };
        if rc != SQLITE_OK {
            return Err(error_from_handle(self.db.handle()?, rc));
        }
        Ok(())
    }

    /// Bind `value` to the placeholder called `name`. A name without a
    /// `:`, `@` or `$` prefix matches any of them.
    pub fn bind_name(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.resolve_name(name)?;
        self.bind_index(index, value)
    }

    fn resolve_name(&self, name: &str) -> Result<usize> {
        self.parameter_index(name)?
            .ok_or_else(|| Error::Binding(format!("no such bind parameter: {name}")))
    }

    fn parameter_index(&self, name: &str) -> Result<Option<usize>> {
        let stmt = self.live_ptr()?;
        if stmt.is_null() {
            return Ok(None);
        }
        let candidates: Vec<String> = if name.starts_with([':', '@', '$', '?']) {
            vec![name.to_string()]
        } else {
            [':', '@', '$'].iter().map(|p| format!("{p}{name}")).collect()
        };
        for candidate in candidates {
            let c_name = to_cstring(&candidate, "parameter name")?;
            // Safety: stmt is live; c_name is NUL-terminated.
            let index = unsafe { sqlite3_bind_parameter_index(stmt, c_name.as_ptr()) };
            if index > 0 {
                return Ok(usize::try_from(index).ok());
            }
        }
        Ok(None)
    }

    /// Normalize and bind a whole parameter list.
    pub fn bind_params(&mut self, params: impl Into<Params>) -> Result<()> {
        let set = params.into().normalize()?;
        self.bind(&set)
    }

    /// Bind an already normalized set.
    ///
    /// Positional sets must match the placeholder count exactly; named sets
    /// must only use names the statement declares. A rejected set binds
    /// nothing, and an empty set leaves the current bindings untouched.
    pub fn bind(&mut self, set: &BindSet) -> Result<()> {
        match set {
            BindSet::Empty => Ok(()),
            BindSet::Positional(values) => {
                let expected = self.bind_parameter_count();
                if values.len() != expected {
                    return Err(Error::Binding(format!(
                        "wrong number of bind parameters: expected {expected}, got {}",
                        values.len()
                    )));
                }
                for (i, value) in values.iter().enumerate() {
                    self.bind_index(i + 1, value.clone())?;
                }
                Ok(())
            }
            BindSet::Named(pairs) => {
                // Resolve every name first so an unknown one binds nothing.
                let indexes = pairs
                    .iter()
                    .map(|(name, _)| self.resolve_name(name))
                    .collect::<Result<Vec<_>>>()?;
                for (index, (_, value)) in indexes.into_iter().zip(pairs) {
                    self.bind_index(index, value.clone())?;
                }
                Ok(())
            }
        }
    }

    /// Advance to the next row, returning its values in column order, or
    /// `None` once the statement is done.
    ///
    /// On failure the statement is reset and the error is returned as
    /// observed; a host function error takes precedence over the generic
    /// engine message it produced.
    pub(crate) fn step_values(&mut self) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        let stmt = self.live_ptr()?;
        if stmt.is_null() {
            self.done = true;
            return Ok(None);
        }
        self.running = true;
        // Safety: stmt is live. Callbacks may re-enter the connection through
        // other statements; none of them touch this one.
        let rc = {
            let _busy = self.db.enter_step();
            unsafe { sqlite3_step(stmt) }
        };
        match rc {
            SQLITE_ROW => {
                let count = c_int::try_from(self.columns.len()).unwrap_or(c_int::MAX);
                // Safety: stmt is positioned on a row.
                let values = (0..count).map(|i| unsafe { column_value(stmt, i) }).collect();
                trace!(sql = %self.sql, "row");
                Ok(Some(values))
            }
            SQLITE_DONE => {
                self.done = true;
                Ok(None)
            }
            _ => {
                let err = self.db.step_error(rc);
                // Safety: stmt is live; reset clears the failed run.
                unsafe { sqlite3_reset(stmt) };
                self.running = false;
                debug!(sql = %self.sql, error = %err, "step failed");
                Err(err)
            }
        }
    }

    /// Advance and materialize the next row in the connection's current
    /// row shape.
    pub fn step(&mut self) -> Result<Option<Row>> {
        Ok(self.step_values()?.map(|values| self.build_row(values)))
    }

    fn build_row(&self, values: Vec<Value>) -> Row {
        if self.db.results_as_hash() {
            Row::Named(self.columns.iter().cloned().zip(values).collect())
        } else {
            Row::Values(values)
        }
    }

    /// Rewind, bind `params` and return a cursor over the results.
    pub fn execute(&mut self, params: impl Into<Params>) -> Result<ResultSet<'_, 'db>> {
        self.rearm(params.into())?;
        Ok(ResultSet::borrowed(self))
    }

    /// Like [`execute`](Self::execute) but hands ownership of the statement
    /// to the cursor, which finalizes it when closed.
    pub(crate) fn into_result_set(mut self, params: Params) -> Result<ResultSet<'db, 'db>> {
        self.rearm(params)?;
        Ok(ResultSet::owned(self))
    }

    fn rearm(&mut self, params: Params) -> Result<()> {
        let set = params.normalize()?;
        self.reset()?;
        self.bind(&set)
    }

    /// Run to completion, discarding rows.
    pub(crate) fn run(&mut self) -> Result<()> {
        while self.step_values()?.is_some() {}
        Ok(())
    }

    /// Finalize the native statement. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        // A non-OK code only repeats the last step's error.
        self.raw.finalize();
        self.done = true;
        self.running = false;
        Ok(())
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        self.raw.finalize();
    }
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("columns", &self.columns)
            .field("closed", &self.is_closed())
            .finish()
    }
}
