//! The `Database` facade: one engine handle plus its statements, hooks and
//! interrupt handle.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::ffi::c_int;
use std::ptr;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};

use libsqlite3_sys::{
    sqlite3, sqlite3_changes64, sqlite3_errcode, sqlite3_errmsg,
    sqlite3_extended_result_codes, sqlite3_interrupt, sqlite3_last_insert_rowid, sqlite3_open_v2,
    sqlite3_total_changes64, SQLITE_BUSY, SQLITE_ERROR, SQLITE_MISUSE, SQLITE_OK,
    SQLITE_OPEN_CREATE, SQLITE_OPEN_READONLY, SQLITE_OPEN_READWRITE, SQLITE_OPEN_URI,
};
use tracing::{debug, warn};

// The bundled libsqlite3-sys bindings omit `sqlite3_close_v2`, but the
// bundled library exports it.
extern "C" {
    fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

use crate::callbacks::{
    install_authorizer, install_trace, register_function, unregister_function,
    AuthorizerCallback, AuthorizerRequest, FunctionContext, FunctionSlot, PendingError,
    TraceCallback,
};
use crate::config::DatabaseConfig;
use crate::cursor::ResultSet;
use crate::errors::{error_from_code, error_from_handle, generic_message};
use crate::exceptions::{Error, Result};
use crate::parameters::Params;
use crate::statement::{RawStatement, Statement};
use crate::types::{Authorization, ColumnInfo, Row, Value};
use crate::utils::{
    cstr_to_string, is_complete, normalize_default, quote_literal, to_cstring, validate_path,
};

struct SharedHandle(*mut sqlite3);

// Safety: the pointer is only used for sqlite3_interrupt, which the engine
// allows from any thread, and it is nulled under the lock before the
// connection closes.
unsafe impl Send for SharedHandle {}

/// Interrupts a [`Database`] from anywhere, including other threads.
///
/// Once the connection closes the handle becomes inert.
#[derive(Clone)]
pub struct InterruptHandle {
    db: Arc<Mutex<SharedHandle>>,
}

impl InterruptHandle {
    fn new(db: *mut sqlite3) -> Self {
        InterruptHandle {
            db: Arc::new(Mutex::new(SharedHandle(db))),
        }
    }

    /// Ask the engine to abort the running statement. Returns false when
    /// the connection is already closed.
    pub fn interrupt(&self) -> bool {
        let Ok(guard) = self.db.lock() else {
            return false;
        };
        if guard.0.is_null() {
            return false;
        }
        // Safety: the handle stays open while the lock is held and non-null.
        unsafe { sqlite3_interrupt(guard.0) };
        true
    }

    fn detach(&self) {
        match self.db.lock() {
            Ok(mut guard) => guard.0 = ptr::null_mut(),
            Err(poisoned) => poisoned.into_inner().0 = ptr::null_mut(),
        }
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let attached = self.db.lock().map(|g| !g.0.is_null()).unwrap_or(false);
        f.debug_struct("InterruptHandle")
            .field("attached", &attached)
            .finish()
    }
}

/// Decrements the connection's step depth when a step returns.
pub(crate) struct StepGuard<'a>(&'a Cell<u32>);

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// A single connection to an SQLite database.
///
/// All operations run on the calling thread; the type is neither `Send` nor
/// `Sync`. Callbacks may re-enter the connection (a custom function can run
/// its own queries) because every method takes `&self`.
pub struct Database {
    db: Cell<*mut sqlite3>,
    path: String,
    config: DatabaseConfig,
    results_as_hash: Cell<bool>,
    statements: RefCell<Vec<Weak<RawStatement>>>,
    trace: RefCell<Option<Box<TraceCallback>>>,
    authorizer: RefCell<Option<Box<AuthorizerCallback>>>,
    // Hooks replaced while a statement runs; released once the connection
    // is idle again.
    retired: RefCell<Vec<Box<dyn Any>>>,
    callback_error: PendingError,
    stepping: Cell<u32>,
    interrupt: InterruptHandle,
}

impl Database {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with(path, DatabaseConfig::default())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_with(":memory:", DatabaseConfig::default())
    }

    /// Open `path` with explicit options. URI filenames are accepted.
    pub fn open_with(path: &str, config: DatabaseConfig) -> Result<Self> {
        validate_path(path)?;
        let c_path = to_cstring(path, "database path")?;
        let flags = SQLITE_OPEN_URI
            | if config.readonly {
                SQLITE_OPEN_READONLY
            } else {
                SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE
            };

        let mut db = ptr::null_mut();
        // Safety: c_path is NUL-terminated; db receives the new handle.
        let rc = unsafe { sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != SQLITE_OK {
            let err = error_from_handle(db, rc);
            if !db.is_null() {
                // Safety: a handle is allocated even on failure and must be released.
                unsafe { sqlite3_close_v2(db) };
            }
            debug!(path, error = %err, "open failed");
            return Err(err);
        }
        // Safety: db was just opened.
        unsafe { sqlite3_extended_result_codes(db, 1) };
        debug!(path, readonly = config.readonly, "opened database");

        Ok(Database {
            db: Cell::new(db),
            path: path.to_string(),
            results_as_hash: Cell::new(config.results_as_hash),
            config,
            statements: RefCell::new(Vec::new()),
            trace: RefCell::new(None),
            authorizer: RefCell::new(None),
            retired: RefCell::new(Vec::new()),
            callback_error: Rc::new(RefCell::new(None)),
            stepping: Cell::new(0),
            interrupt: InterruptHandle::new(db),
        })
    }

    pub(crate) fn handle(&self) -> Result<*mut sqlite3> {
        let db = self.db.get();
        if db.is_null() {
            return Err(Error::Misuse("cannot use a closed database"));
        }
        Ok(db)
    }

    pub(crate) fn register_statement(&self, raw: &Rc<RawStatement>) {
        let mut statements = self.statements.borrow_mut();
        statements.retain(|stmt| stmt.strong_count() > 0);
        statements.push(Rc::downgrade(raw));
    }

    pub(crate) fn enter_step(&self) -> StepGuard<'_> {
        self.stepping.set(self.stepping.get() + 1);
        StepGuard(&self.stepping)
    }

    pub(crate) fn take_callback_error(&self) -> Option<Error> {
        self.callback_error.try_borrow_mut().ok()?.take()
    }

    /// Error for a failed step. A host function error parked during the step
    /// replaces the engine's generic message.
    pub(crate) fn step_error(&self, rc: c_int) -> Error {
        let pending = self.take_callback_error();
        if rc & 0xff == SQLITE_ERROR {
            if let Some(err) = pending {
                return err;
            }
        }
        match self.handle() {
            Ok(db) => error_from_handle(db, rc),
            Err(err) => err,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.db.get().is_null()
    }

    /// Whether rows are built as name/value pairs. Read at each row's
    /// construction, so changing it mid-query affects the following rows.
    pub fn results_as_hash(&self) -> bool {
        self.results_as_hash.get()
    }

    pub fn set_results_as_hash(&self, enabled: bool) {
        self.results_as_hash.set(enabled);
    }

    /// Lexical check that `sql` ends with a complete statement. Does not
    /// validate the statement.
    pub fn complete(sql: &str) -> bool {
        is_complete(sql)
    }

    /// Prepare the first statement in `sql`.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        Statement::prepare(self, sql)
    }

    /// Prepare a statement, hand it to `f` and close it afterwards whatever
    /// `f` returns.
    pub fn prepare_with<T, F>(&self, sql: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Statement<'_>) -> Result<T>,
    {
        let mut stmt = self.prepare(sql)?;
        let result = f(&mut stmt);
        stmt.close()?;
        result
    }

    /// Run the first statement in `sql` and collect its rows.
    pub fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.execute_with(sql, params, |row| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }

    /// Run the first statement in `sql`, passing each row to `f` as it is
    /// read. An error from `f` stops the statement and is returned.
    pub fn execute_with<F>(&self, sql: &str, params: impl Into<Params>, mut f: F) -> Result<()>
    where
        F: FnMut(Row) -> Result<()>,
    {
        let mut rows = self.query(sql, params)?;
        while let Some(row) = rows.next()? {
            f(row)?;
        }
        Ok(())
    }

    /// Like [`execute`](Self::execute), preceded by a row of column names.
    pub fn execute2(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.execute2_with(sql, params, |row| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }

    pub fn execute2_with<F>(&self, sql: &str, params: impl Into<Params>, mut f: F) -> Result<()>
    where
        F: FnMut(Row) -> Result<()>,
    {
        let mut rows = self.query(sql, params)?;
        let header = rows
            .columns()
            .iter()
            .map(|name| Value::Text(name.clone()))
            .collect();
        f(Row::Values(header))?;
        while let Some(row) = rows.next()? {
            f(row)?;
        }
        Ok(())
    }

    /// Run every statement in `sql` in order.
    ///
    /// `params` is bound to each statement whose placeholder count equals
    /// its length; other statements run unbound.
    pub fn execute_batch(&self, sql: &str, params: impl Into<Params>) -> Result<()> {
        let set = params.into().normalize()?;
        let mut rest = sql.to_string();
        while !rest.trim().is_empty() {
            let mut stmt = self.prepare(&rest)?;
            if !set.is_empty() && set.len() == stmt.bind_parameter_count() {
                stmt.bind(&set)?;
            }
            stmt.run()?;
            let next = stmt.remainder().to_string();
            stmt.close()?;
            if next.len() >= rest.len() {
                break;
            }
            rest = next;
        }
        Ok(())
    }

    /// Run `sql` with no parameters, discarding rows.
    pub(crate) fn run_sql(&self, sql: &str) -> Result<()> {
        let mut stmt = self.prepare(sql)?;
        stmt.run()?;
        stmt.close()
    }

    /// Prepare and bind the first statement in `sql`, returning a cursor
    /// that owns it.
    pub fn query(&self, sql: &str, params: impl Into<Params>) -> Result<ResultSet<'_, '_>> {
        self.prepare(sql)?.into_result_set(params.into())
    }

    /// Hand a cursor to `f`; the cursor is closed when `f` returns, whether
    /// or not it succeeded.
    pub fn query_with<T, F>(&self, sql: &str, params: impl Into<Params>, f: F) -> Result<T>
    where
        F: FnOnce(&mut ResultSet<'_, '_>) -> Result<T>,
    {
        let mut rows = self.query(sql, params)?;
        let result = f(&mut rows);
        rows.close()?;
        result
    }

    pub fn get_first_row(&self, sql: &str, params: impl Into<Params>) -> Result<Option<Row>> {
        let mut rows = self.query(sql, params)?;
        let row = rows.next()?;
        rows.close()?;
        Ok(row)
    }

    /// First column of the first row, `None` when there are no rows. The row
    /// shape setting does not affect the result.
    pub fn get_first_value(&self, sql: &str, params: impl Into<Params>) -> Result<Option<Value>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_params(params)?;
        let first = stmt
            .step_values()?
            .and_then(|values| values.into_iter().next());
        stmt.close()?;
        Ok(first)
    }

    /// Columns of `table`, in declaration order.
    pub fn table_info(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!("PRAGMA table_info({})", quote_literal(table));
        let mut stmt = self.prepare(&sql)?;
        let mut columns = Vec::new();
        while let Some(values) = stmt.step_values()? {
            let mut values = values.into_iter();
            let mut next = || values.next().unwrap_or(Value::Null);
            let cid = next().as_i64().unwrap_or_default();
            let name = next().as_str().unwrap_or_default().to_string();
            let decl_type = next().as_str().unwrap_or_default().to_string();
            let not_null = next().as_i64().unwrap_or_default() != 0;
            let default_value = match next() {
                Value::Text(text) => Some(text),
                Value::Integer(v) => Some(v.to_string()),
                Value::Real(v) => Some(v.to_string()),
                Value::Null | Value::Blob(_) => None,
            };
            let pk = next().as_i64().unwrap_or_default();
            columns.push(ColumnInfo {
                cid,
                name,
                decl_type,
                default_value: normalize_default(default_value),
                not_null,
                pk,
            });
        }
        stmt.close()?;
        Ok(columns)
    }

    /// Abort the statement currently running on this connection. It fails
    /// with [`Error::Interrupt`] at its next step.
    pub fn interrupt(&self) -> Result<()> {
        let db = self.handle()?;
        // Safety: db is open.
        unsafe { sqlite3_interrupt(db) };
        Ok(())
    }

    /// A thread-safe handle that can interrupt this connection later.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> i64 {
        match self.handle() {
            // Safety: db is open.
            Ok(db) => unsafe { sqlite3_changes64(db) },
            Err(_) => 0,
        }
    }

    /// Rows changed since the connection opened.
    pub fn total_changes(&self) -> i64 {
        match self.handle() {
            // Safety: db is open.
            Ok(db) => unsafe { sqlite3_total_changes64(db) },
            Err(_) => 0,
        }
    }

    pub fn last_insert_row_id(&self) -> i64 {
        match self.handle() {
            // Safety: db is open.
            Ok(db) => unsafe { sqlite3_last_insert_rowid(db) },
            Err(_) => 0,
        }
    }

    /// Primary status code of the most recent engine call.
    pub fn errcode(&self) -> i32 {
        match self.handle() {
            // Safety: db is open.
            Ok(db) => unsafe { sqlite3_errcode(db) },
            Err(_) => SQLITE_MISUSE,
        }
    }

    /// Message for the most recent engine call ("not an error" after success).
    pub fn errmsg(&self) -> String {
        match self.handle() {
            // Safety: db is open; the message is copied before the next call.
            Ok(db) => unsafe { cstr_to_string(sqlite3_errmsg(db)) }
                .unwrap_or_else(|| generic_message(SQLITE_OK)),
            Err(_) => generic_message(SQLITE_MISUSE),
        }
    }

    /// Call `f` with the text of every statement as it starts running.
    /// Panics inside `f` are logged and ignored.
    pub fn trace<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&str) + 'static,
    {
        let callback: Box<TraceCallback> = Box::new(Box::new(f));
        let db = self.handle()?;
        // Safety: the box is stored below and outlives its registration.
        let rc = unsafe { install_trace(db, Some(&*callback)) };
        if rc != SQLITE_OK {
            return Err(error_from_handle(db, rc));
        }
        self.retire(self.trace.replace(Some(callback)));
        Ok(())
    }

    pub fn clear_trace(&self) -> Result<()> {
        let db = self.handle()?;
        // Safety: removing a hook has no pointer requirements.
        unsafe { install_trace(db, None) };
        self.retire(self.trace.take());
        Ok(())
    }

    /// Consult `f` for every operation while statements are prepared.
    ///
    /// [`Authorization::Deny`] fails the statement with
    /// [`Error::Authorization`]; [`Authorization::Ignore`] lets it run with
    /// the operation yielding no data. A panicking authorizer denies.
    pub fn authorizer<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&AuthorizerRequest<'_>) -> Authorization + 'static,
    {
        let callback: Box<AuthorizerCallback> = Box::new(Box::new(f));
        let db = self.handle()?;
        // Safety: see trace.
        let rc = unsafe { install_authorizer(db, Some(&*callback)) };
        if rc != SQLITE_OK {
            return Err(error_from_handle(db, rc));
        }
        self.retire(self.authorizer.replace(Some(callback)));
        Ok(())
    }

    pub fn clear_authorizer(&self) -> Result<()> {
        let db = self.handle()?;
        // Safety: see clear_trace.
        unsafe { install_authorizer(db, None) };
        self.retire(self.authorizer.take());
        Ok(())
    }

    fn retire<T: 'static>(&self, hook: Option<T>) {
        if self.stepping.get() == 0 {
            // Nothing is running, so no replaced hook can still be executing.
            let released = std::mem::take(&mut *self.retired.borrow_mut());
            drop(released);
            drop(hook);
            return;
        }
        if let Some(hook) = hook {
            self.retired.borrow_mut().push(Box::new(hook));
        }
    }

    #[cfg(test)]
    pub(crate) fn retired_hooks(&self) -> usize {
        self.retired.borrow().len()
    }

    /// Register a scalar SQL function. `arity` is the exact argument count,
    /// or -1 for any.
    ///
    /// Returning an error (or panicking) fails the calling statement with
    /// [`Error::Function`] wrapping it.
    pub fn create_function<F>(&self, name: &str, arity: i32, f: F) -> Result<()>
    where
        F: Fn(&mut FunctionContext<'_>, &[Value]) -> Result<()> + 'static,
    {
        if !(-1..=127).contains(&arity) {
            return Err(Error::Misuse("function arity must be between -1 and 127"));
        }
        let db = self.handle()?;
        let c_name = to_cstring(name, "function name")?;
        let slot = Box::new(FunctionSlot {
            name: name.to_string(),
            func: Box::new(f),
            pending: Rc::clone(&self.callback_error),
        });
        // Safety: db is open; the engine takes ownership of slot.
        let rc = unsafe { register_function(db, &c_name, arity, slot) };
        if rc != SQLITE_OK {
            return Err(error_from_handle(db, rc));
        }
        debug!(name, arity, "registered function");
        Ok(())
    }

    pub fn remove_function(&self, name: &str, arity: i32) -> Result<()> {
        let db = self.handle()?;
        let c_name = to_cstring(name, "function name")?;
        // Safety: db is open.
        let rc = unsafe { unregister_function(db, &c_name, arity) };
        if rc != SQLITE_OK {
            return Err(error_from_handle(db, rc));
        }
        Ok(())
    }

    /// Close the connection. Closing twice is a no-op.
    ///
    /// Statements still open are finalized and report closed afterwards,
    /// unless the connection is strict, in which case close fails with a
    /// busy error and the connection stays open.
    pub fn close(&self) -> Result<()> {
        self.close_inner(self.config.strict)
    }

    fn close_inner(&self, strict: bool) -> Result<()> {
        let db = self.db.get();
        if db.is_null() {
            return Ok(());
        }
        if self.stepping.get() > 0 {
            return Err(Error::Misuse("cannot close a database while a statement is running"));
        }

        let open: Vec<Rc<RawStatement>> = self
            .statements
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|stmt| !stmt.is_finalized())
            .collect();
        if !open.is_empty() {
            if strict {
                return Err(Error::Engine {
                    code: SQLITE_BUSY,
                    message: "unable to close due to unfinalized statements".to_string(),
                });
            }
            warn!(count = open.len(), path = %self.path, "finalizing statements left open at close");
            for stmt in &open {
                stmt.finalize();
            }
        }
        self.statements.borrow_mut().clear();

        self.interrupt.detach();
        // Safety: every statement is finalized; db is not used after this.
        let rc = unsafe { sqlite3_close_v2(db) };
        self.db.set(ptr::null_mut());
        self.trace.take();
        self.authorizer.take();
        self.retired.borrow_mut().clear();
        if rc != SQLITE_OK {
            let err = error_from_code(rc, generic_message(rc));
            warn!(path = %self.path, error = %err, "close reported an error");
            return Err(err);
        }
        debug!(path = %self.path, "closed database");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close_inner(false) {
            warn!(path = %self.path, error = %err, "error closing database on drop");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .field("results_as_hash", &self.results_as_hash())
            .finish()
    }
}
