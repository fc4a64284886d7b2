//! Engine callback adapters (trace, authorizer, scalar functions).
//!
//! Every native calling-convention detail lives here: the engine hands each
//! trampoline an opaque context pointer that refers to a boxed host closure,
//! the trampoline converts the native arguments, runs the closure behind
//! `catch_unwind` and maps the outcome back into the engine's vocabulary.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_uint, c_void, CString};
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;

use libsqlite3_sys::{
    sqlite3, sqlite3_context, sqlite3_context_db_handle, sqlite3_create_function_v2,
    sqlite3_interrupt, sqlite3_result_null, sqlite3_set_authorizer, sqlite3_trace_v2,
    sqlite3_user_data, sqlite3_value, SQLITE_DENY, SQLITE_OK, SQLITE_TRACE_STMT, SQLITE_UTF8,
};
use tracing::warn;

use crate::conversion::{raw_value, set_error, set_result};
use crate::exceptions::{Error, Result};
use crate::types::{Authorization, Value};
use crate::utils::cstr_to_string;

pub(crate) type TraceCallback = Box<dyn Fn(&str)>;
pub(crate) type AuthorizerCallback = Box<dyn Fn(&AuthorizerRequest<'_>) -> Authorization>;
pub(crate) type ScalarCallback = Box<dyn Fn(&mut FunctionContext<'_>, &[Value]) -> Result<()>>;

/// Error raised by a host function, parked until the failing step reports it.
pub(crate) type PendingError = Rc<RefCell<Option<Error>>>;

/// One authorizer consultation.
///
/// `action` is the engine's operation code (e.g. `SQLITE_SELECT`,
/// `SQLITE_READ`), passed through uninterpreted together with up to four
/// descriptive strings whose meaning depends on the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizerRequest<'a> {
    pub action: i32,
    pub args: [Option<&'a str>; 4],
}

/// Handle through which a custom function reports its result.
///
/// A function that never sets a result yields SQL `NULL`.
pub struct FunctionContext<'a> {
    ctx: *mut sqlite3_context,
    has_result: bool,
    _marker: PhantomData<&'a mut sqlite3_context>,
}

impl FunctionContext<'_> {
    pub fn set_result(&mut self, value: impl Into<Value>) {
        // Safety: ctx is the live context of the call this value was built for.
        unsafe { set_result(self.ctx, &value.into()) };
        self.has_result = true;
    }

    /// Fail the current call with `message`; the statement aborts with an
    /// [`Error::Sql`] carrying it.
    pub fn set_error(&mut self, message: &str) {
        // Safety: see set_result.
        unsafe { set_error(self.ctx, message) };
        self.has_result = true;
    }

    pub fn has_result(&self) -> bool {
        self.has_result
    }

    /// Interrupt the connection running this function. The in-flight
    /// statement fails with [`Error::Interrupt`] once the function returns.
    pub fn interrupt(&self) {
        // Safety: the context's connection outlives the call.
        unsafe { sqlite3_interrupt(sqlite3_context_db_handle(self.ctx)) };
    }
}

pub(crate) struct FunctionSlot {
    pub(crate) name: String,
    pub(crate) func: ScalarCallback,
    pub(crate) pending: PendingError,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

unsafe extern "C" fn trace_trampoline(
    trace_type: c_uint,
    ctx: *mut c_void,
    _stmt: *mut c_void,
    x: *mut c_void,
) -> c_int {
    if ctx.is_null() || x.is_null() || trace_type != SQLITE_TRACE_STMT as c_uint {
        return 0;
    }
    // Safety: for SQLITE_TRACE_STMT, x is the NUL-terminated statement text.
    let Some(sql) = cstr_to_string(x as *const c_char) else {
        return 0;
    };
    // Safety: ctx points at the TraceCallback owned by the Database, which
    // unregisters the trace before dropping it.
    let callback = &*(ctx as *const TraceCallback);
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&sql))) {
        warn!(sql = %sql, reason = %panic_message(panic.as_ref()), "trace callback panicked; ignored");
    }
    0
}

unsafe extern "C" fn authorizer_trampoline(
    ctx: *mut c_void,
    action: c_int,
    arg1: *const c_char,
    arg2: *const c_char,
    arg3: *const c_char,
    arg4: *const c_char,
) -> c_int {
    if ctx.is_null() {
        return SQLITE_OK;
    }
    let args = [
        cstr_to_string(arg1),
        cstr_to_string(arg2),
        cstr_to_string(arg3),
        cstr_to_string(arg4),
    ];
    let request = AuthorizerRequest {
        action,
        args: [
            args[0].as_deref(),
            args[1].as_deref(),
            args[2].as_deref(),
            args[3].as_deref(),
        ],
    };
    // Safety: ctx points at the AuthorizerCallback owned by the Database.
    let callback = &*(ctx as *const AuthorizerCallback);
    match catch_unwind(AssertUnwindSafe(|| callback(&request))) {
        Ok(verdict) => verdict.code(),
        Err(panic) => {
            warn!(action, reason = %panic_message(panic.as_ref()), "authorizer panicked; denying");
            SQLITE_DENY
        }
    }
}

unsafe extern "C" fn function_trampoline(
    ctx: *mut sqlite3_context,
    argc: c_int,
    argv: *mut *mut sqlite3_value,
) {
    let slot = sqlite3_user_data(ctx) as *const FunctionSlot;
    if slot.is_null() {
        sqlite3_result_null(ctx);
        return;
    }
    // Safety: user data is the FunctionSlot registered with this function; the
    // engine keeps it alive until the destructor runs.
    let slot = &*slot;
    let argc = usize::try_from(argc).unwrap_or(0);
    let args: Vec<Value> = (0..argc).map(|i| raw_value(*argv.add(i))).collect();

    let mut context = FunctionContext {
        ctx,
        has_result: false,
        _marker: PhantomData,
    };
    let failure = match catch_unwind(AssertUnwindSafe(|| (slot.func)(&mut context, &args))) {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(panic) => Error::User(format!("function panicked: {}", panic_message(panic.as_ref()))),
    };

    set_error(ctx, &failure.to_string());
    if let Ok(mut pending) = slot.pending.try_borrow_mut() {
        *pending = Some(Error::Function {
            name: slot.name.clone(),
            source: Box::new(failure),
        });
    }
}

unsafe extern "C" fn function_destructor(user_data: *mut c_void) {
    if !user_data.is_null() {
        // Safety: user_data came from Box::into_raw in register_function.
        drop(Box::from_raw(user_data as *mut FunctionSlot));
    }
}

/// Install (or with `None`, remove) the trace hook.
///
/// # Safety
/// `db` must be open. A registered `callback` must stay at the same address
/// until the hook is replaced or the connection closes.
pub(crate) unsafe fn install_trace(db: *mut sqlite3, callback: Option<&TraceCallback>) -> c_int {
    match callback {
        Some(callback) => sqlite3_trace_v2(
            db,
            SQLITE_TRACE_STMT as c_uint,
            Some(trace_trampoline),
            callback as *const TraceCallback as *mut c_void,
        ),
        None => sqlite3_trace_v2(db, 0, None, ptr::null_mut()),
    }
}

/// Install (or with `None`, remove) the authorizer.
///
/// # Safety
/// Same contract as [`install_trace`].
pub(crate) unsafe fn install_authorizer(
    db: *mut sqlite3,
    callback: Option<&AuthorizerCallback>,
) -> c_int {
    match callback {
        Some(callback) => sqlite3_set_authorizer(
            db,
            Some(authorizer_trampoline),
            callback as *const AuthorizerCallback as *mut c_void,
        ),
        None => sqlite3_set_authorizer(db, None, ptr::null_mut()),
    }
}

/// Register a scalar function; ownership of `slot` passes to the engine,
/// which drops it on removal, on close, or when registration fails.
///
/// # Safety
/// `db` must be open.
pub(crate) unsafe fn register_function(
    db: *mut sqlite3,
    name: &CString,
    arity: c_int,
    slot: Box<FunctionSlot>,
) -> c_int {
    sqlite3_create_function_v2(
        db,
        name.as_ptr(),
        arity,
        SQLITE_UTF8,
        Box::into_raw(slot) as *mut c_void,
        Some(function_trampoline),
        None,
        None,
        Some(function_destructor),
    )
}

/// Remove a scalar function previously registered under `name`/`arity`.
///
/// # Safety
/// `db` must be open.
pub(crate) unsafe fn unregister_function(db: *mut sqlite3, name: &CString, arity: c_int) -> c_int {
    sqlite3_create_function_v2(
        db,
        name.as_ptr(),
        arity,
        SQLITE_UTF8,
        ptr::null_mut(),
        None,
        None,
        None,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let err = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "boom");
        let err = catch_unwind(|| panic!("{}", String::from("owned"))).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "owned");
    }
}
