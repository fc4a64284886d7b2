//! Conversions between [`Value`] and engine-native values.

use std::ffi::{c_char, c_int, c_void};

use libsqlite3_sys::{
    sqlite3_bind_blob, sqlite3_bind_double, sqlite3_bind_int64, sqlite3_bind_null,
    sqlite3_bind_text, sqlite3_bind_zeroblob, sqlite3_column_blob, sqlite3_column_bytes,
    sqlite3_column_double, sqlite3_column_int64, sqlite3_column_text, sqlite3_column_type,
    sqlite3_context, sqlite3_result_blob, sqlite3_result_double, sqlite3_result_error,
    sqlite3_result_int64, sqlite3_result_null, sqlite3_result_text, sqlite3_result_zeroblob,
    sqlite3_stmt, sqlite3_value, sqlite3_value_blob, sqlite3_value_bytes, sqlite3_value_double,
    sqlite3_value_int64, sqlite3_value_text, sqlite3_value_type, SQLITE_BLOB, SQLITE_FLOAT,
    SQLITE_INTEGER, SQLITE_NULL, SQLITE_TOOBIG, SQLITE_TRANSIENT,
};

use crate::types::Value;

/// Copy `len` bytes at `ptr`; a null pointer or empty length yields no bytes.
///
/// # Safety
/// `ptr` must be null or valid for `len` bytes.
unsafe fn copy_bytes(ptr: *const c_void, len: c_int) -> Vec<u8> {
    match usize::try_from(len) {
        Ok(len) if len > 0 && !ptr.is_null() => {
            std::slice::from_raw_parts(ptr.cast::<u8>(), len).to_vec()
        }
        _ => Vec::new(),
    }
}

fn text_from_bytes(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Read column `index` of the current row.
///
/// # Safety
/// `stmt` must be a live statement positioned on a row.
pub(crate) unsafe fn column_value(stmt: *mut sqlite3_stmt, index: c_int) -> Value {
    match sqlite3_column_type(stmt, index) {
        SQLITE_NULL => Value::Null,
        SQLITE_INTEGER => Value::Integer(sqlite3_column_int64(stmt, index)),
        SQLITE_FLOAT => Value::Real(sqlite3_column_double(stmt, index)),
        SQLITE_BLOB => {
            let ptr = sqlite3_column_blob(stmt, index);
            Value::Blob(copy_bytes(ptr, sqlite3_column_bytes(stmt, index)))
        }
        _ => {
            // Pointer first, then byte count, as the engine requires.
            let ptr = sqlite3_column_text(stmt, index);
            let bytes = copy_bytes(ptr.cast(), sqlite3_column_bytes(stmt, index));
            Value::Text(text_from_bytes(bytes))
        }
    }
}

/// Convert a function argument.
///
/// # Safety
/// `value` must be a protected value handed to a function callback.
pub(crate) unsafe fn raw_value(value: *mut sqlite3_value) -> Value {
    match sqlite3_value_type(value) {
        SQLITE_NULL => Value::Null,
        SQLITE_INTEGER => Value::Integer(sqlite3_value_int64(value)),
        SQLITE_FLOAT => Value::Real(sqlite3_value_double(value)),
        SQLITE_BLOB => {
            let ptr = sqlite3_value_blob(value);
            Value::Blob(copy_bytes(ptr, sqlite3_value_bytes(value)))
        }
        _ => {
            let ptr = sqlite3_value_text(value);
            let bytes = copy_bytes(ptr.cast(), sqlite3_value_bytes(value));
            Value::Text(text_from_bytes(bytes))
        }
    }
}

/// Bind `value` to the 1-based parameter `index`.
///
/// Returns the engine status code.
///
/// # Safety
/// `stmt` must be a live, reset statement.
pub(crate) unsafe fn bind_value(stmt: *mut sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    match value {
        Value::Null => sqlite3_bind_null(stmt, index),
        Value::Integer(v) => sqlite3_bind_int64(stmt, index, *v),
        Value::Real(v) => sqlite3_bind_double(stmt, index, *v),
        Value::Text(v) => match c_int::try_from(v.len()) {
            Ok(len) => sqlite3_bind_text(
                stmt,
                index,
                v.as_ptr().cast::<c_char>(),
                len,
                SQLITE_TRANSIENT(),
            ),
            Err(_) => SQLITE_TOOBIG,
        },
        // A null data pointer would bind NULL, so empty blobs go through zeroblob.
        Value::Blob(v) if v.is_empty() => sqlite3_bind_zeroblob(stmt, index, 0),
        Value::Blob(v) => match c_int::try_from(v.len()) {
            Ok(len) => sqlite3_bind_blob(
                stmt,
                index,
                v.as_ptr().cast::<c_void>(),
                len,
                SQLITE_TRANSIENT(),
            ),
            Err(_) => SQLITE_TOOBIG,
        },
    }
}

/// Set a function's result.
///
/// # Safety
/// `ctx` must be the context of the currently executing function call.
pub(crate) unsafe fn set_result(ctx: *mut sqlite3_context, value: &Value) {
    match value {
        Value::Null => sqlite3_result_null(ctx),
        Value::Integer(v) => sqlite3_result_int64(ctx, *v),
        Value::Real(v) => sqlite3_result_double(ctx, *v),
        Value::Text(v) => match c_int::try_from(v.len()) {
            Ok(len) => {
                sqlite3_result_text(ctx, v.as_ptr().cast::<c_char>(), len, SQLITE_TRANSIENT())
            }
            Err(_) => set_error(ctx, "string or blob too big"),
        },
        Value::Blob(v) if v.is_empty() => sqlite3_result_zeroblob(ctx, 0),
        Value::Blob(v) => match c_int::try_from(v.len()) {
            Ok(len) => {
                sqlite3_result_blob(ctx, v.as_ptr().cast::<c_void>(), len, SQLITE_TRANSIENT())
            }
            Err(_) => set_error(ctx, "string or blob too big"),
        },
    }
}

/// Report a function-level error; the engine copies `message`.
///
/// # Safety
/// `ctx` must be the context of the currently executing function call.
pub(crate) unsafe fn set_error(ctx: *mut sqlite3_context, message: &str) {
    let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
    sqlite3_result_error(ctx, message.as_ptr().cast::<c_char>(), len);
}
