//! Miscellaneous internal helpers (C strings/paths/SQL text).

use std::ffi::{c_char, CStr, CString};

use libsqlite3_sys::sqlite3_complete;

use crate::exceptions::{Error, Result};

/// Copy a NUL-terminated engine string into an owned `String`.
///
/// Returns `None` for a null pointer. Invalid UTF-8 is replaced lossily.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
#[inline]
pub(crate) unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

/// Validate a file path for security and correctness.
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath(
            "Database path cannot be empty".to_string(),
        ));
    }
    if path.contains('\0') {
        return Err(Error::InvalidPath(
            "Database path cannot contain null bytes".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn to_cstring(text: &str, what: &'static str) -> Result<CString> {
    CString::new(text).map_err(|_| Error::Nul { what })
}

/// Lexical check: does `sql` end with a complete, semicolon-terminated
/// statement? Text containing a NUL byte is never complete.
pub(crate) fn is_complete(sql: &str) -> bool {
    match CString::new(sql) {
        // Safety: the pointer is a valid NUL-terminated string for the call.
        Ok(sql) => unsafe { sqlite3_complete(sql.as_ptr()) != 0 },
        Err(_) => false,
    }
}

/// Quote `value` as an SQL string literal.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Normalize a `PRAGMA table_info` default literal: `NULL` becomes absent and
/// quoted strings lose their quotes. Other literals are kept verbatim.
pub(crate) fn normalize_default(literal: Option<String>) -> Option<String> {
    let literal = literal?;
    if literal.eq_ignore_ascii_case("null") {
        return None;
    }
    for quote in ['\'', '"'] {
        if literal.len() >= 2 && literal.starts_with(quote) && literal.ends_with(quote) {
            let inner = &literal[1..literal.len() - 1];
            let doubled = format!("{quote}{quote}");
            return Some(inner.replace(&doubled, &quote.to_string()));
        }
    }
    Some(literal)
}
