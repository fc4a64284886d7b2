//! Error mapping helpers (engine status codes -> [`Error`]).

use std::ffi::c_int;

use libsqlite3_sys::{
    sqlite3, sqlite3_errmsg, sqlite3_error_offset, sqlite3_errstr, sqlite3_extended_errcode,
    SQLITE_AUTH, SQLITE_CONSTRAINT, SQLITE_ERROR, SQLITE_INTERRUPT, SQLITE_MISUSE, SQLITE_RANGE,
};

use crate::exceptions::Error;
use crate::utils::cstr_to_string;

/// Translate a status code and message into the typed taxonomy.
///
/// `code` may be an extended result code; classification uses the primary
/// code in its low byte.
pub(crate) fn error_from_code(code: c_int, message: String) -> Error {
    match code & 0xff {
        SQLITE_ERROR => Error::Sql {
            code,
            message,
            sql: None,
            offset: None,
        },
        SQLITE_CONSTRAINT => Error::Constraint { code, message },
        SQLITE_AUTH => Error::Authorization { code, message },
        SQLITE_INTERRUPT => Error::Interrupt { code, message },
        SQLITE_RANGE => Error::Binding(message),
        _ => Error::Engine { code, message },
    }
}

/// Build an error from the connection's last status.
///
/// Falls back to the engine's generic text for `code` when the handle has no
/// message of its own (e.g. misuse reported without touching the handle).
pub(crate) fn error_from_handle(db: *mut sqlite3, code: c_int) -> Error {
    let (code, message) = last_status(db, code);
    error_from_code(code, message)
}

/// Error for a failed `sqlite3_prepare_v2`, carrying the SQL text and the
/// offset the engine blamed so the message can point into the source.
pub(crate) fn prepare_error(db: *mut sqlite3, code: c_int, sql: &str) -> Error {
    let (code, message) = last_status(db, code);
    match error_from_code(code, message) {
        Error::Sql { code, message, .. } => {
            // Safety: db is an open handle owned by the calling Database.
            let offset = unsafe { sqlite3_error_offset(db) };
            Error::Sql {
                code,
                message,
                sql: Some(sql.to_string()),
                offset: usize::try_from(offset).ok(),
            }
        }
        other => other,
    }
}

fn last_status(db: *mut sqlite3, code: c_int) -> (c_int, String) {
    if db.is_null() || code == SQLITE_MISUSE {
        return (code, generic_message(code));
    }
    // Safety: db is a live handle; errmsg returns a NUL-terminated string owned
    // by the engine that stays valid until the next API call on db.
    unsafe {
        let extended = sqlite3_extended_errcode(db);
        let code = if extended & 0xff == code & 0xff {
            extended
        } else {
            code
        };
        let message =
            cstr_to_string(sqlite3_errmsg(db)).unwrap_or_else(|| generic_message(code));
        (code, message)
    }
}

pub(crate) fn generic_message(code: c_int) -> String {
    // Safety: sqlite3_errstr returns a pointer to a static string.
    unsafe { cstr_to_string(sqlite3_errstr(code)) }
        .unwrap_or_else(|| format!("SQLite error code {code}"))
}

/// Render `message` followed by the SQL text and, when an offset is known, a
/// caret line under the offending column.
///
/// The caret is placed on the line following the one that contains the
/// offset; the trailing newline of the SQL text is dropped.
pub(crate) fn render_sql_error(
    message: &str,
    sql: &Option<String>,
    offset: &Option<usize>,
) -> String {
    let Some(sql) = sql else {
        return message.to_string();
    };
    let excerpt = match offset {
        Some(offset) => sql_with_caret(sql, *offset),
        None => sql.strip_suffix('\n').unwrap_or(sql).to_string(),
    };
    format!("{message}:\n{excerpt}")
}

fn sql_with_caret(sql: &str, offset: usize) -> String {
    let offset = offset.min(sql.len());
    let mut out = String::with_capacity(sql.len() + 16);
    let mut start = 0;
    let mut placed = false;
    let lines: Vec<&str> = sql.split_inclusive('\n').collect();
    let last = lines.len().saturating_sub(1);

    for (i, line) in lines.iter().enumerate() {
        out.push_str(line);
        let end = start + line.len();
        if !placed && (offset < end || i == last) {
            let column_bytes = (offset - start).min(line.len());
            let column = line
                .get(..column_bytes)
                .map_or(column_bytes, |prefix| prefix.chars().count());
            if !line.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&" ".repeat(column));
            out.push_str("^\n");
            placed = true;
        }
        start = end;
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(message: &str, sql: &str, offset: Option<usize>) -> String {
        render_sql_error(message, &Some(sql.to_string()), &offset)
    }

    #[test]
    fn caret_on_single_line() {
        assert_eq!(
            render("near \"from\": syntax error", "select from foo", Some(7)),
            "near \"from\": syntax error:\nselect from foo\n       ^"
        );
    }

    #[test]
    fn caret_at_start_of_second_line() {
        assert_eq!(
            render("near \"from\": syntax error", "select\nfrom foo\n", Some(7)),
            "near \"from\": syntax error:\nselect\nfrom foo\n^"
        );
    }

    #[test]
    fn caret_between_lines() {
        assert_eq!(
            render("no such column: asdf", "select asdf\nfrom foo\n", Some(7)),
            "no such column: asdf:\nselect asdf\n       ^\nfrom foo"
        );
    }

    #[test]
    fn no_offset_keeps_sql_without_trailing_newline() {
        assert_eq!(
            render("near \"from\": syntax error", "select\nfrom foo\n", None),
            "near \"from\": syntax error:\nselect\nfrom foo"
        );
    }

    #[test]
    fn offset_at_end_of_input_points_past_last_line() {
        assert_eq!(render("incomplete input", "select", Some(6)), "incomplete input:\nselect\n      ^");
    }

    #[test]
    fn no_sql_is_just_the_message() {
        assert_eq!(render_sql_error("boom", &None, &Some(3)), "boom");
    }

    #[test]
    fn codes_classify_by_primary_byte() {
        let err = error_from_code(
            libsqlite3_sys::SQLITE_CONSTRAINT_CHECK,
            "CHECK constraint failed: x".to_string(),
        );
        assert!(matches!(err, Error::Constraint { .. }));
        assert_eq!(err.code(), Some(libsqlite3_sys::SQLITE_CONSTRAINT_CHECK));

        assert!(matches!(
            error_from_code(libsqlite3_sys::SQLITE_AUTH, "not authorized".into()),
            Error::Authorization { .. }
        ));
        assert!(matches!(
            error_from_code(libsqlite3_sys::SQLITE_INTERRUPT, "interrupted".into()),
            Error::Interrupt { .. }
        ));
        assert!(matches!(
            error_from_code(libsqlite3_sys::SQLITE_BUSY, "database is locked".into()),
            Error::Engine { .. }
        ));
    }

    #[test]
    fn generic_message_comes_from_engine() {
        assert_eq!(generic_message(libsqlite3_sys::SQLITE_OK), "not an error");
    }
}
