//! PostgreSQL connection handling
//!
//! Safe wrapper around PostgreSQL's C library (libpq). Both the walsender
//! connection owned by the extractor and the catalog connection owned by the
//! probe go through this wrapper.

use crate::core::errors::{ReplicationError, ReplicationResult};
use libpq_sys::*;
use std::ffi::{CStr, CString};
use std::ptr;

// PG_DIAG_SQLSTATE field code for PQresultErrorField
const DIAG_SQLSTATE: std::os::raw::c_int = 'C' as std::os::raw::c_int;

/// Safe wrapper for a libpq connection
///
/// Connections run in autocommit mode, which is what the catalog probe
/// requires; replication mode is selected through the conninfo string.
pub struct PGConnection {
    conn: *mut PGconn,
}

impl PGConnection {
    /// Establish a connection using a libpq conninfo string.
    pub fn connect(conninfo: &str) -> ReplicationResult<Self> {
        let c_conninfo = CString::new(conninfo)?;
        let conn = unsafe { PQconnectdb(c_conninfo.as_ptr()) };

        if conn.is_null() {
            return Err(ReplicationError::connection(
                "Failed to allocate connection object",
            ));
        }

        let status = unsafe { PQstatus(conn) };
        if status != ConnStatusType::CONNECTION_OK {
            let error_msg = connection_error(conn);
            unsafe { PQfinish(conn) };
            return Err(ReplicationError::connection(format!(
                "Connection failed: {error_msg}"
            )));
        }

        Ok(Self { conn })
    }

    /// Execute a query or replication command and return its result.
    ///
    /// A failed statement still yields `Ok` with a result whose status is an
    /// error; callers inspect `PGResult::is_ok` / `sqlstate` to decide.
    pub fn exec(&self, query: &str) -> ReplicationResult<PGResult> {
        let c_query = CString::new(query)?;
        let result = unsafe { PQexec(self.conn, c_query.as_ptr()) };

        if result.is_null() {
            return Err(ReplicationError::protocol(format!(
                "Query execution failed: {}",
                connection_error(self.conn)
            )));
        }

        Ok(PGResult { result })
    }

    /// Read one copy-data frame from the server (blocking).
    ///
    /// PQgetCopyData returns one row of copy data at a time: a positive
    /// length with an allocated buffer (freed here with PQfreemem), -1 when
    /// the COPY has ended, or -2 on error. Blocking mode means a zero return
    /// cannot occur.
    pub fn get_copy_data(&self) -> ReplicationResult<Option<Vec<u8>>> {
        let mut buffer: *mut std::os::raw::c_char = ptr::null_mut();

        let copy_data_len = unsafe { PQgetCopyData(self.conn, &mut buffer, 0) };

        match copy_data_len {
            -2 => Err(ReplicationError::protocol(connection_error(self.conn))),
            -1 => {
                // COPY is done; collect the command's final status
                let result = PGResult {
                    result: unsafe { PQgetResult(self.conn) },
                };

                if !result.is_ok() {
                    return Err(ReplicationError::protocol(connection_error(self.conn)));
                }

                Ok(None)
            }
            0 => Ok(None),
            len => {
                if buffer.is_null() {
                    return Err(ReplicationError::protocol("Received null copy buffer"));
                }

                let data = unsafe {
                    std::slice::from_raw_parts(buffer as *const u8, len as usize).to_vec()
                };

                unsafe { PQfreemem(buffer as *mut std::os::raw::c_void) };
                Ok(Some(data))
            }
        }
    }

    /// Send one copy-data frame to the server.
    pub fn put_copy_data(&self, data: &[u8]) -> ReplicationResult<()> {
        let result = unsafe {
            PQputCopyData(
                self.conn,
                data.as_ptr() as *const std::os::raw::c_char,
                data.len() as i32,
            )
        };

        if result != 1 {
            return Err(ReplicationError::protocol(format!(
                "Failed to send copy data: {}",
                connection_error(self.conn)
            )));
        }

        Ok(())
    }

    /// Flush buffered output to the server.
    pub fn flush(&self) -> ReplicationResult<()> {
        let result = unsafe { PQflush(self.conn) };
        if result != 0 {
            return Err(ReplicationError::protocol("Failed to flush connection"));
        }
        Ok(())
    }
}

impl Drop for PGConnection {
    fn drop(&mut self) {
        if !self.conn.is_null() {
            unsafe { PQfinish(self.conn) };
        }
    }
}

fn connection_error(conn: *const PGconn) -> String {
    unsafe {
        let error_ptr = PQerrorMessage(conn);
        if error_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(error_ptr).to_string_lossy().trim().to_string()
        }
    }
}

/// Safe wrapper for a libpq result
pub struct PGResult {
    result: *mut PGresult,
}

impl PGResult {
    /// Execution status of the statement that produced this result.
    pub fn status(&self) -> ExecStatusType {
        unsafe { PQresultStatus(self.result) }
    }

    /// True for PGRES_TUPLES_OK and PGRES_COMMAND_OK.
    pub fn is_ok(&self) -> bool {
        matches!(
            self.status(),
            ExecStatusType::PGRES_TUPLES_OK | ExecStatusType::PGRES_COMMAND_OK
        )
    }

    /// Number of tuples (rows) in the result.
    pub fn ntuples(&self) -> i32 {
        unsafe { PQntuples(self.result) }
    }

    /// Value at (row, col), None when the pointer is null.
    ///
    /// libpq represents SQL NULL as an empty string here; callers that care
    /// should check PQgetisnull, which none of the catalog queries need.
    pub fn getvalue(&self, row: i32, col: i32) -> Option<String> {
        let value_ptr = unsafe { PQgetvalue(self.result, row, col) };
        if value_ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(value_ptr).to_string_lossy().into_owned()) }
        }
    }

    /// Five-character SQLSTATE of a failed statement, when the server sent one.
    pub fn sqlstate(&self) -> Option<String> {
        let field_ptr = unsafe { PQresultErrorField(self.result, DIAG_SQLSTATE) };
        if field_ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(field_ptr).to_string_lossy().into_owned()) }
        }
    }

    /// Human-readable error message attached to this result.
    pub fn error_message(&self) -> String {
        unsafe {
            let msg_ptr = PQresultErrorMessage(self.result);
            if msg_ptr.is_null() {
                "Unknown error".to_string()
            } else {
                CStr::from_ptr(msg_ptr).to_string_lossy().trim().to_string()
            }
        }
    }
}

impl Drop for PGResult {
    fn drop(&mut self) {
        if !self.result.is_null() {
            unsafe { PQclear(self.result) };
        }
    }
}
