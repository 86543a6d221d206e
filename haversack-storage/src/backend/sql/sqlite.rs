// Copyright 2026 haversack Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, path::Path, time::Duration};

use haversack_common::error::{Error, ErrorKind, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{
    params_from_iter,
    types::{ToSqlOutput, Value, ValueRef},
    Connection, ToSql,
};

use super::{ConnectionPool, Row, SqlConnection, SqlValue};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Helper for creating an error from [`rusqlite::Error`].
pub fn sqlite_error(e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Error::new(ErrorKind::NotFound, "no rows").with_source(e),
        _ => Error::new(ErrorKind::External, "sqlite error").with_source(e),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(s) => SqlValue::Text(String::from_utf8_lossy(s).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

/// A single embedded SQLite connection behind a mutex.
pub struct SqlitePool {
    conn: Mutex<Connection>,
}

impl Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool").finish()
    }
}

impl SqlitePool {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(sqlite_error)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(sqlite_error)?;
        tracing::debug!("[sqlite]: opened {:?} in {mode} journal mode", path.as_ref());
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(sqlite_error)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(sqlite_error)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl ConnectionPool for SqlitePool {
    fn database_type(&self) -> &str {
        "sqlite"
    }

    fn connection(&self) -> Result<Box<dyn SqlConnection + '_>> {
        Ok(Box::new(SqliteConnection(self.conn.lock())))
    }
}

struct SqliteConnection<'a>(MutexGuard<'a, Connection>);

impl SqlConnection for SqliteConnection<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        let mut stmt = self.0.prepare_cached(sql).map_err(sqlite_error)?;
        stmt.execute(params_from_iter(params.iter())).map_err(sqlite_error)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut stmt = self.0.prepare_cached(sql).map_err(sqlite_error)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(sqlite_error)?;

        let mut res = vec![];
        while let Some(row) = rows.next().map_err(sqlite_error)? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(SqlValue::from(row.get_ref(i).map_err(sqlite_error)?));
            }
            res.push(values);
        }
        Ok(res)
    }
}
