// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! SQLite lease store.

use std::{path::Path, sync::Mutex};

use rusqlite::{
    Connection, ErrorCode, ToSql,
    types::{ToSqlOutput, ValueRef},
};

use crate::{
    model::LeaseState,
    store::{
        LeaseRow, LeaseStatement, LeaseStore, MalformedRowError, StoreError, Value,
        check_param_count,
    },
};

/// Table and index definitions. Addresses are 16 byte blobs, which SQLite
/// compares with `memcmp`, so range predicates and ordering are byte-wise.
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS dhcp_lease (
        address            BLOB    NOT NULL PRIMARY KEY,
        client_id          BLOB    NOT NULL,
        ia_type            INTEGER NOT NULL,
        ia_id              INTEGER NOT NULL,
        prefix_len         INTEGER,
        state              INTEGER NOT NULL,
        start_time         INTEGER NOT NULL,
        preferred_end_time INTEGER NOT NULL,
        valid_end_time     INTEGER NOT NULL,
        ia_options         BLOB,
        binding_options    BLOB
    );
    CREATE INDEX IF NOT EXISTS dhcp_lease_ia
        ON dhcp_lease (client_id, ia_type, ia_id);
    CREATE INDEX IF NOT EXISTS dhcp_lease_valid_end
        ON dhcp_lease (valid_end_time);";

const COLUMNS: &str = "address, client_id, ia_type, ia_id, prefix_len, state, \
     start_time, preferred_end_time, valid_end_time, ia_options, binding_options";

/// A lease store backed by a single SQLite connection.
///
/// Statements are serialized on the connection; each one runs in its own
/// implicit transaction.
#[derive(Debug)]
pub struct SqliteLeaseStore {
    conn: Mutex<Connection>,
}

impl SqliteLeaseStore {
    /// Opens (or creates) the database file and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(map_err)?;
        Self::from_connection(conn)
    }

    /// Creates a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        Self::from_connection(conn)
    }

    /// Wraps an existing connection and ensures the schema exists.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| StoreError::Backend(format!("connection mutex poisoned: {e}").into()))?;
        f(&guard).map_err(map_err)
    }
}

impl LeaseStore for SqliteLeaseStore {
    fn query(
        &self,
        statement: LeaseStatement,
        params: &[Value],
    ) -> Result<Vec<LeaseRow>, StoreError> {
        check_param_count(statement, params)?;
        let sql = sql(statement)?;
        let rows = self.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params), lease_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
        tracing::trace!(%statement, rows = rows.len(), "Query executed");
        Ok(rows)
    }

    fn execute(&self, statement: LeaseStatement, params: &[Value]) -> Result<usize, StoreError> {
        check_param_count(statement, params)?;
        let sql = sql(statement)?;
        let affected = self.with_connection(|conn| {
            conn.prepare_cached(&sql)?
                .execute(rusqlite::params_from_iter(params))
        })?;
        tracing::trace!(%statement, affected, "Statement executed");
        Ok(affected)
    }
}

/// SQL text of a statement.
fn sql(statement: LeaseStatement) -> Result<String, StoreError> {
    let sql = match statement {
        LeaseStatement::InsertLease => {
            format!(
                "INSERT INTO dhcp_lease ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            )
        }
        LeaseStatement::UpdateLease => {
            "UPDATE dhcp_lease SET state = ?1, prefix_len = ?2, start_time = ?3, \
             preferred_end_time = ?4, valid_end_time = ?5, ia_options = ?6, \
             binding_options = ?7 WHERE address = ?8"
                .to_string()
        }
        LeaseStatement::UpdateBinding => {
            "UPDATE dhcp_lease SET state = ?1, prefix_len = ?2, start_time = ?3, \
             preferred_end_time = ?4, valid_end_time = ?5 WHERE address = ?6"
                .to_string()
        }
        LeaseStatement::DeleteLease => "DELETE FROM dhcp_lease WHERE address = ?1".to_string(),
        LeaseStatement::SelectByIa => {
            format!(
                "SELECT {COLUMNS} FROM dhcp_lease \
                 WHERE client_id = ?1 AND ia_type = ?2 AND ia_id = ?3 ORDER BY rowid"
            )
        }
        LeaseStatement::SelectByAddress => {
            format!("SELECT {COLUMNS} FROM dhcp_lease WHERE address = ?1")
        }
        LeaseStatement::SelectAddressRange => {
            format!(
                "SELECT {COLUMNS} FROM dhcp_lease \
                 WHERE address >= ?1 AND address <= ?2 ORDER BY address"
            )
        }
        LeaseStatement::SelectUnused { prefixes } => {
            let kind = if prefixes {
                "prefix_len IS NOT NULL"
            } else {
                "prefix_len IS NULL"
            };
            format!(
                "SELECT {COLUMNS} FROM dhcp_lease \
                 WHERE ((state = {advertised} AND start_time < ?1) \
                     OR state = {expired} OR state = {released}) \
                   AND address >= ?2 AND address <= ?3 AND {kind} \
                 ORDER BY state, valid_end_time, address",
                advertised = u8::from(LeaseState::Advertised),
                expired = u8::from(LeaseState::Expired),
                released = u8::from(LeaseState::Released),
            )
        }
        LeaseStatement::SelectExpired => {
            format!(
                "SELECT {COLUMNS} FROM dhcp_lease \
                 WHERE ia_type = ?1 AND valid_end_time < ?2 \
                 ORDER BY valid_end_time, address"
            )
        }
        LeaseStatement::DeleteOutsideRanges { ranges: 0 } => {
            return Err(StoreError::invalid_parameters(
                statement,
                "refusing to delete without ranges",
            ));
        }
        LeaseStatement::DeleteOutsideRanges { ranges } => {
            let predicate = (0..ranges)
                .map(|i| format!("NOT (address BETWEEN ?{} AND ?{})", 2 * i + 1, 2 * i + 2))
                .collect::<Vec<_>>()
                .join(" AND ");
            format!("DELETE FROM dhcp_lease WHERE {predicate}")
        }
    };
    Ok(sql)
}

/// Maps a result row. Column order as in [COLUMNS].
///
/// Code columns are read as plain integers so that out of range values are
/// reported as malformed rows rather than as driver errors.
fn lease_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<LeaseRow, MalformedRowError>> {
    let ia_type: i64 = row.get(2)?;
    let prefix_len: Option<i64> = row.get(4)?;
    let state: i64 = row.get(5)?;
    let address: Vec<u8> = row.get(0)?;
    let client_id: Vec<u8> = row.get(1)?;
    let ia_id: i64 = row.get(3)?;
    let start_time: i64 = row.get(6)?;
    let preferred_end_time: i64 = row.get(7)?;
    let valid_end_time: i64 = row.get(8)?;
    let ia_options: Option<Vec<u8>> = row.get(9)?;
    let binding_options: Option<Vec<u8>> = row.get(10)?;

    let build = move || -> Result<LeaseRow, MalformedRowError> {
        Ok(LeaseRow {
            address,
            client_id,
            ia_type: small_code(ia_type)?,
            ia_id,
            prefix_len: prefix_len.map(small_code).transpose()?,
            state: small_code(state)?,
            start_time,
            preferred_end_time,
            valid_end_time,
            ia_options,
            binding_options,
        })
    };
    Ok(build())
}

fn small_code(value: i64) -> Result<u8, MalformedRowError> {
    u8::try_from(value).map_err(|_| MalformedRowError::CodeOutOfRange(value))
}

fn map_err(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, ref message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(message.clone().unwrap_or_else(|| failure.to_string()))
        }
        err => StoreError::Backend(Box::new(err)),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}
