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
//! In-memory lease store.
//!
//! Interprets every [LeaseStatement] over an ordered map keyed by address
//! bytes, with the same filters and orderings as the SQL statements.

use std::{
    collections::BTreeMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    model::LeaseState,
    store::{LeaseRow, LeaseStatement, LeaseStore, StoreError, Value, check_param_count},
};

/// A lease store holding all rows in memory.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    table: RwLock<Table>,
}

#[derive(Debug, Default)]
struct Table {
    /// Rows by address, with their insertion sequence number.
    rows: BTreeMap<Vec<u8>, (u64, LeaseRow)>,
    next_seq: u64,
}

impl MemoryLeaseStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.read().map(|t| t.rows.len()).unwrap_or_default()
    }

    /// Returns true if no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a row as is, bypassing statement validation. Allows tests to
    /// plant rows that no statement would write.
    pub fn insert_raw(&self, row: LeaseRow) -> Result<(), StoreError> {
        let mut table = self.write()?;
        let seq = table.next_seq;
        table.next_seq += 1;
        table.rows.insert(row.address.clone(), (seq, row));
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Table>, StoreError> {
        self.table
            .read()
            .map_err(|e| StoreError::Backend(format!("lease table lock poisoned: {e}").into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Table>, StoreError> {
        self.table
            .write()
            .map_err(|e| StoreError::Backend(format!("lease table lock poisoned: {e}").into()))
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn query(
        &self,
        statement: LeaseStatement,
        params: &[Value],
    ) -> Result<Vec<LeaseRow>, StoreError> {
        check_param_count(statement, params)?;
        let p = Params { statement, params };
        let table = self.read()?;

        let rows = match statement {
            LeaseStatement::SelectByIa => {
                let (client_id, ia_type, ia_id) = (p.blob(0)?, p.int(1)?, p.int(2)?);
                let mut matching: Vec<_> = table
                    .rows
                    .values()
                    .filter(|(_, row)| {
                        row.client_id == client_id
                            && i64::from(row.ia_type) == ia_type
                            && row.ia_id == ia_id
                    })
                    .collect();
                matching.sort_by_key(|(seq, _)| *seq);
                matching.into_iter().map(|(_, row)| row.clone()).collect()
            }
            LeaseStatement::SelectByAddress => {
                table
                    .rows
                    .get(p.blob(0)?)
                    .map(|(_, row)| row.clone())
                    .into_iter()
                    .collect()
            }
            LeaseStatement::SelectAddressRange => {
                let (start, end) = (p.blob(0)?, p.blob(1)?);
                in_range(&table, start, end).cloned().collect()
            }
            LeaseStatement::SelectUnused { prefixes } => {
                let (cutoff, start, end) = (p.int(0)?, p.blob(1)?, p.blob(2)?);
                let advertised = u8::from(LeaseState::Advertised);
                let expired = u8::from(LeaseState::Expired);
                let released = u8::from(LeaseState::Released);
                let mut rows: Vec<_> = in_range(&table, start, end)
                    .filter(|row| row.prefix_len.is_some() == prefixes)
                    .filter(|row| {
                        (row.state == advertised && row.start_time < cutoff)
                            || row.state == expired
                            || row.state == released
                    })
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| {
                    (a.state, a.valid_end_time, &a.address).cmp(&(
                        b.state,
                        b.valid_end_time,
                        &b.address,
                    ))
                });
                rows
            }
            LeaseStatement::SelectExpired => {
                let (ia_type, now) = (p.int(0)?, p.int(1)?);
                let mut rows: Vec<_> = table
                    .rows
                    .values()
                    .map(|(_, row)| row)
                    .filter(|row| i64::from(row.ia_type) == ia_type && row.valid_end_time < now)
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| {
                    (a.valid_end_time, &a.address).cmp(&(b.valid_end_time, &b.address))
                });
                rows
            }
            _ => {
                return Err(StoreError::invalid_parameters(
                    statement,
                    "statement does not return rows",
                ));
            }
        };
        Ok(rows)
    }

    fn execute(&self, statement: LeaseStatement, params: &[Value]) -> Result<usize, StoreError> {
        check_param_count(statement, params)?;
        let p = Params { statement, params };
        let mut table = self.write()?;

        let affected = match statement {
            LeaseStatement::InsertLease => {
                let row = LeaseRow {
                    address: p.blob(0)?.to_vec(),
                    client_id: p.blob(1)?.to_vec(),
                    ia_type: p.code(2)?,
                    ia_id: p.int(3)?,
                    prefix_len: p.opt_code(4)?,
                    state: p.code(5)?,
                    start_time: p.int(6)?,
                    preferred_end_time: p.int(7)?,
                    valid_end_time: p.int(8)?,
                    ia_options: p.opt_blob(9)?.map(<[u8]>::to_vec),
                    binding_options: p.opt_blob(10)?.map(<[u8]>::to_vec),
                };
                if table.rows.contains_key(&row.address) {
                    return Err(StoreError::Conflict(
                        "UNIQUE constraint failed: dhcp_lease.address".to_string(),
                    ));
                }
                let seq = table.next_seq;
                table.next_seq += 1;
                table.rows.insert(row.address.clone(), (seq, row));
                1
            }
            LeaseStatement::UpdateLease | LeaseStatement::UpdateBinding => {
                // All parameters are decoded before the row is touched.
                let state = p.code(0)?;
                let prefix_len = p.opt_code(1)?;
                let (start_time, preferred_end_time, valid_end_time) =
                    (p.int(2)?, p.int(3)?, p.int(4)?);
                let options = match statement {
                    LeaseStatement::UpdateLease => Some((
                        p.opt_blob(5)?.map(<[u8]>::to_vec),
                        p.opt_blob(6)?.map(<[u8]>::to_vec),
                    )),
                    _ => None,
                };
                let address = p.blob(statement.param_count() - 1)?;

                let Some((_, row)) = table.rows.get_mut(address) else {
                    return Ok(0);
                };
                row.state = state;
                row.prefix_len = prefix_len;
                row.start_time = start_time;
                row.preferred_end_time = preferred_end_time;
                row.valid_end_time = valid_end_time;
                if let Some((ia_options, binding_options)) = options {
                    row.ia_options = ia_options;
                    row.binding_options = binding_options;
                }
                1
            }
            LeaseStatement::DeleteLease => {
                usize::from(table.rows.remove(p.blob(0)?).is_some())
            }
            LeaseStatement::DeleteOutsideRanges { ranges: 0 } => {
                return Err(StoreError::invalid_parameters(
                    statement,
                    "refusing to delete without ranges",
                ));
            }
            LeaseStatement::DeleteOutsideRanges { ranges } => {
                let bounds = (0..ranges)
                    .map(|i| Ok((p.blob(2 * i)?, p.blob(2 * i + 1)?)))
                    .collect::<Result<Vec<_>, StoreError>>()?;
                let before = table.rows.len();
                table.rows.retain(|address, _| {
                    bounds
                        .iter()
                        .any(|(start, end)| *start <= address.as_slice() && address.as_slice() <= *end)
                });
                before - table.rows.len()
            }
            _ => {
                return Err(StoreError::invalid_parameters(
                    statement,
                    "statement does not modify rows",
                ));
            }
        };
        Ok(affected)
    }
}

fn in_range<'a>(
    table: &'a Table,
    start: &'a [u8],
    end: &'a [u8],
) -> impl Iterator<Item = &'a LeaseRow> + 'a {
    // Scans in key order; an inverted range matches nothing, as in SQL.
    table
        .rows
        .iter()
        .skip_while(move |(address, _)| address.as_slice() < start)
        .take_while(move |(address, _)| address.as_slice() <= end)
        .map(|(_, (_, row))| row)
}

/// Typed access to positional parameters.
struct Params<'a> {
    statement: LeaseStatement,
    params: &'a [Value],
}

impl<'a> Params<'a> {
    fn get(&self, index: usize) -> Result<&'a Value, StoreError> {
        self.params.get(index).ok_or_else(|| {
            StoreError::invalid_parameters(self.statement, format!("missing parameter {index}"))
        })
    }

    fn mismatch(&self, index: usize, expected: &str) -> StoreError {
        StoreError::invalid_parameters(
            self.statement,
            format!("parameter {index} is not {expected}"),
        )
    }

    fn blob(&self, index: usize) -> Result<&'a [u8], StoreError> {
        self.opt_blob(index)?
            .ok_or_else(|| self.mismatch(index, "a blob"))
    }

    fn opt_blob(&self, index: usize) -> Result<Option<&'a [u8]>, StoreError> {
        match self.get(index)? {
            Value::Blob(b) => Ok(Some(b)),
            Value::Null => Ok(None),
            Value::Integer(_) => Err(self.mismatch(index, "a blob")),
        }
    }

    fn int(&self, index: usize) -> Result<i64, StoreError> {
        match self.get(index)? {
            Value::Integer(i) => Ok(*i),
            _ => Err(self.mismatch(index, "an integer")),
        }
    }

    fn opt_code(&self, index: usize) -> Result<Option<u8>, StoreError> {
        match self.get(index)? {
            Value::Null => Ok(None),
            Value::Integer(i) => {
                u8::try_from(*i)
                    .map(Some)
                    .map_err(|_| self.mismatch(index, "a small integer"))
            }
            Value::Blob(_) => Err(self.mismatch(index, "an integer")),
        }
    }

    fn code(&self, index: usize) -> Result<u8, StoreError> {
        self.opt_code(index)?
            .ok_or_else(|| self.mismatch(index, "a small integer"))
    }
}
