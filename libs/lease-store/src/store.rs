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
//! Backing store access.
//!
//! The repository talks to storage through [LeaseStore]: a statement is bound
//! to positional parameters, executed, and the resulting rows are returned.
//! Every statement the repository issues is named by [LeaseStatement], which
//! also fixes the order of its parameters.
//!
//! Two engines are provided: [sqlite::SqliteLeaseStore] and the in-memory
//! [memory::MemoryLeaseStore]. Both order addresses byte-wise.

use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::{model::UnknownCode, option::OptionDecodeError};

pub mod memory;
pub mod row;
pub mod sqlite;

/// A statement the repository executes against the store.
///
/// Addresses are bound as 16 byte blobs, timestamps as nanoseconds since the
/// Unix epoch (UTC), codes and ids as integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatement {
    /// Inserts a lease.
    ///
    /// Params: address, client id, IA type, IA id, prefix length, state,
    /// start, preferred end, valid end, IA options, binding options.
    InsertLease,
    /// Updates all mutable fields of the lease with the given address.
    ///
    /// Params: state, prefix length, start, preferred end, valid end, IA
    /// options, binding options, address.
    UpdateLease,
    /// Updates state and lifetimes of the lease with the given address, leaving
    /// options untouched.
    ///
    /// Params: state, prefix length, start, preferred end, valid end, address.
    UpdateBinding,
    /// Deletes the lease with the given address.
    ///
    /// Params: address.
    DeleteLease,
    /// Selects all leases of an identity association in insertion order.
    ///
    /// Params: client id, IA type, IA id.
    SelectByIa,
    /// Selects the lease with the given address.
    ///
    /// Params: address.
    SelectByAddress,
    /// Selects all leases with `start <= address <= end`, ordered by address.
    ///
    /// Params: start, end.
    SelectAddressRange,
    /// Selects reusable leases with `start <= address <= end`: advertised
    /// before the cutoff, expired or released. Ordered by state, valid end and
    /// address. Restricted to prefix rows if `prefixes` is set and to address
    /// rows otherwise.
    ///
    /// Params: offer cutoff, start, end.
    SelectUnused {
        /// Select prefix rows instead of address rows.
        prefixes: bool,
    },
    /// Selects leases of an IA type whose valid lifetime ended before the
    /// given instant, ordered by valid end and address.
    ///
    /// Params: IA type, now.
    SelectExpired,
    /// Deletes all leases outside every one of the given ranges.
    ///
    /// Params: start and end of each range.
    DeleteOutsideRanges {
        /// Number of ranges bound.
        ranges: usize,
    },
}

impl LeaseStatement {
    /// Number of positional parameters the statement expects.
    pub fn param_count(&self) -> usize {
        match self {
            LeaseStatement::InsertLease => 11,
            LeaseStatement::UpdateLease => 8,
            LeaseStatement::UpdateBinding => 6,
            LeaseStatement::DeleteLease | LeaseStatement::SelectByAddress => 1,
            LeaseStatement::SelectByIa | LeaseStatement::SelectUnused { .. } => 3,
            LeaseStatement::SelectAddressRange | LeaseStatement::SelectExpired => 2,
            LeaseStatement::DeleteOutsideRanges { ranges } => ranges * 2,
        }
    }

    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            LeaseStatement::InsertLease => "insert_lease",
            LeaseStatement::UpdateLease => "update_lease",
            LeaseStatement::UpdateBinding => "update_binding",
            LeaseStatement::DeleteLease => "delete_lease",
            LeaseStatement::SelectByIa => "select_by_ia",
            LeaseStatement::SelectByAddress => "select_by_address",
            LeaseStatement::SelectAddressRange => "select_address_range",
            LeaseStatement::SelectUnused { prefixes: false } => "select_unused_addresses",
            LeaseStatement::SelectUnused { prefixes: true } => "select_unused_prefixes",
            LeaseStatement::SelectExpired => "select_expired",
            LeaseStatement::DeleteOutsideRanges { .. } => "delete_outside_ranges",
        }
    }
}

impl fmt::Display for LeaseStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A bind parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// A signed 64-bit integer.
    Integer(i64),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Value::Integer(value.into())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A persisted lease row as stored, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRow {
    /// Address bytes, the primary key.
    pub address: Vec<u8>,
    /// Client identifier.
    pub client_id: Vec<u8>,
    /// IA type code.
    pub ia_type: u8,
    /// IA identifier, widened.
    pub ia_id: i64,
    /// Prefix length, prefix rows only.
    pub prefix_len: Option<u8>,
    /// Lease state code.
    pub state: u8,
    /// Start time, nanoseconds since the Unix epoch.
    pub start_time: i64,
    /// Preferred end time, nanoseconds since the Unix epoch.
    pub preferred_end_time: i64,
    /// Valid end time, nanoseconds since the Unix epoch.
    pub valid_end_time: i64,
    /// Encoded IA options.
    pub ia_options: Option<Vec<u8>>,
    /// Encoded binding options.
    pub binding_options: Option<Vec<u8>>,
}

/// A stored row that cannot be turned into a lease record.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MalformedRowError {
    /// The address column does not hold 16 bytes.
    #[error("address of {0} bytes is not an IPv6 address")]
    InvalidAddressLength(usize),
    /// A code column holds an unknown value.
    #[error(transparent)]
    UnknownCode(#[from] UnknownCode),
    /// A code column holds a value wider than a byte.
    #[error("stored code {0} out of range")]
    CodeOutOfRange(i64),
    /// The IA id does not fit 32 bits.
    #[error("IA id {0} out of range")]
    IaIdOutOfRange(i64),
    /// The prefix length exceeds 128.
    #[error("prefix length {0} out of range")]
    InvalidPrefixLength(u8),
    /// An option buffer is corrupt.
    #[error("invalid option buffer: {0}")]
    InvalidOptions(#[from] OptionDecodeError),
}

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage engine failed.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A uniqueness constraint was violated, e.g. by two concurrent claims of
    /// the same address.
    #[error("conflicting lease: {0}")]
    Conflict(String),
    /// A returned row is malformed.
    #[error("malformed lease row: {0}")]
    MalformedRow(#[from] MalformedRowError),
    /// The parameters do not fit the statement.
    #[error("invalid parameters for {statement}: {detail}")]
    InvalidParameters {
        /// The statement.
        statement: LeaseStatement,
        /// What is wrong.
        detail: String,
    },
}

impl StoreError {
    pub(crate) fn invalid_parameters(statement: LeaseStatement, detail: impl Into<String>) -> Self {
        StoreError::InvalidParameters {
            statement,
            detail: detail.into(),
        }
    }
}

/// A persistence engine for lease rows.
///
/// Each call is an independent unit of work. Implementations must be safe to
/// call from multiple threads; single-row mutations must be atomic.
pub trait LeaseStore: Send + Sync {
    /// Executes a selecting statement and returns the matching rows.
    fn query(&self, statement: LeaseStatement, params: &[Value])
    -> Result<Vec<LeaseRow>, StoreError>;

    /// Executes a mutating statement and returns the number of affected rows.
    fn execute(&self, statement: LeaseStatement, params: &[Value]) -> Result<usize, StoreError>;
}

impl<S: LeaseStore + ?Sized> LeaseStore for Arc<S> {
    fn query(
        &self,
        statement: LeaseStatement,
        params: &[Value],
    ) -> Result<Vec<LeaseRow>, StoreError> {
        (**self).query(statement, params)
    }

    fn execute(&self, statement: LeaseStatement, params: &[Value]) -> Result<usize, StoreError> {
        (**self).execute(statement, params)
    }
}

pub(crate) fn check_param_count(
    statement: LeaseStatement,
    params: &[Value],
) -> Result<(), StoreError> {
    if params.len() != statement.param_count() {
        return Err(StoreError::invalid_parameters(
            statement,
            format!(
                "expected {} parameters, got {}",
                statement.param_count(),
                params.len()
            ),
        ));
    }
    Ok(())
}
