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
//! Mapping between lease records and stored rows / bind parameters.

use std::net::Ipv6Addr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    model::{IaBinding, IaType, LeaseState},
    option::{decode_options, encode_options},
    record::LeaseRecord,
    store::{LeaseRow, MalformedRowError, Value},
};

const MAX_PREFIX_LEN: u8 = 128;

/// The timestamp is outside the storable range (years 1677 to 2262).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("timestamp {0} cannot be stored")]
pub struct TimestampOutOfRange(pub DateTime<Utc>);

/// Storage form of an address.
pub fn address_param(address: Ipv6Addr) -> Value {
    Value::Blob(address.octets().to_vec())
}

/// Storage form of a timestamp: nanoseconds since the Unix epoch.
pub fn timestamp_param(time: DateTime<Utc>) -> Result<Value, TimestampOutOfRange> {
    time.timestamp_nanos_opt()
        .map(Value::Integer)
        .ok_or(TimestampOutOfRange(time))
}

/// Parses stored address bytes.
pub fn address_from_bytes(bytes: &[u8]) -> Result<Ipv6Addr, MalformedRowError> {
    let octets: [u8; 16] = bytes
        .try_into()
        .map_err(|_| MalformedRowError::InvalidAddressLength(bytes.len()))?;
    Ok(Ipv6Addr::from(octets))
}

/// Parameters of [crate::store::LeaseStatement::InsertLease].
pub fn insert_params(record: &LeaseRecord) -> Result<Vec<Value>, TimestampOutOfRange> {
    Ok(vec![
        address_param(record.address),
        Value::Blob(record.client_id.to_vec()),
        u8::from(record.ia_type).into(),
        i64::from(record.ia_id).into(),
        record.prefix_len.into(),
        u8::from(record.state).into(),
        timestamp_param(record.start_time)?,
        timestamp_param(record.preferred_end_time)?,
        timestamp_param(record.valid_end_time)?,
        encode_options(&record.ia_options).into(),
        encode_options(&record.binding_options).into(),
    ])
}

/// Parameters of [crate::store::LeaseStatement::UpdateLease].
pub fn update_params(record: &LeaseRecord) -> Result<Vec<Value>, TimestampOutOfRange> {
    Ok(vec![
        u8::from(record.state).into(),
        record.prefix_len.into(),
        timestamp_param(record.start_time)?,
        timestamp_param(record.preferred_end_time)?,
        timestamp_param(record.valid_end_time)?,
        encode_options(&record.ia_options).into(),
        encode_options(&record.binding_options).into(),
        address_param(record.address),
    ])
}

/// Parameters of [crate::store::LeaseStatement::UpdateBinding].
pub fn update_binding_params(binding: &IaBinding) -> Result<Vec<Value>, TimestampOutOfRange> {
    Ok(vec![
        u8::from(binding.state).into(),
        binding.kind.prefix_len().into(),
        timestamp_param(binding.start_time)?,
        timestamp_param(binding.preferred_end_time)?,
        timestamp_param(binding.valid_end_time)?,
        address_param(binding.address),
    ])
}

/// Validates a stored row and turns it into a lease record.
pub fn record_from_row(row: LeaseRow) -> Result<LeaseRecord, MalformedRowError> {
    let address = address_from_bytes(&row.address)?;
    let ia_id = u32::try_from(row.ia_id).map_err(|_| MalformedRowError::IaIdOutOfRange(row.ia_id))?;
    if let Some(prefix_len) = row.prefix_len.filter(|len| *len > MAX_PREFIX_LEN) {
        return Err(MalformedRowError::InvalidPrefixLength(prefix_len));
    }

    Ok(LeaseRecord {
        address,
        client_id: Bytes::from(row.client_id),
        ia_type: IaType::try_from(row.ia_type)?,
        ia_id,
        prefix_len: row.prefix_len,
        state: LeaseState::try_from(row.state)?,
        start_time: DateTime::from_timestamp_nanos(row.start_time),
        preferred_end_time: DateTime::from_timestamp_nanos(row.preferred_end_time),
        valid_end_time: DateTime::from_timestamp_nanos(row.valid_end_time),
        ia_options: decode_options(row.ia_options.as_deref())?,
        binding_options: decode_options(row.binding_options.as_deref())?,
    })
}
