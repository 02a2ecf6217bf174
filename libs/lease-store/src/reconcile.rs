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
//! Removal of leases outside the configured address pools.

use std::{fmt, net::Ipv6Addr};

use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{LeaseStatement, LeaseStore, StoreError, row::address_param};

/// An inclusive range of addresses, describing one configured pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AddressRangeRepr", into = "AddressRangeRepr")]
pub struct AddressRange {
    start: Ipv6Addr,
    end: Ipv6Addr,
}

/// The range end lies before its start.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("range end {end} lies before start {start}")]
pub struct InvertedRange {
    /// Requested start.
    pub start: Ipv6Addr,
    /// Requested end.
    pub end: Ipv6Addr,
}

impl AddressRange {
    /// Creates the range `[start, end]`.
    pub fn new(start: Ipv6Addr, end: Ipv6Addr) -> Result<Self, InvertedRange> {
        if end < start {
            return Err(InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First address of the range.
    pub fn start(&self) -> Ipv6Addr {
        self.start
    }

    /// Last address of the range.
    pub fn end(&self) -> Ipv6Addr {
        self.end
    }

    /// Returns true if the address lies within the range.
    pub fn contains(&self, address: Ipv6Addr) -> bool {
        self.start <= address && address <= self.end
    }
}

impl From<Ipv6Net> for AddressRange {
    fn from(prefix: Ipv6Net) -> Self {
        Self {
            start: prefix.network(),
            end: prefix.broadcast(),
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Serialized forms of a range: explicit bounds or a prefix.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AddressRangeRepr {
    Bounds { start: Ipv6Addr, end: Ipv6Addr },
    Prefix(Ipv6Net),
}

impl TryFrom<AddressRangeRepr> for AddressRange {
    type Error = InvertedRange;

    fn try_from(value: AddressRangeRepr) -> Result<Self, Self::Error> {
        match value {
            AddressRangeRepr::Bounds { start, end } => AddressRange::new(start, end),
            AddressRangeRepr::Prefix(prefix) => Ok(prefix.into()),
        }
    }
}

impl From<AddressRange> for AddressRangeRepr {
    fn from(range: AddressRange) -> Self {
        AddressRangeRepr::Bounds {
            start: range.start,
            end: range.end,
        }
    }
}

/// Deletes every lease whose address lies outside all given ranges.
///
/// Without ranges nothing is deleted. Returns the number of deleted leases.
pub fn reconcile_ia_addresses<S>(store: &S, ranges: &[AddressRange]) -> Result<usize, StoreError>
where
    S: LeaseStore + ?Sized,
{
    if ranges.is_empty() {
        tracing::warn!("No address ranges configured, skipping lease reconciliation");
        return Ok(0);
    }

    let params: Vec<_> = ranges
        .iter()
        .flat_map(|range| [address_param(range.start), address_param(range.end)])
        .collect();
    let deleted = store.execute(
        LeaseStatement::DeleteOutsideRanges {
            ranges: ranges.len(),
        },
        &params,
    )?;

    tracing::info!(
        ranges = ranges.len(),
        deleted,
        "Reconciled leases against configured ranges"
    );
    Ok(deleted)
}
