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
//! Flat lease record, the only persisted form of a binding.

use std::net::Ipv6Addr;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::{
    model::{IaKey, IaType, LeaseState},
    option::DhcpOption,
};

/// One stored lease: the fields of a single binding plus the fields of the
/// identity association it belongs to.
///
/// Records sharing `(client_id, ia_type, ia_id)` belong to the same
/// association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    /// Bound address or prefix network address. Unique across the store.
    pub address: Ipv6Addr,
    /// Client identifier of the owning association.
    pub client_id: Bytes,
    /// Type of the owning association.
    pub ia_type: IaType,
    /// Identifier of the owning association.
    pub ia_id: u32,
    /// Set for prefix bindings only.
    pub prefix_len: Option<u8>,
    /// Binding state.
    pub state: LeaseState,
    /// Start of the lease.
    pub start_time: DateTime<Utc>,
    /// End of the preferred lifetime.
    pub preferred_end_time: DateTime<Utc>,
    /// End of the valid lifetime.
    pub valid_end_time: DateTime<Utc>,
    /// Options of the owning association.
    pub ia_options: Vec<DhcpOption>,
    /// Options of this binding.
    pub binding_options: Vec<DhcpOption>,
}

impl LeaseRecord {
    /// Key of the association this record belongs to.
    pub fn key(&self) -> IaKey {
        IaKey {
            client_id: self.client_id.clone(),
            ia_type: self.ia_type,
            ia_id: self.ia_id,
        }
    }

    /// Returns true if the record belongs to the association with the given
    /// key.
    pub fn belongs_to(&self, key: &IaKey) -> bool {
        self.client_id == key.client_id && self.ia_type == key.ia_type && self.ia_id == key.ia_id
    }
}
