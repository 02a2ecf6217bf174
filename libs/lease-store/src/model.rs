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
//! Client-facing binding model.
//!
//! An [IdentityAssoc] groups all addresses or prefixes a client holds under one
//! `(client id, IA type, IA id)` key. Identity associations are reconstructed
//! from stored lease records on every lookup and are never persisted as such.

use std::{fmt, net::Ipv6Addr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::option::DhcpOption;

/// A stored code does not map to a known variant.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("unknown {kind} code {code}")]
pub struct UnknownCode {
    /// Name of the coded type.
    pub kind: &'static str,
    /// The unknown code.
    pub code: u8,
}

/// Creates an enum stored as a small integer code, with conversions in both
/// directions. Unknown codes are rejected.
macro_rules! coded_enum {
    (
        $(#[$outer:meta])*
        pub enum $name:ident ($kind:literal) {
            $($(#[$doc:meta])* $variant:ident = $value:literal),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($(#[$doc])* $variant = $value,)*
        }

        impl TryFrom<u8> for $name {
            type Error = UnknownCode;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                match code {
                    $($value => Ok(Self::$variant),)*
                    code => Err(UnknownCode { kind: $kind, code }),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                value as u8
            }
        }
    };
}

coded_enum! {
    /// Binding category of an identity association.
    pub enum IaType ("IA type") {
        /// Non-temporary addresses (IA_NA).
        NonTemporary = 0,
        /// Temporary addresses (IA_TA).
        Temporary = 1,
        /// Delegated prefixes (IA_PD).
        PrefixDelegation = 2,
    }
}

coded_enum! {
    /// Lifecycle state of an identity association or one of its bindings.
    ///
    /// Candidate scans order by the stored code.
    pub enum LeaseState ("lease state") {
        /// Tentatively offered, not yet confirmed by the client.
        Advertised = 1,
        /// Bound to the client.
        Committed = 2,
        /// Valid lifetime has passed.
        Expired = 3,
        /// Given back by the client.
        Released = 4,
        /// Declined by the client as already in use.
        Declined = 5,
        /// Statically assigned.
        Static = 6,
    }
}

impl IaType {
    /// Short name used on the command line and in serialized forms.
    pub fn as_str(&self) -> &'static str {
        match self {
            IaType::NonTemporary => "na",
            IaType::Temporary => "ta",
            IaType::PrefixDelegation => "pd",
        }
    }
}

impl fmt::Display for IaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IaType {
    type Err = UnknownIaTypeName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "na" | "ia_na" => Ok(IaType::NonTemporary),
            "ta" | "ia_ta" => Ok(IaType::Temporary),
            "pd" | "ia_pd" => Ok(IaType::PrefixDelegation),
            _ => Err(UnknownIaTypeName(s.to_string())),
        }
    }
}

/// The string does not name an IA type.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown IA type '{0}', expected one of na, ta, pd")]
pub struct UnknownIaTypeName(pub String);

impl LeaseState {
    /// Returns true for states whose bindings may be handed out again right
    /// away.
    pub fn is_reusable(&self) -> bool {
        matches!(self, LeaseState::Expired | LeaseState::Released)
    }

    /// Returns true for states in which the lifetime ordering must hold.
    pub fn is_active(&self) -> bool {
        matches!(self, LeaseState::Advertised | LeaseState::Committed)
    }

    /// Short name used in serialized forms.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseState::Advertised => "advertised",
            LeaseState::Committed => "committed",
            LeaseState::Expired => "expired",
            LeaseState::Released => "released",
            LeaseState::Declined => "declined",
            LeaseState::Static => "static",
        }
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeaseState {
    type Err = UnknownLeaseStateName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "advertised" => Ok(LeaseState::Advertised),
            "committed" => Ok(LeaseState::Committed),
            "expired" => Ok(LeaseState::Expired),
            "released" => Ok(LeaseState::Released),
            "declined" => Ok(LeaseState::Declined),
            "static" => Ok(LeaseState::Static),
            _ => Err(UnknownLeaseStateName(s.to_string())),
        }
    }
}

/// The string does not name a lease state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown lease state '{0}'")]
pub struct UnknownLeaseStateName(pub String);

/// Key of an identity association.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IaKey {
    /// Opaque client identifier (DUID).
    pub client_id: Bytes,
    /// Binding category.
    pub ia_type: IaType,
    /// Client chosen identifier scoping the association.
    pub ia_id: u32,
}

impl IaKey {
    /// Creates a new key.
    pub fn new(client_id: impl Into<Bytes>, ia_type: IaType, ia_id: u32) -> Self {
        Self {
            client_id: client_id.into(),
            ia_type,
            ia_id,
        }
    }
}

impl fmt::Display for IaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            hex::encode(&self.client_id),
            self.ia_type,
            self.ia_id
        )
    }
}

/// Distinguishes address bindings from prefix bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// A single address.
    Address,
    /// A delegated prefix.
    Prefix {
        /// Length of the delegated prefix in bits.
        prefix_len: u8,
    },
}

impl BindingKind {
    /// The prefix length for prefix bindings.
    pub fn prefix_len(&self) -> Option<u8> {
        match self {
            BindingKind::Address => None,
            BindingKind::Prefix { prefix_len } => Some(*prefix_len),
        }
    }
}

/// One bound address or prefix of an identity association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaBinding {
    /// The bound address, or the prefix's network address.
    pub address: Ipv6Addr,
    /// Address or prefix.
    pub kind: BindingKind,
    /// Lifecycle state.
    pub state: LeaseState,
    /// Start of the lease.
    pub start_time: DateTime<Utc>,
    /// End of the preferred lifetime.
    pub preferred_end_time: DateTime<Utc>,
    /// End of the valid lifetime.
    pub valid_end_time: DateTime<Utc>,
    /// Options attached to this binding.
    pub options: Vec<DhcpOption>,
}

impl IaBinding {
    /// Creates an address binding without options.
    pub fn address(
        address: Ipv6Addr,
        state: LeaseState,
        start_time: DateTime<Utc>,
        preferred_end_time: DateTime<Utc>,
        valid_end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            kind: BindingKind::Address,
            state,
            start_time,
            preferred_end_time,
            valid_end_time,
            options: Vec::new(),
        }
    }

    /// Creates a prefix binding without options.
    pub fn prefix(
        address: Ipv6Addr,
        prefix_len: u8,
        state: LeaseState,
        start_time: DateTime<Utc>,
        preferred_end_time: DateTime<Utc>,
        valid_end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: BindingKind::Prefix { prefix_len },
            ..Self::address(
                address,
                state,
                start_time,
                preferred_end_time,
                valid_end_time,
            )
        }
    }

    /// Attaches options to the binding.
    pub fn with_options(mut self, options: Vec<DhcpOption>) -> Self {
        self.options = options;
        self
    }

    /// Returns true if valid end >= preferred end >= start.
    pub fn has_consistent_lifetimes(&self) -> bool {
        self.valid_end_time >= self.preferred_end_time && self.preferred_end_time >= self.start_time
    }

    /// Returns true if this is a prefix binding.
    pub fn is_prefix(&self) -> bool {
        matches!(self.kind, BindingKind::Prefix { .. })
    }
}

/// A client's group of bindings under one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAssoc {
    /// Key of the association.
    pub key: IaKey,
    /// Lifecycle state of the association.
    pub state: LeaseState,
    /// Options attached to the association as a whole.
    pub options: Vec<DhcpOption>,
    /// Bindings in record order.
    pub bindings: Vec<IaBinding>,
}

impl IdentityAssoc {
    /// Creates an identity association without options or bindings.
    pub fn new(key: IaKey, state: LeaseState) -> Self {
        Self {
            key,
            state,
            options: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Attaches options to the association.
    pub fn with_options(mut self, options: Vec<DhcpOption>) -> Self {
        self.options = options;
        self
    }

    /// Adds a binding.
    pub fn with_binding(mut self, binding: IaBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Returns the binding for the given address, if any.
    pub fn binding(&self, address: Ipv6Addr) -> Option<&IaBinding> {
        self.bindings.iter().find(|b| b.address == address)
    }
}
