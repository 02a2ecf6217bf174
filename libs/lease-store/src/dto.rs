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
//! Data transfer objects (DTOs) for identity associations.

use std::net::Ipv6Addr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    model::{BindingKind, IaBinding, IaKey, IdentityAssoc},
    option::DhcpOption,
};

/// An identity association with all its bindings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IdentityAssocDto {
    /// Hex encoded client identifier.
    pub client_id: String,
    /// IA type: `na`, `ta` or `pd`.
    pub ia_type: String,
    /// IA identifier.
    pub ia_id: u32,
    /// Lease state name.
    pub state: String,
    /// IA level options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<DhcpOptionDto>,
    /// Bound addresses and prefixes.
    pub bindings: Vec<IaBindingDto>,
}

/// A bound address or prefix.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IaBindingDto {
    /// The address, or the network address of a prefix.
    pub address: Ipv6Addr,
    /// Prefix length, for prefixes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_len: Option<u8>,
    /// Lease state name.
    pub state: String,
    /// Start of the lease, RFC 3339.
    pub start_time: DateTime<Utc>,
    /// End of the preferred lifetime, RFC 3339.
    pub preferred_end_time: DateTime<Utc>,
    /// End of the valid lifetime, RFC 3339.
    pub valid_end_time: DateTime<Utc>,
    /// Binding options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<DhcpOptionDto>,
}

/// A DHCPv6 option.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DhcpOptionDto {
    /// Option code.
    pub code: u16,
    /// Hex encoded option value.
    pub value: String,
}

impl From<&IdentityAssoc> for IdentityAssocDto {
    fn from(ia: &IdentityAssoc) -> Self {
        IdentityAssocDto {
            client_id: hex::encode(&ia.key.client_id),
            ia_type: ia.key.ia_type.to_string(),
            ia_id: ia.key.ia_id,
            state: ia.state.to_string(),
            options: ia.options.iter().map(From::from).collect(),
            bindings: ia.bindings.iter().map(From::from).collect(),
        }
    }
}

impl TryFrom<IdentityAssocDto> for IdentityAssoc {
    type Error = anyhow::Error;

    fn try_from(value: IdentityAssocDto) -> Result<Self, Self::Error> {
        let client_id = hex::decode(&value.client_id).context("invalid client id")?;
        let key = IaKey::new(client_id, value.ia_type.parse()?, value.ia_id);
        let bindings = value
            .bindings
            .into_iter()
            .map(|b| {
                let address = b.address;
                IaBinding::try_from(b).with_context(|| format!("invalid binding {address}"))
            })
            .collect::<Result<_, Self::Error>>()?;

        Ok(IdentityAssoc {
            key,
            state: value.state.parse()?,
            options: options_from_dtos(value.options)?,
            bindings,
        })
    }
}

impl From<&IaBinding> for IaBindingDto {
    fn from(binding: &IaBinding) -> Self {
        IaBindingDto {
            address: binding.address,
            prefix_len: binding.kind.prefix_len(),
            state: binding.state.to_string(),
            start_time: binding.start_time,
            preferred_end_time: binding.preferred_end_time,
            valid_end_time: binding.valid_end_time,
            options: binding.options.iter().map(From::from).collect(),
        }
    }
}

impl TryFrom<IaBindingDto> for IaBinding {
    type Error = anyhow::Error;

    fn try_from(value: IaBindingDto) -> Result<Self, Self::Error> {
        let kind = match value.prefix_len {
            Some(prefix_len) if prefix_len > 128 => {
                anyhow::bail!("prefix length {prefix_len} out of range")
            }
            Some(prefix_len) => BindingKind::Prefix { prefix_len },
            None => BindingKind::Address,
        };
        Ok(IaBinding {
            address: value.address,
            kind,
            state: value.state.parse()?,
            start_time: value.start_time,
            preferred_end_time: value.preferred_end_time,
            valid_end_time: value.valid_end_time,
            options: options_from_dtos(value.options)?,
        })
    }
}

impl From<&DhcpOption> for DhcpOptionDto {
    fn from(option: &DhcpOption) -> Self {
        DhcpOptionDto {
            code: option.code(),
            value: hex::encode(option.value()),
        }
    }
}

impl TryFrom<DhcpOptionDto> for DhcpOption {
    type Error = anyhow::Error;

    fn try_from(value: DhcpOptionDto) -> Result<Self, Self::Error> {
        let bytes = hex::decode(&value.value)
            .with_context(|| format!("invalid value of option {}", value.code))?;
        Ok(DhcpOption::new(value.code, bytes)?)
    }
}

fn options_from_dtos(options: Vec<DhcpOptionDto>) -> anyhow::Result<Vec<DhcpOption>> {
    options.into_iter().map(TryInto::try_into).collect()
}
