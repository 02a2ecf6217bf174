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
//! Conversion between identity associations and flat lease records.

use crate::{
    model::{BindingKind, IaBinding, IdentityAssoc},
    record::LeaseRecord,
};

/// Fans an identity association out into one record per binding.
///
/// An association without bindings yields no records.
pub fn to_lease_records(ia: &IdentityAssoc) -> Vec<LeaseRecord> {
    if ia.bindings.is_empty() {
        tracing::warn!(ia = %ia.key, "Identity association has no bindings");
        return Vec::new();
    }
    ia.bindings
        .iter()
        .map(|binding| to_lease_record(ia, binding))
        .collect()
}

/// Creates the record for one binding of an identity association.
pub fn to_lease_record(ia: &IdentityAssoc, binding: &IaBinding) -> LeaseRecord {
    LeaseRecord {
        address: binding.address,
        client_id: ia.key.client_id.clone(),
        ia_type: ia.key.ia_type,
        ia_id: ia.key.ia_id,
        prefix_len: binding.kind.prefix_len(),
        state: binding.state,
        start_time: binding.start_time,
        preferred_end_time: binding.preferred_end_time,
        valid_end_time: binding.valid_end_time,
        ia_options: ia.options.clone(),
        binding_options: binding.options.clone(),
    }
}

/// Folds records into one identity association.
///
/// The first record supplies the association level fields. The remaining
/// records are assumed to share them and only contribute their binding.
/// Returns `None` if there are no records.
pub fn to_identity_assoc<I>(records: I) -> Option<IdentityAssoc>
where
    I: IntoIterator<Item = LeaseRecord>,
{
    let mut records = records.into_iter();
    let first = records.next()?;

    // There is no association state column; the first binding's state stands in.
    let mut ia = IdentityAssoc::new(first.key(), first.state).with_options(first.ia_options.clone());
    ia.bindings.push(to_binding(first));
    ia.bindings.extend(records.map(to_binding));
    Some(ia)
}

/// Reconstructs a binding from its record. Records with a prefix length
/// become prefix bindings.
pub fn to_binding(record: LeaseRecord) -> IaBinding {
    let kind = match record.prefix_len {
        Some(prefix_len) => BindingKind::Prefix { prefix_len },
        None => BindingKind::Address,
    };
    IaBinding {
        address: record.address,
        kind,
        state: record.state,
        start_time: record.start_time,
        preferred_end_time: record.preferred_end_time,
        valid_end_time: record.valid_end_time,
        options: record.binding_options,
    }
}
