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
//! Lease repository.
//!
//! Stores identity associations as one lease row per binding and rebuilds
//! them on lookup. Every mutation of a single binding is an independent store
//! operation: multi-binding calls are not atomic and may be applied partially
//! if the store fails midway. All per-binding mutations are keyed by address,
//! so retrying them is safe.

use std::{net::Ipv6Addr, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::{
    clock::{Clock, SystemClock},
    model::{IaBinding, IaKey, IaType, IdentityAssoc},
    reconcile::{self, AddressRange},
    record::LeaseRecord,
    store::{
        LeaseRow, LeaseStatement, LeaseStore, StoreError, Value,
        row::{self, TimestampOutOfRange},
    },
    translate,
};

/// How long an advertised binding is held for the client before it may be
/// offered to someone else.
pub const DEFAULT_OFFER_HOLD: Duration = Duration::from_millis(120_000);

/// Lease repository errors.
#[derive(Debug, Error)]
pub enum LeaseStoreError {
    /// The backing store failed or returned unreadable data.
    #[error("store operation failed: {0}")]
    StoreOperationFailed(#[from] StoreError),
    /// The lease to update does not exist (anymore).
    #[error("no lease for {0}")]
    NoSuchLease(Ipv6Addr),
    /// An active binding's lifetimes are not ordered start <= preferred <= valid.
    #[error("inconsistent lifetimes for {0}")]
    InconsistentLifetimes(Ipv6Addr),
    /// A timestamp cannot be persisted.
    #[error(transparent)]
    TimestampOutOfRange(#[from] TimestampOutOfRange),
}

impl LeaseStoreError {
    /// Returns true if the operation lost a race against a concurrent writer,
    /// i.e. the address was claimed or removed in the meantime. Such failures
    /// may be retried after re-reading the current state.
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            LeaseStoreError::NoSuchLease(_)
                | LeaseStoreError::StoreOperationFailed(StoreError::Conflict(_))
        )
    }
}

/// Persistent access to identity associations and their bindings.
#[derive(Debug)]
pub struct LeaseRepository<S> {
    store: S,
    clock: Arc<dyn Clock>,
    offer_hold: Duration,
}

impl<S: LeaseStore> LeaseRepository<S> {
    /// Creates a repository on the given store, using the system clock.
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            offer_hold: DEFAULT_OFFER_HOLD,
        }
    }

    /// Set the clock used for expiry and offer hold decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set how long advertised bindings are held.
    pub fn with_offer_hold(mut self, offer_hold: Duration) -> Self {
        self.offer_hold = offer_hold;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The configured offer hold window.
    pub fn offer_hold(&self) -> Duration {
        self.offer_hold
    }

    /// Persists every binding of a new identity association.
    ///
    /// Fails with a retryable conflict if one of the addresses is already
    /// leased. Bindings inserted before the failure remain stored.
    pub fn create_ia(&self, ia: &IdentityAssoc) -> Result<(), LeaseStoreError> {
        ia.bindings.iter().try_for_each(check_lifetimes)?;
        for record in translate::to_lease_records(ia) {
            self.insert(&record)?;
        }
        tracing::debug!(ia = %ia.key, bindings = ia.bindings.len(), "Created identity association");
        Ok(())
    }

    /// Applies a change set to an identity association.
    ///
    /// `add` bindings are inserted, `update` bindings overwrite the lease with
    /// the same address and `delete` bindings are removed. IA level options of
    /// `ia` are written to every added or updated lease.
    pub fn update_ia(
        &self,
        ia: &IdentityAssoc,
        add: &[IaBinding],
        update: &[IaBinding],
        delete: &[IaBinding],
    ) -> Result<(), LeaseStoreError> {
        add.iter()
            .chain(update)
            .try_for_each(check_lifetimes)?;

        for binding in add {
            self.insert(&translate::to_lease_record(ia, binding))?;
        }
        for binding in update {
            let record = translate::to_lease_record(ia, binding);
            let affected = self
                .store
                .execute(LeaseStatement::UpdateLease, &row::update_params(&record)?)?;
            if affected == 0 {
                return Err(LeaseStoreError::NoSuchLease(binding.address));
            }
        }
        for binding in delete {
            self.delete_lease(binding.address)?;
        }

        tracing::debug!(
            ia = %ia.key,
            added = add.len(),
            updated = update.len(),
            deleted = delete.len(),
            "Updated identity association"
        );
        Ok(())
    }

    /// Removes every binding of an identity association.
    pub fn delete_ia(&self, ia: &IdentityAssoc) -> Result<(), LeaseStoreError> {
        for binding in &ia.bindings {
            self.delete_lease(binding.address)?;
        }
        tracing::debug!(ia = %ia.key, bindings = ia.bindings.len(), "Deleted identity association");
        Ok(())
    }

    /// Updates state and lifetimes of a single binding, leaving its options
    /// untouched.
    pub fn update_binding(&self, binding: &IaBinding) -> Result<(), LeaseStoreError> {
        check_lifetimes(binding)?;
        let affected = self.store.execute(
            LeaseStatement::UpdateBinding,
            &row::update_binding_params(binding)?,
        )?;
        if affected == 0 {
            return Err(LeaseStoreError::NoSuchLease(binding.address));
        }
        tracing::debug!(address = %binding.address, state = %binding.state, "Updated binding");
        Ok(())
    }

    /// Removes a single binding. Removing an absent binding is not an error.
    pub fn delete_binding(&self, binding: &IaBinding) -> Result<(), LeaseStoreError> {
        self.delete_lease(binding.address)
    }

    /// Loads the identity association with the given key.
    pub fn find_ia(&self, key: &IaKey) -> Result<Option<IdentityAssoc>, LeaseStoreError> {
        let records = self.records_of(key)?;
        tracing::debug!(ia = %key, bindings = records.len(), "Looked up identity association");
        Ok(translate::to_identity_assoc(records))
    }

    /// Loads the identity association holding `address`.
    ///
    /// With `all_bindings` the association carries all of its bindings, the
    /// one for `address` first. Otherwise it carries only that one.
    pub fn find_ia_by_address(
        &self,
        address: Ipv6Addr,
        all_bindings: bool,
    ) -> Result<Option<IdentityAssoc>, LeaseStoreError> {
        let rows = self
            .store
            .query(LeaseStatement::SelectByAddress, &[row::address_param(address)])?;
        let Some(anchor) = rows.into_iter().next().map(to_record).transpose()? else {
            tracing::debug!(%address, "No lease for address");
            return Ok(None);
        };

        if !all_bindings {
            return Ok(translate::to_identity_assoc([anchor]));
        }

        let anchor_address = anchor.address;
        let others = self
            .records_of(&anchor.key())?
            .into_iter()
            .filter(move |record| record.address != anchor_address);
        Ok(translate::to_identity_assoc(
            std::iter::once(anchor).chain(others),
        ))
    }

    /// Returns every leased address within `[start, end]` in ascending order.
    pub fn find_existing_ips(
        &self,
        start: Ipv6Addr,
        end: Ipv6Addr,
    ) -> Result<Vec<Ipv6Addr>, LeaseStoreError> {
        let rows = self.store.query(
            LeaseStatement::SelectAddressRange,
            &[row::address_param(start), row::address_param(end)],
        )?;
        let addresses = rows
            .iter()
            .map(|row| row::address_from_bytes(&row.address))
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        tracing::debug!(%start, %end, count = addresses.len(), "Listed leased addresses");
        Ok(addresses)
    }

    /// Returns address bindings within `[start, end]` that may be handed out
    /// again: offers older than the hold window, expired and released leases.
    ///
    /// Candidates are ordered by state, valid end and address and carry no
    /// options.
    pub fn find_unused_ia_addresses(
        &self,
        start: Ipv6Addr,
        end: Ipv6Addr,
    ) -> Result<Vec<IaBinding>, LeaseStoreError> {
        self.find_unused(start, end, false)
    }

    /// Like [Self::find_unused_ia_addresses], for delegated prefixes whose
    /// network address lies within `[start, end]`.
    pub fn find_unused_ia_prefixes(
        &self,
        start: Ipv6Addr,
        end: Ipv6Addr,
    ) -> Result<Vec<IaBinding>, LeaseStoreError> {
        self.find_unused(start, end, true)
    }

    /// Returns the bindings of the given IA type whose valid lifetime has
    /// ended, earliest first. The bindings carry no options.
    pub fn find_expired_ia_addresses(
        &self,
        ia_type: IaType,
    ) -> Result<Vec<IaBinding>, LeaseStoreError> {
        let now = self.clock.now();
        let rows = self.store.query(
            LeaseStatement::SelectExpired,
            &[u8::from(ia_type).into(), row::timestamp_param(now)?],
        )?;
        let expired = candidates(rows)?;
        tracing::debug!(%ia_type, count = expired.len(), "Found expired bindings");
        Ok(expired)
    }

    /// Returns the delegated prefixes whose valid lifetime has ended.
    pub fn find_expired_ia_prefixes(&self) -> Result<Vec<IaBinding>, LeaseStoreError> {
        self.find_expired_ia_addresses(IaType::PrefixDelegation)
    }

    /// Deletes every lease outside all of the given ranges and returns how
    /// many were deleted. Without ranges nothing is deleted.
    pub fn reconcile_ia_addresses(
        &self,
        ranges: &[AddressRange],
    ) -> Result<usize, LeaseStoreError> {
        Ok(reconcile::reconcile_ia_addresses(&self.store, ranges)?)
    }

    fn find_unused(
        &self,
        start: Ipv6Addr,
        end: Ipv6Addr,
        prefixes: bool,
    ) -> Result<Vec<IaBinding>, LeaseStoreError> {
        let cutoff = self.offer_cutoff();
        let rows = self.store.query(
            LeaseStatement::SelectUnused { prefixes },
            &[
                row::timestamp_param(cutoff)?,
                row::address_param(start),
                row::address_param(end),
            ],
        )?;
        let unused = candidates(rows)?;
        tracing::debug!(%start, %end, prefixes, count = unused.len(), "Found unused bindings");
        Ok(unused)
    }

    /// Offers started before this instant are no longer held. Clamped to the
    /// earliest storable timestamp, so an oversized hold keeps every offer.
    fn offer_cutoff(&self) -> DateTime<Utc> {
        let earliest = DateTime::from_timestamp_nanos(i64::MIN);
        let now = self.clock.now();
        TimeDelta::from_std(self.offer_hold)
            .ok()
            .and_then(|hold| now.checked_sub_signed(hold))
            .map_or(earliest, |cutoff| cutoff.max(earliest))
    }

    fn records_of(&self, key: &IaKey) -> Result<Vec<LeaseRecord>, LeaseStoreError> {
        let params = [
            Value::Blob(key.client_id.to_vec()),
            u8::from(key.ia_type).into(),
            i64::from(key.ia_id).into(),
        ];
        let rows = self.store.query(LeaseStatement::SelectByIa, &params)?;
        Ok(rows.into_iter().map(to_record).collect::<Result<_, _>>()?)
    }

    fn insert(&self, record: &LeaseRecord) -> Result<(), LeaseStoreError> {
        self.store
            .execute(LeaseStatement::InsertLease, &row::insert_params(record)?)?;
        tracing::trace!(address = %record.address, state = %record.state, "Inserted lease");
        Ok(())
    }

    fn delete_lease(&self, address: Ipv6Addr) -> Result<(), LeaseStoreError> {
        let affected = self
            .store
            .execute(LeaseStatement::DeleteLease, &[row::address_param(address)])?;
        if affected == 0 {
            tracing::warn!(%address, "Lease to delete was not found");
        }
        Ok(())
    }
}

fn check_lifetimes(binding: &IaBinding) -> Result<(), LeaseStoreError> {
    if binding.state.is_active() && !binding.has_consistent_lifetimes() {
        return Err(LeaseStoreError::InconsistentLifetimes(binding.address));
    }
    Ok(())
}

fn to_record(row: LeaseRow) -> Result<LeaseRecord, StoreError> {
    Ok(row::record_from_row(row)?)
}

/// Maps candidate rows to bindings. Option buffers are not decoded.
fn candidates(rows: Vec<LeaseRow>) -> Result<Vec<IaBinding>, StoreError> {
    rows.into_iter()
        .map(|row| {
            let row = LeaseRow {
                ia_options: None,
                binding_options: None,
                ..row
            };
            to_record(row).map(translate::to_binding)
        })
        .collect()
}
