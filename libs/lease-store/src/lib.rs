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
//! # DHCPv6 Lease Store
//!
//! Persistent bindings of a stateful DHCPv6 server.
//!
//! Clients hold addresses and delegated prefixes in
//! [identity associations](model::IdentityAssoc). The
//! [repository::LeaseRepository] stores each binding as one flat
//! [lease record](record::LeaseRecord) keyed by its address and rebuilds
//! associations on lookup. It also answers the allocator's questions: which
//! addresses in a range are taken, which bindings may be handed out again and
//! which have expired.
//!
//! Storage goes through the [store::LeaseStore] trait, implemented for SQLite
//! ([store::sqlite::SqliteLeaseStore]) and in memory
//! ([store::memory::MemoryLeaseStore]). Leases outside the configured pools
//! are removed with [reconcile::reconcile_ia_addresses].
//!
//! All timestamps are UTC.

pub mod clock;
pub mod config;
pub mod dto;
pub mod model;
pub mod option;
pub mod reconcile;
pub mod record;
pub mod repository;
pub mod store;
pub mod translate;

pub use repository::{LeaseRepository, LeaseStoreError};
