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
//! Lease store configuration.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    repository::{DEFAULT_OFFER_HOLD, LeaseRepository},
    store::{StoreError, sqlite::SqliteLeaseStore},
};

/// Configuration of the persistent lease store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaseStoreConfig {
    /// Path of the SQLite database. A private in-memory database is used if
    /// unset.
    pub database_path: Option<PathBuf>,
    /// Seconds an advertised binding is held before it may be offered again.
    pub offer_hold_secs: u64,
}

impl Default for LeaseStoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            offer_hold_secs: DEFAULT_OFFER_HOLD.as_secs(),
        }
    }
}

impl LeaseStoreConfig {
    /// The offer hold window.
    pub fn offer_hold(&self) -> Duration {
        Duration::from_secs(self.offer_hold_secs)
    }

    /// Opens the configured database and creates a repository on it.
    pub fn open(&self) -> Result<LeaseRepository<SqliteLeaseStore>, StoreError> {
        let store = match &self.database_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Opening lease database");
                SqliteLeaseStore::open(path)?
            }
            None => {
                tracing::info!("Using in-memory lease database");
                SqliteLeaseStore::open_in_memory()?
            }
        };
        Ok(LeaseRepository::new(store).with_offer_hold(self.offer_hold()))
    }
}
