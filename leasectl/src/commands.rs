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
//! Subcommand execution.
//!
//! Repository calls block on the database, so they run on the blocking pool.

use std::sync::Arc;

use anyhow::Context;
use lease_store::{
    LeaseRepository, LeaseStoreError,
    dto::{IaBindingDto, IdentityAssocDto},
    model::{IaBinding, IaKey, IaType, IdentityAssoc},
    reconcile::AddressRange,
    store::LeaseStore,
};
use serde_json::{Value, json};

use crate::cli::Commands;

/// Runs a subcommand and returns what should be printed. `Null` prints nothing.
pub async fn run<S>(command: Commands, repository: Arc<LeaseRepository<S>>) -> anyhow::Result<Value>
where
    S: LeaseStore + 'static,
{
    match command {
        Commands::Init => {
            tracing::info!("Lease database ready");
            Ok(Value::Null)
        }
        Commands::Import { file } => {
            let dtos: Vec<IdentityAssocDto> = io_util::read_file(&file)
                .await
                .context("failed to read identity associations")?;
            let ias = dtos
                .into_iter()
                .map(IdentityAssoc::try_from)
                .collect::<anyhow::Result<Vec<_>>>()?;
            let count = ias.len();
            blocking(&repository, move |r| {
                ias.iter().try_for_each(|ia| r.create_ia(ia))
            })
            .await
            .context("failed to import identity associations")?;
            tracing::info!(count, file = %file.display(), "Imported identity associations");
            Ok(json!({ "imported": count }))
        }
        Commands::Export {
            client_id,
            ia_type,
            ia_id,
            out,
        } => {
            let client_id = hex::decode(&client_id).context("invalid client id")?;
            let key = IaKey::new(client_id, ia_type, ia_id);
            let ia = blocking(&repository, {
                let key = key.clone();
                move |r| r.find_ia(&key)
            })
            .await?
            .with_context(|| format!("no identity association {key}"))?;
            let dto = IdentityAssocDto::from(&ia);
            match out {
                Some(path) => {
                    io_util::write_file(&path, &dto)
                        .await
                        .context("failed to write export")?;
                    Ok(Value::Null)
                }
                None => Ok(serde_json::to_value(dto)?),
            }
        }
        Commands::Lookup { address, only_this } => {
            let ia = blocking(&repository, move |r| {
                r.find_ia_by_address(address, !only_this)
            })
            .await?;
            Ok(serde_json::to_value(ia.as_ref().map(IdentityAssocDto::from))?)
        }
        Commands::Existing { start, end } => {
            let addresses =
                blocking(&repository, move |r| r.find_existing_ips(start, end)).await?;
            Ok(serde_json::to_value(addresses)?)
        }
        Commands::Unused {
            start,
            end,
            prefixes,
        } => {
            let unused = blocking(&repository, move |r| {
                if prefixes {
                    r.find_unused_ia_prefixes(start, end)
                } else {
                    r.find_unused_ia_addresses(start, end)
                }
            })
            .await?;
            Ok(bindings_json(&unused)?)
        }
        Commands::Expired { ia_type } => {
            let ia_types = match ia_type {
                Some(ia_type) => vec![ia_type],
                None => vec![
                    IaType::NonTemporary,
                    IaType::Temporary,
                    IaType::PrefixDelegation,
                ],
            };
            let mut expired = serde_json::Map::new();
            for ia_type in ia_types {
                let bindings =
                    blocking(&repository, move |r| r.find_expired_ia_addresses(ia_type)).await?;
                expired.insert(ia_type.to_string(), bindings_json(&bindings)?);
            }
            Ok(Value::Object(expired))
        }
        Commands::Reconcile { ranges } => {
            let ranges: Vec<AddressRange> = io_util::read_file(&ranges)
                .await
                .context("failed to read address ranges")?;
            let deleted =
                blocking(&repository, move |r| r.reconcile_ia_addresses(&ranges)).await?;
            Ok(json!({ "deleted": deleted }))
        }
    }
}

fn bindings_json(bindings: &[IaBinding]) -> serde_json::Result<Value> {
    serde_json::to_value(bindings.iter().map(IaBindingDto::from).collect::<Vec<_>>())
}

async fn blocking<S, T, F>(repository: &Arc<LeaseRepository<S>>, f: F) -> anyhow::Result<T>
where
    S: LeaseStore + 'static,
    T: Send + 'static,
    F: FnOnce(&LeaseRepository<S>) -> Result<T, LeaseStoreError> + Send + 'static,
{
    let repository = repository.clone();
    let result = tokio::task::spawn_blocking(move || f(&repository))
        .await
        .context("repository task failed")?;
    Ok(result?)
}
