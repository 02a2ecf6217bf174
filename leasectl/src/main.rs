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
//! Operator tool for the DHCPv6 lease database.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lease_store::config::LeaseStoreConfig;
use observability::{LogFormat, setup_tracing};

mod cli;
mod commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = cli::Opts::parse();

    let format = if opts.logging.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    let _guards = setup_tracing(
        "leasectl",
        opts.logging.log_dir.as_ref(),
        opts.logging.stderr,
        format,
    )
    .context("failed to set up logging")?;

    let config: LeaseStoreConfig = match &opts.config {
        Some(path) => {
            io_util::read_file(path)
                .await
                .context("failed to read configuration")?
        }
        None => LeaseStoreConfig::default(),
    };
    if config.database_path.is_none() {
        tracing::warn!("No database path configured, changes will not persist");
    }

    let repository = Arc::new(
        config
            .open()
            .context("failed to open the lease database")?,
    );
    let output = commands::run(opts.command, repository).await?;
    if !output.is_null() {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}
