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
//! leasectl CLI options.

use std::{net::Ipv6Addr, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use lease_store::model::IaType;

/// Inspect and maintain the DHCPv6 lease database.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Opts {
    /// Top-level subcommand
    #[command(subcommand)]
    pub command: Commands,

    /// Logging options
    #[command(flatten)]
    pub logging: LoggingOptions,

    /// JSON file with the lease store configuration. Defaults apply if unset.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Logging options.
#[derive(Debug, Args)]
pub struct LoggingOptions {
    /// Log to stderr.
    #[arg(long, global = true)]
    pub stderr: bool,

    /// Directory for the leasectl log.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Write logs as Bunyan JSON instead of text.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the lease database if it does not exist.
    Init,
    /// Store the identity associations listed in a JSON file.
    Import {
        /// JSON array of identity associations.
        file: PathBuf,
    },
    /// Print or save one identity association.
    Export {
        /// Hex encoded client identifier (DUID).
        #[arg(long)]
        client_id: String,
        /// IA type: na, ta or pd.
        #[arg(long)]
        ia_type: IaType,
        /// IA identifier.
        #[arg(long)]
        ia_id: u32,
        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the identity association holding an address.
    Lookup {
        /// Leased address or prefix.
        address: Ipv6Addr,
        /// Show only the binding for this address, not its siblings.
        #[arg(long)]
        only_this: bool,
    },
    /// List leased addresses in a range.
    Existing {
        /// First address of the range.
        start: Ipv6Addr,
        /// Last address of the range.
        end: Ipv6Addr,
    },
    /// List bindings in a range that may be handed out again.
    Unused {
        /// First address of the range.
        start: Ipv6Addr,
        /// Last address of the range.
        end: Ipv6Addr,
        /// List delegated prefixes instead of addresses.
        #[arg(long)]
        prefixes: bool,
    },
    /// List bindings whose valid lifetime has ended.
    Expired {
        /// Restrict to one IA type. All types are listed if unset.
        #[arg(long)]
        ia_type: Option<IaType>,
    },
    /// Delete all leases outside the address ranges listed in a JSON file.
    Reconcile {
        /// JSON array of ranges, each `{"start": .., "end": ..}` or a prefix.
        #[arg(long)]
        ranges: PathBuf,
    },
}
