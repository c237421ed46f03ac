//! alba-demo - Bring-up, teardown and smoke checks for a local ALBA test cluster.
//!
//! The orchestrator drives pre-built external binaries: it writes their
//! config files, launches them as detached processes, waits for the
//! cluster to converge and tears everything down again.
//!
//! # Features
//!
//! - **Staged Bringup**: metadata cluster, leader election, storage daemons,
//!   claims, namespace, proxies and maintenance agents, strictly in order.
//! - **Readiness Polling**: bounded, constant-interval probes for every
//!   condition the bringup waits on.
//! - **Idempotent Teardown**: best-effort kills and cleanup that can run any
//!   number of times.
//! - **TLS**: a per-run certificate authority with persisted serials.
//! - **Packaged Tests**: deb and rpm install-and-exercise runs with JUnit output.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        alba-demo                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI: lifecycle commands | demo-setup | smoke-test          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Cluster: Bringup | Claims | Teardown | Smoke Check         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Fleets: arakoon | storage daemons | proxies | maintenance  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Plumbing: CommandRunner | ConfigWriter | Poller | TLS      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use alba_demo::cluster::{ClusterBringup, ClusterContext};
//! use alba_demo::config::{ClusterTopology, OrchestratorConfig};
//! use alba_demo::process::SystemRunner;
//!
//! #[tokio::main]
//! async fn main() -> alba_demo::Result<()> {
//!     let config = OrchestratorConfig::default();
//!     let ctx = ClusterContext::new(config.env, Arc::new(SystemRunner::new()));
//!
//!     let mut bringup = ClusterBringup::new(ctx, ClusterTopology::default(), config.polling)?;
//!     bringup.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod cli;
pub mod cluster;
pub mod config_writer;
pub mod observability;
pub mod output;
pub mod packaging;
pub mod poller;
pub mod process;
pub mod tls;

pub use error::{OrchestratorError, Result};
