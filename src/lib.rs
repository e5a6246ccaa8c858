//! # gallery-sync - Mirror-aware gallery repository synchronizer
//!
//! Keeps a set of git-hosted image repositories downloaded and current,
//! picking the fastest reachable mirror, and mirrors the allowed subset of
//! their images into plugin target directories according to a user ban
//! list and a content-strictness policy.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gallery_sync::{Config, Engine, GitCli, LogProgress};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(&Config::default_path()).await?;
//!     let engine = Engine::open(config, Arc::new(GitCli::new())).await?;
//!     for (repo, result) in engine.sync_all(Some(&LogProgress)).await {
//!         println!("{}: {:?}", repo, result.map(|r| r.has_changes()));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Excluding an image
//!
//! ```rust,ignore
//! let (outcome, ticket) = engine.add_exclusion("HutaoGu1").await?;
//! if let Some(ticket) = ticket {
//!     let stats = ticket.wait().await?;
//!     println!("removed {} files", stats.removed);
//! }
//! ```

pub mod callbacks;
pub mod catalog;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod git;
pub mod logging;
pub mod policy;
pub mod probe;
pub mod rank;
pub mod reconcile;
pub mod store;
pub mod transfer;
pub mod update;
pub mod util;

// Re-export commonly used types
pub use callbacks::{CallbackBuilder, LogProgress, NoProgress, ProgressSink, TransferProgress};
pub use catalog::{Asset, Catalog, ClassificationFlags};
pub use config::Config;
pub use endpoint::{Endpoint, EndpointRegistry};
pub use engine::{Engine, ExclusionListing, ReconcileTicket, RepoSync, StatusReport};
pub use error::{FailedAttempt, SyncError, ToolError};
pub use git::{GitCli, TransferTool};
pub use policy::{AddOutcome, ContentSwitches, RemovalOutcome, StrictnessLevel};
pub use probe::{ProbeResult, ProbeStatus};
pub use reconcile::ReconcileStats;
pub use update::{UpdateOutcome, UpdateState};

// vim: ts=4
