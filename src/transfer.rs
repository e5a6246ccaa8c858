//! Fallback-chained clone execution
//!
//! Attempts are strictly sequential: attempt N+1 never starts before
//! attempt N resolved. A failed attempt leaves nothing behind at the
//! target path.

use crate::callbacks::{ProgressSink, TransferProgress};
use crate::endpoint::Endpoint;
use crate::error::{FailedAttempt, SyncError};
use crate::git::{parse_progress, GitCommand, TransferTool};
use crate::util::safe_delete;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables for clone attempts
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOptions {
	/// Hard time budget per clone attempt
	pub clone_timeout: Duration,

	/// Shallow clone depth
	pub depth: u32,

	/// Pause between a failed attempt and the next one
	pub backoff: Duration,

	/// Percentages reported to the progress sink
	pub milestones: Vec<u8>,

	/// Attempts used when removing a partial clone
	pub delete_attempts: u32,

	/// Export HTTP(S)_PROXY for prefix-style endpoints
	pub proxy_env: bool,
}

impl Default for TransferOptions {
	fn default() -> Self {
		TransferOptions {
			clone_timeout: Duration::from_secs(600),
			depth: 1,
			backoff: Duration::from_secs(1),
			milestones: vec![10, 50, 90],
			delete_attempts: 3,
			proxy_env: false,
		}
	}
}

/// What to transfer and where
#[derive(Debug, Clone)]
pub struct TransferRequest {
	/// Repository display name
	pub repo_name: String,

	/// Canonical repository URL
	pub repo_url: String,

	/// Target path; must not exist yet
	pub target: PathBuf,
}

/// Successful transfer report
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
	/// Name of the endpoint that succeeded
	pub endpoint: String,

	/// Attempts that failed before the winner
	pub failed: Vec<FailedAttempt>,
}

/// Reports each milestone at most once per attempt
struct MilestoneTracker<'a> {
	milestones: Vec<u8>,
	reported: Mutex<Vec<bool>>,
	sink: Option<&'a dyn ProgressSink>,
	repo: &'a str,
	endpoint: &'a str,
}

impl<'a> MilestoneTracker<'a> {
	fn new(
		milestones: &[u8],
		sink: Option<&'a dyn ProgressSink>,
		repo: &'a str,
		endpoint: &'a str,
	) -> Self {
		let mut milestones = milestones.to_vec();
		milestones.sort_unstable();
		milestones.dedup();
		let reported = Mutex::new(vec![false; milestones.len()]);
		MilestoneTracker { milestones, reported, sink, repo, endpoint }
	}

	fn on_line(&self, line: &str) {
		let (phase, percent) = match parse_progress(line) {
			Some(p) => p,
			None => return,
		};
		let sink = match self.sink {
			Some(sink) if phase == "Receiving objects" => sink,
			_ => {
				debug!("{} ({}) {}: {}%", self.repo, self.endpoint, phase, percent);
				return;
			}
		};

		let mut reported = self.reported.lock().unwrap_or_else(|e| e.into_inner());
		for (idx, milestone) in self.milestones.iter().enumerate() {
			if percent >= *milestone && !reported[idx] {
				reported[idx] = true;
				sink.on_transfer_progress(&TransferProgress {
					repo: self.repo.to_string(),
					endpoint: self.endpoint.to_string(),
					percent: *milestone,
				});
			}
		}
	}
}

/// Clones a repository from the first endpoint that works
pub struct FallbackTransferExecutor<'a> {
	tool: &'a dyn TransferTool,
	options: TransferOptions,
}

impl<'a> FallbackTransferExecutor<'a> {
	pub fn new(tool: &'a dyn TransferTool, options: TransferOptions) -> Self {
		FallbackTransferExecutor { tool, options }
	}

	pub fn options(&self) -> &TransferOptions {
		&self.options
	}

	/// Try every endpoint in order until one clone succeeds
	///
	/// Only exhaustion of the whole list is a hard failure.
	pub async fn transfer(
		&self,
		ranked: &[Endpoint],
		request: &TransferRequest,
		sink: Option<&dyn ProgressSink>,
	) -> Result<TransferOutcome, SyncError> {
		let target = request.target.as_path();
		if tokio::fs::symlink_metadata(target).await.is_ok() {
			return Err(SyncError::FilesystemIo {
				path: target.display().to_string(),
				source: io::Error::new(io::ErrorKind::AlreadyExists, "transfer target already exists"),
			});
		}

		let work_dir = target.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
		tokio::fs::create_dir_all(&work_dir).await.map_err(|e| SyncError::FilesystemIo {
			path: work_dir.display().to_string(),
			source: e,
		})?;

		if ranked.is_empty() {
			error!("{}: no usable source to download from", request.repo_name);
			return Err(SyncError::TransferFatal {
				attempts: Vec::new(),
				last_error: "no usable source".to_string(),
			});
		}

		let names: Vec<&str> = ranked.iter().map(|e| e.name.as_str()).collect();
		info!("{}: trying sources {}", request.repo_name, names.join(", "));

		let mut failed: Vec<FailedAttempt> = Vec::new();
		for (idx, endpoint) in ranked.iter().enumerate() {
			match self.attempt(endpoint, request, &work_dir, sink).await {
				Ok(()) => {
					info!("{}: downloaded via {}", request.repo_name, endpoint.name);
					return Ok(TransferOutcome { endpoint: endpoint.name.clone(), failed });
				}
				Err(reason) => {
					warn!("{}: download via {} failed: {}", request.repo_name, endpoint.name, reason);
					failed.push(FailedAttempt { endpoint: endpoint.name.clone(), reason });

					if let Err(e) =
						safe_delete(target, self.options.delete_attempts, self.options.backoff).await
					{
						warn!("Could not remove partial clone {}: {}", target.display(), e);
					}
					if idx + 1 < ranked.len() && !self.options.backoff.is_zero() {
						tokio::time::sleep(self.options.backoff).await;
					}
				}
			}
		}

		let last_error =
			failed.last().map(|a| a.reason.clone()).unwrap_or_else(|| "unknown error".to_string());
		error!("{}: all sources failed ({})", request.repo_name, names.join(", "));
		Err(SyncError::TransferFatal { attempts: failed, last_error })
	}

	async fn attempt(
		&self,
		endpoint: &Endpoint,
		request: &TransferRequest,
		work_dir: &Path,
		sink: Option<&dyn ProgressSink>,
	) -> Result<(), String> {
		let url = endpoint.transfer_url(&request.repo_url);
		let mut cmd = GitCommand::shallow_clone(
			&url,
			&request.target,
			self.options.depth,
			work_dir,
			self.options.clone_timeout,
		);
		if self.options.proxy_env {
			if let Some(origin) = endpoint.proxy_origin() {
				debug!("Using proxy {} for {}", origin, endpoint.name);
				cmd = cmd.with_proxy(&origin);
			}
		}

		let tracker =
			MilestoneTracker::new(&self.options.milestones, sink, &request.repo_name, &endpoint.name);
		let on_line = |line: &str| tracker.on_line(line);

		self.tool.execute(&cmd, Some(&on_line)).await.map(|_| ()).map_err(|e| e.to_string())
	}
}


// vim: ts=4
