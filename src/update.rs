//! Incremental update of an existing local copy with forced recovery
//!
//! The local copy is a managed mirror that nobody edits by hand, so any
//! divergence is treated as spurious (stale lock, prior crash, tampering)
//! and resolved by discarding local state: fetch, then hard reset to the
//! remote tip.

use crate::error::{SyncError, ToolError};
use crate::git::{parse_progress, GitCommand, TransferTool};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// States of the update state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
	/// Fast-forward succeeded
	Clean,

	/// Conflict detected, recovery pending
	Diverged,

	/// Local tip forcibly reset to the remote tip
	Recovered,

	/// Unrecoverable failure
	Failed,
}

impl fmt::Display for UpdateState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			UpdateState::Clean => write!(f, "clean"),
			UpdateState::Diverged => write!(f, "diverged"),
			UpdateState::Recovered => write!(f, "recovered"),
			UpdateState::Failed => write!(f, "failed"),
		}
	}
}

/// Class of a detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
	UncommittedChanges,
	UnrelatedHistories,
	LockContention,
	NonFastForward,
}

/// Diagnostic substring that identifies a conflict (matched case-insensitively)
#[derive(Debug, Clone, Copy)]
pub struct ConflictMarker {
	pub pattern: &'static str,
	pub kind: ConflictKind,
}

/// Conflict markers, checked in order
pub const CONFLICT_MARKERS: &[ConflictMarker] = &[
	ConflictMarker { pattern: "would be overwritten", kind: ConflictKind::UncommittedChanges },
	ConflictMarker { pattern: "commit your changes", kind: ConflictKind::UncommittedChanges },
	ConflictMarker { pattern: "uncommitted changes", kind: ConflictKind::UncommittedChanges },
	ConflictMarker { pattern: "unrelated histories", kind: ConflictKind::UnrelatedHistories },
	ConflictMarker { pattern: "index.lock", kind: ConflictKind::LockContention },
	ConflictMarker { pattern: "another git process", kind: ConflictKind::LockContention },
	ConflictMarker { pattern: "non-fast-forward", kind: ConflictKind::NonFastForward },
	ConflictMarker { pattern: "fast-forward", kind: ConflictKind::NonFastForward },
	ConflictMarker { pattern: "diverging branches", kind: ConflictKind::NonFastForward },
];

/// Match a diagnostic against the marker table
pub fn classify_diagnostic(diagnostic: &str) -> Option<ConflictKind> {
	let lower = diagnostic.to_lowercase();
	CONFLICT_MARKERS.iter().find(|m| lower.contains(m.pattern)).map(|m| m.kind)
}

/// Classify a tool failure as a conflict
///
/// Only processes that ran to completion with a non-zero exit code qualify;
/// timeouts, signals and spawn errors are never conflicts.
pub fn classify_failure(err: &ToolError) -> Option<ConflictKind> {
	match err {
		ToolError::Failed { code: Some(code), .. } if *code != 0 => {
			classify_diagnostic(&err.diagnostic())
		}
		_ => None,
	}
}

/// Tunables for updates
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOptions {
	/// Budget for pull and fetch
	pub pull_timeout: Duration,

	/// Budget for local commands (rev-parse, reset)
	pub local_timeout: Duration,

	/// Remote name
	pub remote: String,
}

impl Default for UpdateOptions {
	fn default() -> Self {
		UpdateOptions {
			pull_timeout: Duration::from_secs(120),
			local_timeout: Duration::from_secs(5),
			remote: "origin".to_string(),
		}
	}
}

/// Result of a successful update
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
	/// Terminal state, `Clean` or `Recovered`
	pub state: UpdateState,

	/// Whether the working tree content may have changed
	pub has_changes: bool,

	pub old_tip: Option<String>,
	pub new_tip: Option<String>,

	/// Conflict that triggered recovery, if any
	pub conflict: Option<ConflictKind>,
}

/// Updates an already synchronized local copy
pub struct RepoUpdater<'a> {
	tool: &'a dyn TransferTool,
	options: UpdateOptions,
}

impl<'a> RepoUpdater<'a> {
	pub fn new(tool: &'a dyn TransferTool, options: UpdateOptions) -> Self {
		RepoUpdater { tool, options }
	}

	/// Current tip, best effort
	pub async fn tip(&self, repo: &Path) -> Option<String> {
		let cmd = GitCommand::rev_parse_head(repo, self.options.local_timeout);
		match self.tool.execute(&cmd, None).await {
			Ok(out) => {
				let tip = out.stdout.trim().to_string();
				if tip.is_empty() {
					None
				} else {
					Some(tip)
				}
			}
			Err(e) => {
				debug!("rev-parse in {} failed: {}", repo.display(), e);
				None
			}
		}
	}

	/// Run the update state machine on `repo`, tracking `branch`
	pub async fn update(
		&self,
		repo_name: &str,
		repo: &Path,
		branch: &str,
	) -> Result<UpdateOutcome, SyncError> {
		info!("Updating {} at {}", repo_name, repo.display());
		let old_tip = self.tip(repo).await;

		let pull = GitCommand::pull_ff_only(repo, self.options.pull_timeout);
		let on_line = |line: &str| {
			if let Some((phase, percent)) = parse_progress(line) {
				debug!("{} {}: {}%", repo_name, phase, percent);
			}
		};

		let (conflict, pull_diagnostic) = match self.tool.execute(&pull, Some(&on_line)).await {
			Ok(out) => {
				let new_tip = self.tip(repo).await;
				let has_changes = match (&old_tip, &new_tip) {
					(Some(old), Some(new)) => old != new,
					_ => false,
				};
				if has_changes {
					info!("{}: new commits pulled", repo_name);
				} else if out.stdout.contains("Already up to date") {
					info!("{}: already up to date", repo_name);
				} else {
					debug!("{}: pull succeeded without a detectable tip change", repo_name);
				}
				return Ok(UpdateOutcome {
					state: UpdateState::Clean,
					has_changes,
					old_tip,
					new_tip,
					conflict: None,
				});
			}
			Err(e) => match classify_failure(&e) {
				Some(kind) => {
					warn!(
						"{}: pull --ff-only failed ({:?}), state {} -> {}",
						repo_name,
						kind,
						UpdateState::Clean,
						UpdateState::Diverged
					);
					let diagnostic = e.diagnostic();
					debug!("{}: git output:\n{}", repo_name, diagnostic);
					(kind, diagnostic)
				}
				None => {
					error!("{}: update failed: {}", repo_name, e);
					return Err(SyncError::Tool(e));
				}
			},
		};

		self.recover(repo_name, repo, branch, old_tip, conflict, &pull_diagnostic).await
	}

	async fn recover(
		&self,
		repo_name: &str,
		repo: &Path,
		branch: &str,
		old_tip: Option<String>,
		conflict: ConflictKind,
		pull_diagnostic: &str,
	) -> Result<UpdateOutcome, SyncError> {
		warn!("{}: forcing reset to {}/{}", repo_name, self.options.remote, branch);

		let fetch = GitCommand::fetch(repo, &self.options.remote, self.options.pull_timeout);
		let reset_target = format!("{}/{}", self.options.remote, branch);
		let reset = GitCommand::reset_hard(repo, &reset_target, self.options.local_timeout);

		let result = match self.tool.execute(&fetch, None).await {
			Ok(_) => self.tool.execute(&reset, None).await,
			Err(e) => Err(e),
		};
		if let Err(e) = result {
			error!("{}: forced reset failed, state {}", repo_name, UpdateState::Failed);
			return Err(SyncError::TransferConflict {
				repo: repo_name.to_string(),
				diagnostic: format!("{} (recovery failed: {})", pull_diagnostic.trim(), e),
			});
		}

		let new_tip = self.tip(repo).await;
		info!("{}: forced reset succeeded, state {}", repo_name, UpdateState::Recovered);
		Ok(UpdateOutcome {
			state: UpdateState::Recovered,
			has_changes: true,
			old_tip,
			new_tip,
			conflict: Some(conflict),
		})
	}
}


// vim: ts=4
