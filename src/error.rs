//! Error types for gallery synchronization

use std::error::Error;
use std::fmt;
use std::io;
use std::time::Duration;

/// One failed transfer attempt against a single endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
	/// Endpoint name
	pub endpoint: String,

	/// Terminal diagnostic of the attempt
	pub reason: String,
}

/// Main error type for synchronization operations
#[derive(Debug)]
pub enum SyncError {
	/// No probed endpoint could be reached, so no transfer was attempted
	NetworkUnreachable { endpoint: String, message: String },

	/// Local and remote history diverged and could not be recovered
	TransferConflict { repo: String, diagnostic: String },

	/// Every endpoint of the fallback chain failed
	TransferFatal { attempts: Vec<FailedAttempt>, last_error: String },

	/// Permission or missing-path problem while touching the filesystem
	FilesystemIo { path: String, source: io::Error },

	/// A data file could not be parsed
	DataCorrupt { path: String, message: String },

	/// Policy configuration out of range
	PolicyInvalid { message: String },

	/// The user exclusion store could not be written
	StoreWriteFailed { path: String, source: io::Error },

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Another transfer for the same repository is already running
	Busy { repo: String },

	/// Child-process error (nested)
	Tool(ToolError),

	/// I/O error
	Io(io::Error),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::NetworkUnreachable { endpoint, message } => {
				write!(f, "Network unreachable (probed {}): {}", endpoint, message)
			}
			SyncError::TransferConflict { repo, diagnostic } => {
				write!(f, "Unrecoverable conflict in {}: {}", repo, diagnostic)
			}
			SyncError::TransferFatal { attempts, last_error } => {
				let names: Vec<&str> = attempts.iter().map(|a| a.endpoint.as_str()).collect();
				if names.is_empty() {
					write!(f, "No usable source available: {}", last_error)
				} else {
					write!(
						f,
						"All sources failed (tried: {}); last error: {}",
						names.join(", "),
						last_error
					)
				}
			}
			SyncError::FilesystemIo { path, source } => {
				write!(f, "Filesystem error on {}: {}", path, source)
			}
			SyncError::DataCorrupt { path, message } => {
				write!(f, "Corrupt data in {}: {}", path, message)
			}
			SyncError::PolicyInvalid { message } => write!(f, "Invalid policy: {}", message),
			SyncError::StoreWriteFailed { path, source } => {
				write!(f, "Failed to persist exclusion store {}: {}", path, source)
			}
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::Busy { repo } => {
				write!(f, "A transfer for {} is already in progress", repo)
			}
			SyncError::Tool(e) => write!(f, "Transfer tool error: {}", e),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::FilesystemIo { source, .. } => Some(source),
			SyncError::StoreWriteFailed { source, .. } => Some(source),
			SyncError::Tool(e) => Some(e),
			SyncError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<ToolError> for SyncError {
	fn from(e: ToolError) -> Self {
		SyncError::Tool(e)
	}
}

/// Child-process (transfer tool) errors
#[derive(Debug)]
pub enum ToolError {
	/// Subprocess spawn failed
	SpawnFailed { cmd: String, source: io::Error },

	/// Process exceeded its time budget and was killed
	Timeout { cmd: String, after: Duration, last_stderr: String },

	/// Process exited unsuccessfully
	Failed { cmd: String, code: Option<i32>, stdout: String, stderr: String },

	/// Stdio unavailable
	StdioUnavailable { what: String },
}

impl ToolError {
	/// Diagnostic text used for failure classification
	pub fn diagnostic(&self) -> String {
		match self {
			ToolError::SpawnFailed { source, .. } => source.to_string(),
			ToolError::Timeout { last_stderr, .. } => last_stderr.clone(),
			ToolError::Failed { stdout, stderr, .. } => {
				if stderr.trim().is_empty() {
					stdout.clone()
				} else {
					stderr.clone()
				}
			}
			ToolError::StdioUnavailable { what } => what.clone(),
		}
	}

	/// Exit code, if the process ran to completion
	pub fn exit_code(&self) -> Option<i32> {
		match self {
			ToolError::Failed { code, .. } => *code,
			_ => None,
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, ToolError::Timeout { .. })
	}
}

impl fmt::Display for ToolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ToolError::SpawnFailed { cmd, source } => {
				write!(f, "Failed to spawn '{}': {}", cmd, source)
			}
			ToolError::Timeout { cmd, after, .. } => {
				write!(f, "'{}' timed out after {}ms", cmd, after.as_millis())
			}
			ToolError::Failed { cmd, code, stderr, .. } => match code {
				Some(code) => {
					write!(f, "'{}' failed with code {}: {}", cmd, code, stderr.trim())
				}
				None => write!(f, "'{}' terminated by signal: {}", cmd, stderr.trim()),
			},
			ToolError::StdioUnavailable { what } => {
				write!(f, "Stdio unavailable: {}", what)
			}
		}
	}
}

impl Error for ToolError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			ToolError::SpawnFailed { source, .. } => Some(source),
			_ => None,
		}
	}
}


// vim: ts=4
