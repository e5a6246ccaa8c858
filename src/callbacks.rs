//! Callback traits for transfer progress and status reporting

use tracing::info;

// Type aliases to reduce complexity
type ProgressFn = dyn Fn(&TransferProgress) + Send + Sync;
type StatusFn = dyn Fn(&str) + Send + Sync;

/// A coarse progress milestone reached during a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
	/// Repository being transferred
	pub repo: String,

	/// Endpoint currently attempted
	pub endpoint: String,

	/// Milestone percentage (e.g. 10, 50, 90)
	pub percent: u8,
}

/// Sink for progress milestones and status lines
///
/// Owned by the command/reporting layer; the engine only produces to it.
pub trait ProgressSink: Send + Sync {
	/// Called at most once per milestone per transfer attempt
	fn on_transfer_progress(&self, _progress: &TransferProgress) {}

	/// Called with textual status lines about probe and selection decisions
	fn on_status(&self, _line: &str) {}
}

/// Sink that discards everything
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Sink that forwards everything to the log
pub struct LogProgress;

impl ProgressSink for LogProgress {
	fn on_transfer_progress(&self, progress: &TransferProgress) {
		info!("{} ({}) download: {}%...", progress.repo, progress.endpoint, progress.percent);
	}

	fn on_status(&self, line: &str) {
		info!("{}", line);
	}
}

/// Builder for sinks using function closures
pub struct CallbackBuilder {
	progress: Option<Box<ProgressFn>>,
	status: Option<Box<StatusFn>>,
}

impl CallbackBuilder {
	/// Create a new callback builder
	pub fn new() -> Self {
		CallbackBuilder { progress: None, status: None }
	}

	/// Set progress callback
	pub fn on_transfer_progress<F>(mut self, callback: F) -> Self
	where
		F: Fn(&TransferProgress) + Send + Sync + 'static,
	{
		self.progress = Some(Box::new(callback));
		self
	}

	/// Set status callback
	pub fn on_status<F>(mut self, callback: F) -> Self
	where
		F: Fn(&str) + Send + Sync + 'static,
	{
		self.status = Some(Box::new(callback));
		self
	}

	/// Build the sink
	pub fn build(self) -> Box<dyn ProgressSink> {
		Box::new(CompositeSink { progress: self.progress, status: self.status })
	}
}

impl Default for CallbackBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct CompositeSink {
	progress: Option<Box<ProgressFn>>,
	status: Option<Box<StatusFn>>,
}

impl ProgressSink for CompositeSink {
	fn on_transfer_progress(&self, progress: &TransferProgress) {
		if let Some(ref callback) = self.progress {
			callback(progress);
		}
	}

	fn on_status(&self, line: &str) {
		if let Some(ref callback) = self.status {
			callback(line);
		}
	}
}


// vim: ts=4
