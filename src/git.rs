//! Child-process transfer tool
//!
//! The engine only ever needs a handful of git subcommands. Each is described
//! by a [`GitCommand`] with an explicit working directory and timeout, and
//! executed by a [`TransferTool`]. [`GitCli`] runs the real binary; tests
//! substitute scripted tools.

use crate::error::ToolError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Callback receiving each progress line written to stderr
pub type LineFn<'a> = dyn for<'s> Fn(&'s str) + Send + Sync + 'a;

/// The fixed vocabulary of subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitOp {
	ShallowClone,
	PullFastForward,
	Fetch,
	ResetHard,
	LsRemote,
	RevParse,
}

/// One fully described invocation
#[derive(Debug, Clone, PartialEq)]
pub struct GitCommand {
	pub op: GitOp,
	pub args: Vec<String>,
	pub cwd: PathBuf,
	pub timeout: Duration,
	pub env: Vec<(String, String)>,
}

impl GitCommand {
	fn new(op: GitOp, args: Vec<String>, cwd: &Path, timeout: Duration) -> Self {
		GitCommand { op, args, cwd: cwd.to_path_buf(), timeout, env: Vec::new() }
	}

	/// `git clone --depth=N --progress <url> <target>`
	pub fn shallow_clone(
		url: &str,
		target: &Path,
		depth: u32,
		cwd: &Path,
		timeout: Duration,
	) -> Self {
		let args = vec![
			"clone".to_string(),
			format!("--depth={}", depth.max(1)),
			"--progress".to_string(),
			url.to_string(),
			target.to_string_lossy().into_owned(),
		];
		Self::new(GitOp::ShallowClone, args, cwd, timeout)
	}

	/// `git pull --ff-only --progress`
	pub fn pull_ff_only(repo: &Path, timeout: Duration) -> Self {
		let args = vec!["pull".to_string(), "--ff-only".to_string(), "--progress".to_string()];
		Self::new(GitOp::PullFastForward, args, repo, timeout)
	}

	/// `git fetch <remote>`
	pub fn fetch(repo: &Path, remote: &str, timeout: Duration) -> Self {
		Self::new(GitOp::Fetch, vec!["fetch".to_string(), remote.to_string()], repo, timeout)
	}

	/// `git reset --hard <target>`
	pub fn reset_hard(repo: &Path, target: &str, timeout: Duration) -> Self {
		let args = vec!["reset".to_string(), "--hard".to_string(), target.to_string()];
		Self::new(GitOp::ResetHard, args, repo, timeout)
	}

	/// `git ls-remote --heads <url>`
	pub fn ls_remote(url: &str, cwd: &Path, timeout: Duration) -> Self {
		let args = vec!["ls-remote".to_string(), "--heads".to_string(), url.to_string()];
		Self::new(GitOp::LsRemote, args, cwd, timeout)
	}

	/// `git rev-parse HEAD`
	pub fn rev_parse_head(repo: &Path, timeout: Duration) -> Self {
		Self::new(GitOp::RevParse, vec!["rev-parse".to_string(), "HEAD".to_string()], repo, timeout)
	}

	/// Add an environment variable for the child
	pub fn with_env(mut self, key: &str, value: &str) -> Self {
		self.env.push((key.to_string(), value.to_string()));
		self
	}

	/// Route HTTP(S) through a proxy origin
	pub fn with_proxy(self, origin: &str) -> Self {
		self.with_env("HTTP_PROXY", origin).with_env("HTTPS_PROXY", origin)
	}

	/// Command line as a display string
	pub fn display(&self, program: &str) -> String {
		format!("{} {}", program, self.args.join(" "))
	}
}

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
	pub stdout: String,
	pub stderr: String,
}

/// Executes transfer-tool invocations
#[async_trait]
pub trait TransferTool: Send + Sync {
	/// Run `cmd`, feeding each stderr progress line to `progress`
	async fn execute(
		&self,
		cmd: &GitCommand,
		progress: Option<&LineFn<'_>>,
	) -> Result<ToolOutput, ToolError>;
}

/// The real `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
	program: String,
}

impl GitCli {
	pub fn new() -> Self {
		GitCli { program: "git".to_string() }
	}

	/// Use a different executable (e.g. an absolute path to git)
	pub fn with_program(program: impl Into<String>) -> Self {
		GitCli { program: program.into() }
	}
}

impl Default for GitCli {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl TransferTool for GitCli {
	async fn execute(
		&self,
		cmd: &GitCommand,
		progress: Option<&LineFn<'_>>,
	) -> Result<ToolOutput, ToolError> {
		let cmd_line = cmd.display(&self.program);
		debug!("> {} (cwd: {})", cmd_line, cmd.cwd.display());

		let mut child = tokio::process::Command::new(&self.program)
			.args(&cmd.args)
			.current_dir(&cmd.cwd)
			.envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.env("GIT_TERMINAL_PROMPT", "0")
			.env("GIT_PROGRESS_DELAY", "0")
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| ToolError::SpawnFailed { cmd: cmd_line.clone(), source: e })?;

		let mut stdout = child
			.stdout
			.take()
			.ok_or(ToolError::StdioUnavailable { what: "stdout".to_string() })?;
		let mut stderr = child
			.stderr
			.take()
			.ok_or(ToolError::StdioUnavailable { what: "stderr".to_string() })?;

		let last_chunk = Mutex::new(String::new());

		let run = async {
			let read_out = async {
				let mut buf = String::new();
				stdout.read_to_string(&mut buf).await.map(|_| buf)
			};
			let read_err = async {
				let mut all = String::new();
				let mut pending = String::new();
				let mut buf = [0u8; 4096];
				loop {
					let n = stderr.read(&mut buf).await?;
					if n == 0 {
						break;
					}
					let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
					all.push_str(&chunk);
					pending.push_str(&chunk);
					*last_chunk.lock().unwrap_or_else(|e| e.into_inner()) = chunk;

					// git rewrites progress lines with '\r'
					while let Some(pos) = pending.find(|c: char| c == '\r' || c == '\n') {
						let line: String = pending.drain(..=pos).collect();
						emit_line(progress, &line);
					}
				}
				emit_line(progress, &pending);
				Ok::<String, std::io::Error>(all)
			};

			let (out, err) = tokio::join!(read_out, read_err);
			let status = child.wait().await?;
			Ok::<_, std::io::Error>((status, out?, err?))
		};

		let outcome = tokio::time::timeout(cmd.timeout, run).await;
		match outcome {
			Ok(Ok((status, stdout, stderr))) => {
				if status.success() {
					Ok(ToolOutput { stdout, stderr })
				} else {
					Err(ToolError::Failed { cmd: cmd_line, code: status.code(), stdout, stderr })
				}
			}
			Ok(Err(e)) => Err(ToolError::StdioUnavailable { what: e.to_string() }),
			Err(_) => {
				warn!("'{}' timed out after {}ms, killing", cmd_line, cmd.timeout.as_millis());
				if let Err(e) = child.start_kill() {
					debug!("kill after timeout failed: {}", e);
				}
				let _ = child.wait().await;
				let last_stderr = last_chunk.into_inner().unwrap_or_else(|e| e.into_inner());
				Err(ToolError::Timeout { cmd: cmd_line, after: cmd.timeout, last_stderr })
			}
		}
	}
}

fn emit_line(progress: Option<&LineFn<'_>>, line: &str) {
	let line = line.trim();
	if line.is_empty() {
		return;
	}
	if let Some(callback) = progress {
		callback(line);
	}
}

/// Extract a percentage from a git progress line
///
/// Matches `Receiving objects:  42% (...)` and `Resolving deltas: 100% ...`.
pub fn parse_progress(line: &str) -> Option<(&str, u8)> {
	for phase in &["Receiving objects", "Resolving deltas"] {
		if let Some(idx) = line.find(phase) {
			let rest = line[idx + phase.len()..].trim_start_matches(':').trim_start();
			let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
			if digits.is_empty() || !rest[digits.len()..].starts_with('%') {
				return None;
			}
			return digits.parse::<u8>().ok().map(|p| (*phase, p.min(100)));
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_progress() {
		assert_eq!(
			parse_progress("Receiving objects:  42% (420/1000), 1.2 MiB | 800 KiB/s"),
			Some(("Receiving objects", 42))
		);
		assert_eq!(
			parse_progress("remote: Resolving deltas: 100% (12/12), done."),
			Some(("Resolving deltas", 100))
		);
		assert_eq!(parse_progress("Counting objects: 5, done."), None);
		assert_eq!(parse_progress("Receiving objects: abc"), None);
	}

	#[test]
	fn test_clone_command_shape() {
		let cmd = GitCommand::shallow_clone(
			"https://example.com/repo",
			Path::new("/tmp/target"),
			0,
			Path::new("/tmp"),
			Duration::from_secs(600),
		)
		.with_proxy("https://example.com");
		assert_eq!(cmd.op, GitOp::ShallowClone);
		assert_eq!(cmd.args[1], "--depth=1");
		assert_eq!(cmd.args[4], "/tmp/target");
		assert_eq!(cmd.env.len(), 2);
		assert_eq!(cmd.display("git"), "git clone --depth=1 --progress https://example.com/repo /tmp/target");
	}

	#[tokio::test]
	async fn test_missing_program_is_spawn_error() {
		let tool = GitCli::with_program("definitely-not-a-real-git-binary");
		let cmd = GitCommand::rev_parse_head(Path::new("."), Duration::from_secs(5));
		let err = tool.execute(&cmd, None).await.unwrap_err();
		assert!(matches!(err, ToolError::SpawnFailed { .. }));
	}
}

// vim: ts=4
