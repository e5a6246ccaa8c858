//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use gallery_sync::error::ToolError;
use gallery_sync::git::{GitCommand, GitOp, LineFn, ToolOutput, TransferTool};
use gallery_sync::probe::MirrorProbe;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

type Handler = dyn Fn(&GitCommand, Option<&LineFn<'_>>) -> Result<ToolOutput, ToolError> + Send + Sync;

/// Transfer tool answering every invocation from a closure, recording calls
pub struct ScriptedTool {
	handler: Box<Handler>,
	calls: Mutex<Vec<GitCommand>>,
}

impl ScriptedTool {
	pub fn new<F>(handler: F) -> Self
	where
		F: Fn(&GitCommand, Option<&LineFn<'_>>) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
	{
		ScriptedTool { handler: Box::new(handler), calls: Mutex::new(Vec::new()) }
	}

	pub fn calls(&self) -> Vec<GitCommand> {
		self.calls.lock().unwrap().clone()
	}

	pub fn ops(&self) -> Vec<GitOp> {
		self.calls().iter().map(|c| c.op).collect()
	}
}

#[async_trait]
impl TransferTool for ScriptedTool {
	async fn execute(
		&self,
		cmd: &GitCommand,
		progress: Option<&LineFn<'_>>,
	) -> Result<ToolOutput, ToolError> {
		self.calls.lock().unwrap().push(cmd.clone());
		(self.handler)(cmd, progress)
	}
}

pub fn ok(stdout: &str) -> Result<ToolOutput, ToolError> {
	Ok(ToolOutput { stdout: stdout.to_string(), stderr: String::new() })
}

pub fn failed(cmd: &GitCommand, stderr: &str) -> ToolError {
	ToolError::Failed {
		cmd: cmd.display("git"),
		code: Some(1),
		stdout: String::new(),
		stderr: stderr.to_string(),
	}
}

/// URL argument of a clone invocation
pub fn clone_url(cmd: &GitCommand) -> &str {
	cmd.args.get(cmd.args.len().saturating_sub(2)).map(String::as_str).unwrap_or("")
}

/// Target argument of a clone invocation
pub fn clone_target(cmd: &GitCommand) -> PathBuf {
	cmd.cwd.join(cmd.args.last().map(String::as_str).unwrap_or(""))
}

/// Materialize a checked-out repository with the given files
pub fn fake_checkout(root: &Path, files: &[(&str, &[u8])]) {
	fs::create_dir_all(root.join(".git")).unwrap();
	for (rel, content) in files {
		write_file(&root.join(rel), content);
	}
}

pub fn write_file(path: &Path, content: &[u8]) {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).unwrap();
	}
	fs::write(path, content).unwrap();
}

/// One manifest record as JSON
pub fn record(path: &str, owner: &str, storage: &str, attributes: &str) -> String {
	format!(
		r#"{{"path": "{}", "characterName": "{}", "storagebox": "{}", "attributes": {}}}"#,
		path, owner, storage, attributes
	)
}

/// Minimal HTTP/1.1 server: `/ok/...` answers 200, `/slow/...` never answers, the rest 404
pub async fn serve() -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		loop {
			let (mut socket, _) = match listener.accept().await {
				Ok(conn) => conn,
				Err(_) => return,
			};
			tokio::spawn(async move {
				let mut buf = vec![0u8; 2048];
				let n = socket.read(&mut buf).await.unwrap_or(0);
				let request = String::from_utf8_lossy(&buf[..n]).to_string();
				let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
				if path.starts_with("/slow/") {
					tokio::time::sleep(Duration::from_secs(10)).await;
					return;
				}
				let status = if path.starts_with("/ok/") { "200 OK" } else { "404 Not Found" };
				let response = format!(
					"HTTP/1.1 {}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
					status
				);
				let _ = socket.write_all(response.as_bytes()).await;
				let _ = socket.shutdown().await;
			});
		}
	});
	addr
}

/// Prober that talks to the local server directly, ignoring proxy settings
pub fn local_prober(timeout: Duration) -> MirrorProbe {
	let client = reqwest::Client::builder().no_proxy().timeout(timeout).build().unwrap();
	MirrorProbe::with_client(client, timeout)
}

// vim: ts=4
