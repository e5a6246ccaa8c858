//! Small filesystem and path helpers

use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Normalize a relative asset path to forward slashes without a leading `./`
pub fn normalize_rel_path(path: &str) -> String {
	let replaced = path.trim().replace('\\', "/");
	let mut out = replaced.as_str();
	while let Some(stripped) = out.strip_prefix("./") {
		out = stripped;
	}
	out.trim_start_matches('/').to_string()
}

/// Whether `path` holds a checked-out repository
pub fn is_downloaded(path: &Path) -> bool {
	path.join(".git").exists()
}

/// Recursively delete a file or directory, retrying transient failures
///
/// Absence is not an error. Returns the last error once `attempts` are used.
pub async fn safe_delete(path: &Path, attempts: u32, delay: Duration) -> io::Result<()> {
	let attempts = attempts.max(1);
	let mut tried = 0;
	loop {
		tried += 1;
		match remove_any(path).await {
			Ok(()) => return Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
			Err(e) if tried >= attempts => {
				warn!("Deleting {} failed after {} attempts: {}", path.display(), tried, e);
				return Err(e);
			}
			Err(e) => {
				debug!(
					"Deleting {} failed ({}/{}): {}, retrying in {}ms",
					path.display(),
					tried,
					attempts,
					e,
					delay.as_millis()
				);
				tokio::time::sleep(delay).await;
			}
		}
	}
}

async fn remove_any(path: &Path) -> io::Result<()> {
	let meta = tokio::fs::symlink_metadata(path).await?;
	if meta.is_dir() {
		tokio::fs::remove_dir_all(path).await
	} else {
		tokio::fs::remove_file(path).await
	}
}

/// Hex-encoded BLAKE3 digest of a file's contents
pub async fn content_digest(path: &Path) -> io::Result<String> {
	let bytes = tokio::fs::read(path).await?;
	Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
}

/// True when both files exist and hold identical bytes
pub async fn same_content(a: &Path, b: &Path) -> bool {
	let (meta_a, meta_b) = match (tokio::fs::metadata(a).await, tokio::fs::metadata(b).await) {
		(Ok(ma), Ok(mb)) => (ma, mb),
		_ => return false,
	};
	if meta_a.len() != meta_b.len() {
		return false;
	}
	match (content_digest(a).await, content_digest(b).await) {
		(Ok(da), Ok(db)) => da == db,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_normalize_rel_path() {
		assert_eq!(normalize_rel_path("gs-character\\Hutao\\HutaoGu1.webp"), "gs-character/Hutao/HutaoGu1.webp");
		assert_eq!(normalize_rel_path("./sr-character/A/AGu2.webp"), "sr-character/A/AGu2.webp");
		assert_eq!(normalize_rel_path(" /x/y "), "x/y");
	}

	#[tokio::test]
	async fn test_safe_delete_is_idempotent() {
		let dir = TempDir::new().unwrap();
		let target = dir.path().join("partial");
		std::fs::create_dir_all(target.join(".git/objects")).unwrap();
		std::fs::write(target.join(".git/HEAD"), b"ref").unwrap();

		safe_delete(&target, 3, Duration::from_millis(10)).await.unwrap();
		assert!(!target.exists());
		safe_delete(&target, 3, Duration::from_millis(10)).await.unwrap();
	}

	#[tokio::test]
	async fn test_same_content() {
		let dir = TempDir::new().unwrap();
		let a = dir.path().join("a");
		let b = dir.path().join("b");
		let c = dir.path().join("c");
		std::fs::write(&a, b"same").unwrap();
		std::fs::write(&b, b"same").unwrap();
		std::fs::write(&c, b"diff").unwrap();
		assert!(same_content(&a, &b).await);
		assert!(!same_content(&a, &c).await);
		assert!(!same_content(&a, &dir.path().join("missing")).await);
	}
}

// vim: ts=4
