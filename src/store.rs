//! Durable storage for the user exclusion set
//!
//! The store is a JSON array of relative paths, rewritten wholesale (sorted,
//! pretty-printed) on every mutation via a temp file and rename.

use crate::error::SyncError;
use crate::util::normalize_rel_path;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File-backed user exclusion set
#[derive(Debug, Clone)]
pub struct ExclusionStore {
	path: PathBuf,
}

impl ExclusionStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		ExclusionStore { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Load the persisted set
	///
	/// A missing file is an empty set. Blank or non-string entries are
	/// skipped; a file that is not a JSON array is `DataCorrupt`.
	pub async fn load(&self) -> Result<BTreeSet<String>, SyncError> {
		let contents = match tokio::fs::read_to_string(&self.path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				info!("Exclusion store {} not found, starting empty", self.path.display());
				return Ok(BTreeSet::new());
			}
			Err(e) => {
				return Err(SyncError::FilesystemIo { path: self.path.display().to_string(), source: e })
			}
		};
		if contents.trim().is_empty() {
			return Ok(BTreeSet::new());
		}

		let values: Vec<serde_json::Value> =
			json5::from_str(&contents).map_err(|e| SyncError::DataCorrupt {
				path: self.path.display().to_string(),
				message: format!("expected an array of paths: {}", e),
			})?;

		let total = values.len();
		let set: BTreeSet<String> = values
			.into_iter()
			.filter_map(|v| match v {
				serde_json::Value::String(s) if !s.trim().is_empty() => Some(normalize_rel_path(&s)),
				_ => None,
			})
			.collect();
		if set.len() < total {
			warn!("Ignored {} invalid or duplicate exclusion entries", total - set.len());
		}
		debug!("Loaded {} user exclusions from {}", set.len(), self.path.display());
		Ok(set)
	}

	/// Persist `set`, replacing the previous content atomically
	pub async fn save(&self, set: &BTreeSet<String>) -> Result<(), SyncError> {
		let write_failed =
			|e: io::Error| SyncError::StoreWriteFailed { path: self.path.display().to_string(), source: e };

		let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
		tokio::fs::create_dir_all(dir).await.map_err(write_failed)?;

		// BTreeSet iterates sorted
		let entries: Vec<&String> = set.iter().collect();
		let json = serde_json::to_string_pretty(&entries)
			.map_err(|e| write_failed(io::Error::new(io::ErrorKind::InvalidData, e)))?;

		let file_name = self.path.file_name().map(|n| n.to_string_lossy().into_owned());
		let tmp = dir.join(format!(
			".{}.{}.tmp",
			file_name.unwrap_or_else(|| "exclusions".to_string()),
			uuid::Uuid::new_v4()
		));
		if let Err(e) = tokio::fs::write(&tmp, json).await {
			let _ = tokio::fs::remove_file(&tmp).await;
			return Err(write_failed(e));
		}
		if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
			let _ = tokio::fs::remove_file(&tmp).await;
			return Err(write_failed(e));
		}
		debug!("Saved {} user exclusions to {}", set.len(), self.path.display());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_missing_store_is_empty() {
		let dir = TempDir::new().unwrap();
		let store = ExclusionStore::new(dir.path().join("banlist.json"));
		assert!(store.load().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_save_sorted_and_reload() {
		let dir = TempDir::new().unwrap();
		let store = ExclusionStore::new(dir.path().join("data/banlist.json"));
		let set: BTreeSet<String> =
			vec!["sr-character/B/BGu1.webp".to_string(), "gs-character/A/AGu1.webp".to_string()]
				.into_iter()
				.collect();
		store.save(&set).await.unwrap();

		let raw = std::fs::read_to_string(store.path()).unwrap();
		let parsed: Vec<String> = serde_json::from_str(&raw).unwrap();
		assert_eq!(parsed, vec!["gs-character/A/AGu1.webp", "sr-character/B/BGu1.webp"]);
		assert!(raw.contains('\n'));

		assert_eq!(store.load().await.unwrap(), set);

		// No temp files left behind
		let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("data"))
			.unwrap()
			.filter_map(|e| e.ok())
			.filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
			.collect();
		assert!(leftovers.is_empty());
	}

	#[tokio::test]
	async fn test_load_skips_invalid_entries() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("banlist.json");
		std::fs::write(&path, r#"["gs-character\\A\\AGu1.webp", "", 3, "gs-character/A/AGu1.webp"]"#)
			.unwrap();
		let set = ExclusionStore::new(&path).load().await.unwrap();
		assert_eq!(set.len(), 1);
		assert!(set.contains("gs-character/A/AGu1.webp"));
	}

	#[tokio::test]
	async fn test_non_array_is_corrupt() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("banlist.json");
		std::fs::write(&path, r#"{"a": 1}"#).unwrap();
		let err = ExclusionStore::new(&path).load().await.unwrap_err();
		assert!(matches!(err, SyncError::DataCorrupt { .. }));
	}

	#[tokio::test]
	async fn test_unwritable_location_fails() {
		let dir = TempDir::new().unwrap();
		let blocker = dir.path().join("file");
		std::fs::write(&blocker, b"x").unwrap();
		let store = ExclusionStore::new(blocker.join("banlist.json"));
		let err = store.save(&BTreeSet::new()).await.unwrap_err();
		assert!(matches!(err, SyncError::StoreWriteFailed { .. }));
	}
}

// vim: ts=4
