//! Converge target directories to the active exclusion set
//!
//! A pass is planned first: every visible catalog asset is mapped to one
//! target file and one source file. The clean pass then removes managed
//! files (by naming convention) that are not in the plan, and the populate
//! pass copies planned files whose bytes differ. The net effect equals a
//! full clean followed by a full copy, but a repeated pass with unchanged
//! inputs writes nothing.

use crate::catalog::Catalog;
use crate::error::SyncError;
use crate::util::{is_downloaded, same_content};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use globset::{GlobBuilder, GlobMatcher};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File names owned by the synchronizer inside target roots
pub const MANAGED_FILE_GLOB: &str = "*gu*.webp";

/// One downstream directory and the source folders mapped into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRoot {
	pub name: String,
	pub root: PathBuf,

	/// First path components (e.g. `gs-character`) that land here
	pub source_folders: Vec<String>,
}

/// A local repository copy assets can be read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRepo {
	pub name: String,
	pub path: PathBuf,
}

/// Owner-group name resolution (`main name -> aliases`)
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
	mains: BTreeMap<String, String>,
	aliases: HashMap<String, String>,
	conflicts: usize,
}

impl AliasTable {
	/// Build from `(main, aliases)` groups
	///
	/// An alias claimed by two groups keeps the owner that came first in
	/// iteration order.
	pub fn new<'a, I>(groups: I) -> Self
	where
		I: IntoIterator<Item = (&'a String, &'a Vec<String>)>,
	{
		let groups: Vec<(&String, &Vec<String>)> = groups.into_iter().collect();
		let mut mains = BTreeMap::new();
		let mut aliases: HashMap<String, String> = HashMap::new();
		let mut conflicts = 0;

		for (main, _) in &groups {
			mains.insert(main.to_lowercase(), main.to_string());
		}
		for (main, names) in groups {
			for alias in names {
				let key = alias.trim().to_lowercase();
				if key.is_empty() {
					continue;
				}
				match aliases.get(&key) {
					Some(owner) if owner != main => {
						warn!("Alias '{}' is claimed by both {} and {}; keeping {}", alias, owner, main, owner);
						conflicts += 1;
					}
					Some(_) => {}
					None => {
						aliases.insert(key, main.to_string());
					}
				}
			}
		}
		AliasTable { mains, aliases, conflicts }
	}

	/// Main name for `name`; unknown names map to themselves
	pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
		let trimmed = name.trim();
		let lower = trimmed.to_lowercase();
		if let Some(main) = self.mains.get(&lower) {
			return main;
		}
		if let Some(main) = self.aliases.get(&lower) {
			return main;
		}
		trimmed
	}

	/// Aliases that were claimed by more than one main name
	pub fn conflicts(&self) -> usize {
		self.conflicts
	}

	pub fn is_empty(&self) -> bool {
		self.mains.is_empty() && self.aliases.is_empty()
	}
}

/// Counters of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
	pub copied: usize,
	pub unchanged: usize,
	pub removed: usize,
	pub excluded: usize,
	pub missing_source: usize,
	pub unmapped: usize,
	pub collisions: usize,
	pub errors: usize,
}

impl ReconcileStats {
	/// Filesystem mutations performed
	pub fn writes(&self) -> usize {
		self.copied + self.removed
	}
}

impl fmt::Display for ReconcileStats {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"copied {}, unchanged {}, removed {}, excluded {}, missing source {}",
			self.copied, self.unchanged, self.removed, self.excluded, self.missing_source
		)?;
		if self.unmapped + self.collisions + self.errors > 0 {
			write!(
				f,
				", unmapped {}, collisions {}, errors {}",
				self.unmapped, self.collisions, self.errors
			)?;
		}
		Ok(())
	}
}

impl AddAssign for ReconcileStats {
	fn add_assign(&mut self, other: Self) {
		self.copied += other.copied;
		self.unchanged += other.unchanged;
		self.removed += other.removed;
		self.excluded += other.excluded;
		self.missing_source += other.missing_source;
		self.unmapped += other.unmapped;
		self.collisions += other.collisions;
		self.errors += other.errors;
	}
}

/// One file to materialize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
	pub relative_path: String,
	pub source: PathBuf,
	pub target: PathBuf,
}

/// Desired target state
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
	pub copies: Vec<PlannedCopy>,

	/// Skip counters gathered while planning
	pub stats: ReconcileStats,
}

impl ReconcilePlan {
	pub fn targets(&self) -> HashSet<PathBuf> {
		self.copies.iter().map(|c| c.target.clone()).collect()
	}
}

enum CopyResult {
	Copied,
	Unchanged,
	MissingSource,
	Failed,
}

/// Makes target roots match policy
pub struct DirectoryReconciler {
	roots: Vec<TargetRoot>,
	sources: Vec<SourceRepo>,
	aliases: AliasTable,
	fan_out: usize,
	managed: GlobMatcher,
}

impl DirectoryReconciler {
	pub fn new(
		roots: Vec<TargetRoot>,
		sources: Vec<SourceRepo>,
		aliases: AliasTable,
		fan_out: usize,
	) -> Result<Self, SyncError> {
		let managed = GlobBuilder::new(MANAGED_FILE_GLOB)
			.case_insensitive(true)
			.literal_separator(true)
			.build()
			.map_err(|e| SyncError::InvalidConfig { message: format!("{}: {}", MANAGED_FILE_GLOB, e) })?
			.compile_matcher();
		Ok(DirectoryReconciler { roots, sources, aliases, fan_out: fan_out.max(1), managed })
	}

	pub fn roots(&self) -> &[TargetRoot] {
		&self.roots
	}

	/// Whether a file name follows the managed-file convention
	pub fn is_managed(&self, file_name: &str) -> bool {
		self.managed.is_match(file_name)
	}

	/// Target path of a relative asset path, if any root takes its folder
	///
	/// Paths that would land outside their target root map to nothing.
	pub fn target_path(&self, relative_path: &str) -> Option<PathBuf> {
		let mut parts = relative_path.split('/');
		let folder = parts.next()?;
		let owner = parts.next()?;
		let rest: Vec<&str> = parts.collect();
		if rest.is_empty() {
			return None;
		}
		let root = self.roots.iter().find(|r| r.source_folders.iter().any(|f| f == folder))?;

		let owner = self.aliases.resolve(owner);
		if !std::iter::once(owner).chain(rest.iter().copied()).all(is_plain_component) {
			warn!("{} does not stay inside {}", relative_path, root.root.display());
			return None;
		}
		let mut target = root.root.join(owner);
		for part in rest {
			target.push(part);
		}
		if !target.starts_with(&root.root) {
			warn!("{} does not stay inside {}", relative_path, root.root.display());
			return None;
		}
		Some(target)
	}

	/// Source file for `relative_path`, searching the newest repository first
	pub async fn resolve_source(&self, relative_path: &str) -> Option<PathBuf> {
		for repo in self.sources.iter().rev() {
			if !is_downloaded(&repo.path) {
				continue;
			}
			let candidate = repo.path.join(relative_path);
			match tokio::fs::metadata(&candidate).await {
				Ok(meta) if meta.is_file() => return Some(candidate),
				Ok(_) => {}
				Err(e) if e.kind() == io::ErrorKind::NotFound => {}
				Err(e) => warn!("Cannot access {}: {}", candidate.display(), e),
			}
		}
		None
	}

	/// Compute the desired target state
	pub async fn plan(&self, catalog: &Catalog, active: &BTreeSet<String>) -> ReconcilePlan {
		let mut stats = ReconcileStats::default();
		let mut claimed: HashMap<PathBuf, &str> = HashMap::new();
		let mut mapped: Vec<(&str, PathBuf)> = Vec::new();

		for asset in catalog.assets() {
			let rel = asset.relative_path.as_str();
			if active.contains(rel) {
				stats.excluded += 1;
				continue;
			}
			let target = match self.target_path(rel) {
				Some(target) => target,
				None => {
					debug!("No target root for {}", rel);
					stats.unmapped += 1;
					continue;
				}
			};
			if let Some(first) = claimed.get(&target) {
				warn!("{} and {} both resolve to {}; keeping {}", first, rel, target.display(), first);
				stats.collisions += 1;
				continue;
			}
			claimed.insert(target.clone(), rel);
			mapped.push((rel, target));
		}

		let lookups: Vec<_> = mapped.iter().map(|(rel, _)| self.resolve_source(rel)).collect();
		let sources: Vec<Option<PathBuf>> =
			stream::iter(lookups).buffered(self.fan_out).collect().await;

		let mut copies = Vec::with_capacity(mapped.len());
		for ((rel, target), source) in mapped.into_iter().zip(sources) {
			match source {
				Some(source) => copies.push(PlannedCopy { relative_path: rel.to_string(), source, target }),
				None => {
					warn!("Source file missing in every repository: {}", rel);
					stats.missing_source += 1;
				}
			}
		}
		ReconcilePlan { copies, stats }
	}

	/// Remove managed files under `root` that are not in `keep`
	///
	/// Only the root itself and its immediate subdirectories are inspected.
	pub async fn clean_root(&self, root: &Path, keep: &HashSet<PathBuf>) -> ReconcileStats {
		let mut stats = ReconcileStats::default();
		let mut dirs = vec![root.to_path_buf()];
		match tokio::fs::read_dir(root).await {
			Ok(mut entries) => loop {
				match entries.next_entry().await {
					Ok(Some(entry)) => {
						if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
							dirs.push(entry.path());
						}
					}
					Ok(None) => break,
					Err(e) => {
						warn!("Listing {} failed: {}", root.display(), e);
						stats.errors += 1;
						break;
					}
				}
			},
			Err(e) if e.kind() == io::ErrorKind::NotFound => return stats,
			Err(e) => {
				warn!("Cannot read target root {}: {}", root.display(), e);
				stats.errors += 1;
				return stats;
			}
		}

		for dir in dirs {
			let mut entries = match tokio::fs::read_dir(&dir).await {
				Ok(entries) => entries,
				Err(e) => {
					if e.kind() != io::ErrorKind::NotFound {
						warn!("Cannot read {}: {}", dir.display(), e);
						stats.errors += 1;
					}
					continue;
				}
			};
			while let Ok(Some(entry)) = entries.next_entry().await {
				let path = entry.path();
				let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
				if !is_file || !self.is_managed(&entry.file_name().to_string_lossy()) || keep.contains(&path) {
					continue;
				}
				match tokio::fs::remove_file(&path).await {
					Ok(()) => stats.removed += 1,
					Err(e) if e.kind() == io::ErrorKind::NotFound => {}
					Err(e) => {
						warn!("Removing {} failed: {}", path.display(), e);
						stats.errors += 1;
					}
				}
			}
		}
		if stats.removed > 0 {
			info!("Removed {} managed files from {}", stats.removed, root.display());
		}
		stats
	}

	/// Run a full reconciliation pass; per-file failures are counted, never fatal
	pub async fn reconcile(&self, catalog: &Catalog, active: &BTreeSet<String>) -> ReconcileStats {
		if catalog.is_empty() {
			warn!("Catalog is empty, nothing to reconcile");
		}
		let plan = self.plan(catalog, active).await;
		let mut stats = plan.stats;

		let keep = plan.targets();
		let cleans: Vec<_> = self.roots.iter().map(|r| self.clean_root(&r.root, &keep)).collect();
		let cleaned = join_all(cleans).await;
		for s in cleaned {
			stats += s;
		}

		let copies: Vec<_> = plan.copies.iter().map(copy_if_changed).collect();
		let results: Vec<CopyResult> =
			stream::iter(copies).buffer_unordered(self.fan_out).collect().await;
		for result in results {
			match result {
				CopyResult::Copied => stats.copied += 1,
				CopyResult::Unchanged => stats.unchanged += 1,
				CopyResult::MissingSource => stats.missing_source += 1,
				CopyResult::Failed => stats.errors += 1,
			}
		}

		info!(
			"Reconciled: copied {}, unchanged {}, removed {}, skipped (excluded {} + missing {} + unmapped {} + collisions {} + errors {})",
			stats.copied,
			stats.unchanged,
			stats.removed,
			stats.excluded,
			stats.missing_source,
			stats.unmapped,
			stats.collisions,
			stats.errors
		);
		stats
	}
}

/// A single non-empty path component with no traversal meaning
fn is_plain_component(part: &str) -> bool {
	!part.trim().is_empty()
		&& part != "."
		&& part != ".."
		&& !part.contains(|c: char| c == '/' || c == '\\' || c == ':')
}

async fn copy_if_changed(copy: &PlannedCopy) -> CopyResult {
	if same_content(&copy.source, &copy.target).await {
		return CopyResult::Unchanged;
	}
	if let Some(parent) = copy.target.parent() {
		if let Err(e) = tokio::fs::create_dir_all(parent).await {
			warn!("Creating {} failed: {}", parent.display(), e);
			return CopyResult::Failed;
		}
	}
	match tokio::fs::copy(&copy.source, &copy.target).await {
		Ok(_) => CopyResult::Copied,
		Err(e) if e.kind() == io::ErrorKind::NotFound && !copy.source.exists() => {
			warn!("Source vanished: {}", copy.source.display());
			CopyResult::MissingSource
		}
		Err(e) => {
			warn!("Copying {} -> {} failed: {}", copy.source.display(), copy.target.display(), e);
			CopyResult::Failed
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn aliases() -> AliasTable {
		let groups = vec![
			("胡桃".to_string(), vec!["Hutao".to_string(), "hu tao".to_string()]),
			("流萤".to_string(), vec!["Firefly".to_string(), "hutao".to_string()]),
		];
		AliasTable::new(groups.iter().map(|(main, names)| (main, names)))
	}

	#[test]
	fn test_alias_resolution() {
		let table = aliases();
		assert_eq!(table.resolve("HUTAO"), "胡桃");
		assert_eq!(table.resolve("Hu Tao"), "胡桃");
		assert_eq!(table.resolve("firefly"), "流萤");
		assert_eq!(table.resolve("流萤"), "流萤");
		assert_eq!(table.resolve("Nobody"), "Nobody");
		// "hutao" claimed twice, first owner wins
		assert_eq!(table.conflicts(), 1);
	}

	#[test]
	fn test_target_mapping() {
		let reconciler = DirectoryReconciler::new(
			vec![
				TargetRoot {
					name: "miao".to_string(),
					root: PathBuf::from("/t/miao"),
					source_folders: vec!["gs-character".to_string(), "sr-character".to_string()],
				},
				TargetRoot {
					name: "zzz".to_string(),
					root: PathBuf::from("/t/zzz"),
					source_folders: vec!["zzz-character".to_string()],
				},
			],
			Vec::new(),
			aliases(),
			4,
		)
		.unwrap();

		assert_eq!(
			reconciler.target_path("gs-character/Hutao/HutaoGu1.webp"),
			Some(PathBuf::from("/t/miao/胡桃/HutaoGu1.webp"))
		);
		assert_eq!(
			reconciler.target_path("zzz-character/Ellen/EllenGu2.webp"),
			Some(PathBuf::from("/t/zzz/Ellen/EllenGu2.webp"))
		);
		assert_eq!(reconciler.target_path("waves-character/X/XGu1.webp"), None);
		assert_eq!(reconciler.target_path("gs-character/Hutao"), None);
		assert_eq!(reconciler.target_path("gs-character/../HutaoGu1.webp"), None);
		assert_eq!(reconciler.target_path("gs-character/Hutao/../../HutaoGu1.webp"), None);
		assert_eq!(reconciler.target_path("gs-character/./HutaoGu1.webp"), None);
		assert_eq!(reconciler.target_path("gs-character//HutaoGu1.webp"), None);
	}

	#[test]
	fn test_alias_order_follows_input() {
		let groups = vec![
			("流萤".to_string(), vec!["hutao".to_string()]),
			("胡桃".to_string(), vec!["Hutao".to_string()]),
		];
		let table = AliasTable::new(groups.iter().map(|(main, names)| (main, names)));
		assert_eq!(table.resolve("HUTAO"), "流萤");
		assert_eq!(table.conflicts(), 1);
	}

	#[test]
	fn test_managed_convention() {
		let reconciler = DirectoryReconciler::new(Vec::new(), Vec::new(), AliasTable::default(), 1).unwrap();
		assert!(reconciler.is_managed("HutaoGu1.webp"));
		assert!(reconciler.is_managed("guide.WEBP"));
		assert!(!reconciler.is_managed("Hutao1.webp"));
		assert!(!reconciler.is_managed("HutaoGu1.png"));
	}
}

// vim: ts=4
