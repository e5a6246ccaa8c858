//! Asset catalog: manifest loading, record validation and scan fallback
//!
//! The catalog is the full set of known assets with their classification
//! flags. It is built wholesale by [`CatalogLoader::load`] and never mutated
//! afterwards; a reload produces a new catalog.

use crate::error::SyncError;
use crate::util::{is_downloaded, normalize_rel_path};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Source folders holding per-character asset directories
pub const GAME_FOLDERS: &[&str] =
	&["gs-character", "sr-character", "zzz-character", "waves-character"];

/// Classification flags of one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationFlags {
	/// Restricted tier A (strictest content class)
	pub tier_a: bool,

	/// Restricted tier B
	pub tier_b: bool,

	/// AI-generated image
	pub ai: bool,

	pub easter_egg: bool,

	/// Full-screen (landscape) layout
	pub fullscreen: bool,
}

/// One tracked asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
	/// Forward-slash normalized path, unique key (e.g. `gs-character/Hutao/HutaoGu1.webp`)
	pub relative_path: String,

	/// Owner group, usually the character name
	pub owner_group: String,

	/// Name of the repository the manifest files this asset under
	pub storage_box: String,

	pub flags: ClassificationFlags,
}

impl Asset {
	/// First path component (the game source folder)
	pub fn source_folder(&self) -> &str {
		self.relative_path.split('/').next().unwrap_or("")
	}
}

/// Where the catalog content came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogOrigin {
	Manifest(PathBuf),
	Scan,
	Empty,
}

/// Frozen set of assets keyed by relative path
#[derive(Debug, Clone)]
pub struct Catalog {
	assets: Vec<Asset>,
	index: BTreeMap<String, usize>,
	origin: CatalogOrigin,
	dropped: usize,
}

impl Catalog {
	/// Build a catalog; later duplicates of a path are dropped and counted
	pub fn new(assets: Vec<Asset>, origin: CatalogOrigin) -> Self {
		let mut kept = Vec::with_capacity(assets.len());
		let mut index = BTreeMap::new();
		let mut dropped = 0;
		for asset in assets {
			if index.contains_key(&asset.relative_path) {
				dropped += 1;
				continue;
			}
			index.insert(asset.relative_path.clone(), kept.len());
			kept.push(asset);
		}
		Catalog { assets: kept, index, origin, dropped }
	}

	pub fn empty() -> Self {
		Catalog::new(Vec::new(), CatalogOrigin::Empty)
	}

	pub fn assets(&self) -> &[Asset] {
		&self.assets
	}

	pub fn get(&self, relative_path: &str) -> Option<&Asset> {
		self.index.get(relative_path).map(|&i| &self.assets[i])
	}

	pub fn contains(&self, relative_path: &str) -> bool {
		self.index.contains_key(relative_path)
	}

	/// Find an asset by relative path or file identifier
	///
	/// Identifiers are file stems with or without the `Gu` marker, matched
	/// case-insensitively: `HutaoGu1`, `hutao1` and `HutaoGu1.webp` all name
	/// `gs-character/Hutao/HutaoGu1.webp`.
	pub fn resolve(&self, input: &str) -> Option<&Asset> {
		let input = input.trim();
		if let Some(asset) = self.get(&normalize_rel_path(input)) {
			return Some(asset);
		}
		if input.contains('/') || input.contains('\\') {
			return None;
		}

		let lower = input.to_lowercase();
		let (name, _, digits) = split_stem(lower.strip_suffix(".webp").unwrap_or(lower.as_str()))?;
		if name.is_empty() {
			return None;
		}
		let wanted = format!("{}gu{}.webp", name, digits);

		self.assets.iter().find(|a| {
			a.relative_path.rsplit('/').next().map_or(false, |f| f.to_lowercase() == wanted)
		})
	}

	pub fn len(&self) -> usize {
		self.assets.len()
	}

	pub fn is_empty(&self) -> bool {
		self.assets.is_empty()
	}

	pub fn origin(&self) -> &CatalogOrigin {
		&self.origin
	}

	/// Records dropped as invalid or duplicate while building
	pub fn dropped(&self) -> usize {
		self.dropped
	}

	fn with_dropped(mut self, extra: usize) -> Self {
		self.dropped += extra;
		self
	}
}

/// Accepts `true`/`false` and the strings `"true"`/`"false"` (any case)
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
	D: Deserializer<'de>,
{
	let value = serde_json::Value::deserialize(deserializer)?;
	Ok(match value {
		serde_json::Value::Bool(b) => b,
		serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
		_ => false,
	})
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RecordAttributes {
	#[serde(deserialize_with = "lenient_bool")]
	is_rx18: bool,
	#[serde(deserialize_with = "lenient_bool")]
	is_px18: bool,
	#[serde(deserialize_with = "lenient_bool")]
	is_ai_image: bool,
	#[serde(deserialize_with = "lenient_bool")]
	is_easter_egg: bool,
	layout: Option<serde_json::Value>,
}

impl RecordAttributes {
	fn flags(&self) -> ClassificationFlags {
		let fullscreen = matches!(&self.layout, Some(serde_json::Value::String(s)) if s == "fullscreen");
		ClassificationFlags {
			tier_a: self.is_rx18,
			tier_b: self.is_px18,
			ai: self.is_ai_image,
			easter_egg: self.is_easter_egg,
			fullscreen,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestRecord {
	path: String,
	character_name: String,
	storagebox: String,
	#[serde(default)]
	attributes: Option<RecordAttributes>,
}

/// Check `<game>-character/<name>/<file>Gu<digits>.webp` (case-insensitive)
pub fn is_valid_asset_path(path: &str) -> bool {
	let parts: Vec<&str> = path.split('/').collect();
	if parts.len() != 3 || parts.iter().any(|p| p.trim().is_empty() || *p == "." || *p == "..") {
		return false;
	}
	if path.contains(|c: char| c == '\\' || c == ':') {
		return false;
	}

	let game = parts[0].to_ascii_lowercase();
	let game_ok = match game.strip_suffix("-character") {
		Some(prefix) => !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_alphabetic()),
		None => false,
	};
	if !game_ok {
		return false;
	}

	let file = parts[2].to_ascii_lowercase();
	match file.strip_suffix(".webp").and_then(split_stem) {
		Some((name, marked, _)) => marked && !name.is_empty(),
		None => false,
	}
}

/// Split a lower-case stem into name, `gu` marker presence and index digits
fn split_stem(stem: &str) -> Option<(&str, bool, &str)> {
	let head = stem.trim_end_matches(|c: char| c.is_ascii_digit());
	let digits = &stem[head.len()..];
	if digits.is_empty() {
		return None;
	}
	Some(match head.strip_suffix("gu") {
		Some(name) => (name, true, digits),
		None => (head, false, digits),
	})
}

fn validate_record(record: ManifestRecord) -> Option<Asset> {
	if record.character_name.trim().is_empty() || record.storagebox.trim().is_empty() {
		return None;
	}
	let relative_path = normalize_rel_path(&record.path);
	if relative_path.is_empty() {
		return None;
	}
	if !is_valid_asset_path(&relative_path) {
		warn!("Dropping manifest record with malformed path: {}", record.path);
		return None;
	}
	let flags = record.attributes.as_ref().map(RecordAttributes::flags).unwrap_or_default();
	Some(Asset {
		relative_path,
		owner_group: record.character_name.trim().to_string(),
		storage_box: record.storagebox.trim().to_string(),
		flags,
	})
}

/// Parse manifest text into validated assets
///
/// The top level must be an array. Individual records that fail to parse or
/// validate are dropped; the second tuple field counts them.
pub fn parse_manifest(text: &str, origin: &Path) -> Result<(Vec<Asset>, usize), SyncError> {
	let values: Vec<serde_json::Value> =
		json5::from_str(text).map_err(|e| SyncError::DataCorrupt {
			path: origin.display().to_string(),
			message: e.to_string(),
		})?;

	let mut assets = Vec::with_capacity(values.len());
	let mut invalid = 0;
	for value in values {
		match serde_json::from_value::<ManifestRecord>(value) {
			Ok(record) => match validate_record(record) {
				Some(asset) => assets.push(asset),
				None => invalid += 1,
			},
			Err(e) => {
				debug!("Unparsable manifest record in {}: {}", origin.display(), e);
				invalid += 1;
			}
		}
	}
	Ok((assets, invalid))
}

/// A downloaded repository tree the scan fallback may walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRoot {
	/// Repository name, used as the storage box of scanned assets
	pub name: String,
	pub path: PathBuf,
}

/// Builds catalogs from manifests or, failing that, from the local trees
#[derive(Debug, Clone, Default)]
pub struct CatalogLoader {
	/// Manifest candidates in order of preference
	pub manifests: Vec<PathBuf>,

	/// Repositories for the scan fallback, in configuration order
	pub scan_roots: Vec<ScanRoot>,
}

impl CatalogLoader {
	pub fn new(manifests: Vec<PathBuf>, scan_roots: Vec<ScanRoot>) -> Self {
		CatalogLoader { manifests, scan_roots }
	}

	/// Load the catalog
	///
	/// Manifest candidates are tried in order while they are missing. A
	/// manifest that exists but cannot be read or parsed, or that holds no
	/// records, triggers the scan fallback. This never fails; at worst the
	/// catalog is empty.
	pub async fn load(&self) -> Catalog {
		let (path, assets, invalid) = match self.load_manifest().await {
			Ok(Some(found)) => found,
			Ok(None) => {
				warn!("No manifest found, scanning local trees");
				return self.scan_catalog().await;
			}
			Err(e) => {
				error!("{}; scanning local trees", e);
				return self.scan_catalog().await;
			}
		};
		if invalid > 0 {
			warn!("Ignored {} invalid manifest records in {}", invalid, path.display());
		}
		if assets.is_empty() {
			warn!("Manifest {} has no valid records, scanning local trees", path.display());
			return self.scan_catalog().await.with_dropped(invalid);
		}
		let catalog = Catalog::new(assets, CatalogOrigin::Manifest(path)).with_dropped(invalid);
		info!("Catalog loaded: {} assets from manifest", catalog.len());
		catalog
	}

	async fn load_manifest(&self) -> Result<Option<(PathBuf, Vec<Asset>, usize)>, SyncError> {
		for path in &self.manifests {
			let text = match tokio::fs::read_to_string(path).await {
				Ok(text) => text,
				Err(e) if e.kind() == io::ErrorKind::NotFound => {
					debug!("Manifest candidate {} not found", path.display());
					continue;
				}
				Err(e) => {
					return Err(SyncError::DataCorrupt {
						path: path.display().to_string(),
						message: e.to_string(),
					});
				}
			};
			let (assets, invalid) = parse_manifest(&text, path)?;
			return Ok(Some((path.clone(), assets, invalid)));
		}
		Ok(None)
	}

	async fn scan_catalog(&self) -> Catalog {
		let roots: Vec<ScanRoot> =
			self.scan_roots.iter().filter(|r| is_downloaded(&r.path)).cloned().collect();
		if roots.is_empty() {
			warn!("No downloaded repository to scan");
			return Catalog::empty();
		}

		let names: Vec<&str> = roots.iter().map(|r| r.name.as_str()).collect();
		info!("Scanning local repositories: {}", names.join(", "));

		let scanned = tokio::task::spawn_blocking(move || scan_roots(&roots)).await;
		match scanned {
			Ok((assets, invalid)) => {
				let catalog = Catalog::new(assets, CatalogOrigin::Scan).with_dropped(invalid);
				info!("Scan found {} assets", catalog.len());
				catalog
			}
			Err(e) => {
				error!("Scan task failed: {}", e);
				Catalog::empty()
			}
		}
	}
}

/// Walk `<root>/<game folder>/<owner>/<file>.webp`; first occurrence wins
fn scan_roots(roots: &[ScanRoot]) -> (Vec<Asset>, usize) {
	let mut seen: HashSet<String> = HashSet::new();
	let mut assets = Vec::new();
	let mut invalid = 0;

	for root in roots {
		for folder in GAME_FOLDERS {
			let base = root.path.join(folder);
			if !base.is_dir() {
				continue;
			}
			let walker = ignore::WalkBuilder::new(&base)
				.standard_filters(false)
				.max_depth(Some(2))
				.sort_by_file_name(|a, b| a.cmp(b))
				.build();

			for entry in walker {
				let entry = match entry {
					Ok(entry) => entry,
					Err(e) => {
						warn!("Scan error under {}: {}", base.display(), e);
						continue;
					}
				};
				if entry.depth() != 2 || !entry.file_type().map_or(false, |t| t.is_file()) {
					continue;
				}
				let file_name = entry.file_name().to_string_lossy().into_owned();
				if !file_name.to_ascii_lowercase().ends_with(".webp") {
					continue;
				}
				let owner = match entry.path().parent().and_then(|p| p.file_name()) {
					Some(owner) => owner.to_string_lossy().into_owned(),
					None => continue,
				};

				let relative_path = format!("{}/{}/{}", folder, owner, file_name);
				if !is_valid_asset_path(&relative_path) {
					invalid += 1;
					continue;
				}
				if seen.insert(relative_path.clone()) {
					assets.push(Asset {
						relative_path,
						owner_group: owner,
						storage_box: root.name.clone(),
						flags: ClassificationFlags::default(),
					});
				}
			}
		}
	}
	(assets, invalid)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_asset_path_validation() {
		assert!(is_valid_asset_path("gs-character/Hutao/HutaoGu1.webp"));
		assert!(is_valid_asset_path("SR-character/Firefly/fireflygu12.WEBP"));
		assert!(!is_valid_asset_path("gs-character/Hutao/Hutao1.webp"));
		assert!(!is_valid_asset_path("gs-character/Hutao/Gu1.webp"));
		assert!(!is_valid_asset_path("gs-character/Hutao/HutaoGu.webp"));
		assert!(!is_valid_asset_path("gs-character/Hutao/HutaoGu1.png"));
		assert!(!is_valid_asset_path("gs2-character/Hutao/HutaoGu1.webp"));
		assert!(!is_valid_asset_path("gs-character/Hutao/sub/HutaoGu1.webp"));
		assert!(!is_valid_asset_path("gs-character/../HutaoGu1.webp"));
		assert!(!is_valid_asset_path("gs-character/./HutaoGu1.webp"));
		assert!(!is_valid_asset_path("gs-character/C:/HutaoGu1.webp"));
	}

	#[test]
	fn test_parse_manifest_lenient_flags() {
		let text = r#"[
			{"path": "gs-character\\Hutao\\HutaoGu1.webp", "characterName": "Hutao",
			 "storagebox": "Miao-Plugin-MBT", "attributes": {"isRx18": "true", "layout": "fullscreen"}},
			{"path": "gs-character/Hutao/HutaoGu2.webp", "characterName": "Hutao",
			 "storagebox": "Miao-Plugin-MBT", "attributes": {"isPx18": true, "isAiImage": "FALSE"}},
			{"path": "gs-character/Hutao/bad.webp", "characterName": "Hutao", "storagebox": "x"},
			{"path": "gs-character/Hutao/HutaoGu3.webp", "characterName": "", "storagebox": "x"},
			{"characterName": "Nobody"},
			42
		]"#;
		let (assets, invalid) = parse_manifest(text, Path::new("ImageData.json")).unwrap();
		assert_eq!(assets.len(), 2);
		assert_eq!(invalid, 4);

		assert_eq!(assets[0].relative_path, "gs-character/Hutao/HutaoGu1.webp");
		assert!(assets[0].flags.tier_a);
		assert!(assets[0].flags.fullscreen);
		assert!(!assets[0].flags.tier_b);

		assert!(assets[1].flags.tier_b);
		assert!(!assets[1].flags.ai);
	}

	#[test]
	fn test_parse_manifest_drops_traversal() {
		let text = r#"[
			{"path": "gs-character/../HutaoGu1.webp", "characterName": "Hutao", "storagebox": "x"},
			{"path": "gs-character\\..\\HutaoGu2.webp", "characterName": "Hutao", "storagebox": "x"},
			{"path": "/gs-character/Hutao/HutaoGu3.webp", "characterName": "Hutao", "storagebox": "x"}
		]"#;
		let (assets, invalid) = parse_manifest(text, Path::new("ImageData.json")).unwrap();
		assert_eq!(invalid, 2);
		assert_eq!(assets.len(), 1);
		assert_eq!(assets[0].relative_path, "gs-character/Hutao/HutaoGu3.webp");
	}

	#[test]
	fn test_parse_manifest_rejects_non_array() {
		let err = parse_manifest("{\"path\": 1}", Path::new("m.json")).unwrap_err();
		assert!(matches!(err, SyncError::DataCorrupt { .. }));
	}

	#[test]
	fn test_catalog_dedups_paths() {
		let asset = Asset {
			relative_path: "gs-character/A/AGu1.webp".to_string(),
			owner_group: "A".to_string(),
			storage_box: "one".to_string(),
			flags: ClassificationFlags::default(),
		};
		let mut dup = asset.clone();
		dup.storage_box = "two".to_string();

		let catalog = Catalog::new(vec![asset, dup], CatalogOrigin::Scan);
		assert_eq!(catalog.len(), 1);
		assert_eq!(catalog.dropped(), 1);
		assert_eq!(catalog.get("gs-character/A/AGu1.webp").unwrap().storage_box, "one");
		assert_eq!(catalog.assets()[0].source_folder(), "gs-character");
	}

	#[test]
	fn test_resolve_identifier() {
		let catalog = Catalog::new(
			vec![Asset {
				relative_path: "gs-character/Hutao/HutaoGu12.webp".to_string(),
				owner_group: "Hutao".to_string(),
				storage_box: "main".to_string(),
				flags: ClassificationFlags::default(),
			}],
			CatalogOrigin::Scan,
		);
		let path = "gs-character/Hutao/HutaoGu12.webp";
		assert_eq!(catalog.resolve(path).unwrap().relative_path, path);
		assert_eq!(catalog.resolve("gs-character\\Hutao\\HutaoGu12.webp").unwrap().relative_path, path);
		assert_eq!(catalog.resolve("hutaogu12").unwrap().relative_path, path);
		assert_eq!(catalog.resolve("Hutao12").unwrap().relative_path, path);
		assert_eq!(catalog.resolve("HutaoGu12.webp").unwrap().relative_path, path);
		assert!(catalog.resolve("Hutao1").is_none());
		assert!(catalog.resolve("Hutao").is_none());
		assert!(catalog.resolve("gs-character/Hutao/HutaoGu1.webp").is_none());
	}
}

// vim: ts=4
