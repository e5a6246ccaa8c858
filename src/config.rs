//! Unified configuration for gallery-sync
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (~/.gallery-sync/config.toml)
//! 3. CLI flags (highest priority)

use crate::endpoint::Endpoint;
use crate::error::SyncError;
use crate::policy::{ContentSwitches, StrictnessLevel};
use crate::reconcile::{SourceRepo, TargetRoot};
use crate::transfer::TransferOptions;
use crate::update::UpdateOptions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

/// Unified configuration for synchronization, policy and reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// RUNTIME & STATE
	// ========================================================================
	/// Application data directory (ban list, preferred manifest)
	pub data_dir: PathBuf,

	/// Directory repositories without an explicit `localPath` are cloned into
	pub repo_dir: PathBuf,

	/// Log level used when RUST_LOG is unset
	pub log_level: String,

	// ========================================================================
	// SOURCES
	// ========================================================================
	/// Managed repositories, in configuration order
	pub repos: Vec<RepoConfig>,

	/// Replaces the built-in mirror table when set
	pub endpoints: Option<Vec<Endpoint>>,

	pub probe: ProbeConfig,

	pub transfer: TransferConfig,

	// ========================================================================
	// CATALOG
	// ========================================================================
	/// Manifest file name inside `dataDir`
	pub manifest_file: String,

	/// Manifest path inside the primary repository
	pub repo_manifest_path: String,

	// ========================================================================
	// POLICY
	// ========================================================================
	pub filter: FilterConfig,

	// ========================================================================
	// TARGETS
	// ========================================================================
	pub targets: Vec<TargetConfig>,

	/// Owner-group aliases (`main name -> [aliases]`)
	pub aliases: BTreeMap<String, Vec<String>>,

	/// Concurrent file operations during reconciliation
	pub copy_fan_out: usize,
}

impl Default for Config {
	fn default() -> Self {
		let home = std::env::var("HOME")
			.ok()
			.map(|h| PathBuf::from(h).join(".gallery-sync"))
			.unwrap_or_else(|| PathBuf::from(".gallery-sync"));

		Config {
			// Runtime
			data_dir: home.join("data"),
			repo_dir: home.join("repos"),
			log_level: "info".to_string(),
			// Sources
			repos: vec![
				RepoConfig::new("Miao-Plugin-MBT", "https://github.com/GuGuNiu/Miao-Plugin-MBT/", true),
				RepoConfig::new("Miao-Plugin-MBT-2", "https://github.com/GuGuNiu/Miao-Plugin-MBT-2/", false),
				RepoConfig::new("Miao-Plugin-MBT-3", "https://github.com/GuGuNiu/Miao-Plugin-MBT-3/", false),
			],
			endpoints: None,
			probe: ProbeConfig::default(),
			transfer: TransferConfig::default(),
			// Catalog
			manifest_file: "imagedata.json".to_string(),
			repo_manifest_path: "GuGuNiu-Gallery/imagedata.json".to_string(),
			// Policy
			filter: FilterConfig::default(),
			// Targets
			targets: Vec::new(),
			aliases: BTreeMap::new(),
			copy_fan_out: 16,
		}
	}
}

// ============================================================================
// NESTED CONFIGURATION STRUCTS
// ============================================================================

/// One managed repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RepoConfig {
	/// Name, also the storage box of its assets
	pub name: String,

	/// Canonical repository URL
	pub url: String,

	pub branch: String,

	/// Local checkout path (defaults to `<repoDir>/<name>`)
	pub local_path: Option<PathBuf>,

	/// The primary repository gets ls-remote verification and progress reports
	pub primary: bool,
}

impl RepoConfig {
	pub fn new(name: &str, url: &str, primary: bool) -> Self {
		RepoConfig {
			name: name.to_string(),
			url: url.to_string(),
			branch: "main".to_string(),
			local_path: None,
			primary,
		}
	}
}

impl Default for RepoConfig {
	fn default() -> Self {
		RepoConfig::new("", "", false)
	}
}

/// Mirror probing and ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProbeConfig {
	/// Per-endpoint HTTP probe budget
	pub timeout_ms: u64,

	/// Reference URL the probe resource is fetched from
	pub base_url: String,

	/// Small resource fetched by each probe
	pub resource: String,

	/// Try the canonical endpoint first when it answers faster than this
	pub direct_threshold_ms: u64,

	/// Admit endpoints that cannot be probed
	pub include_not_applicable: bool,

	/// Promote endpoints passing `ls-remote` (primary repository only)
	pub verify_primary: bool,

	pub ls_remote_timeout_ms: u64,
}

impl Default for ProbeConfig {
	fn default() -> Self {
		ProbeConfig {
			timeout_ms: 5000,
			base_url: "https://raw.githubusercontent.com/GuGuNiu/Miao-Plugin-MBT/main".to_string(),
			resource: "/README.md".to_string(),
			direct_threshold_ms: 300,
			include_not_applicable: true,
			verify_primary: true,
			ls_remote_timeout_ms: 20000,
		}
	}
}

impl ProbeConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}

	pub fn direct_threshold(&self) -> Duration {
		Duration::from_millis(self.direct_threshold_ms)
	}

	pub fn ls_remote_timeout(&self) -> Duration {
		Duration::from_millis(self.ls_remote_timeout_ms)
	}
}

/// Clone and update execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferConfig {
	/// Transfer tool executable
	pub git_program: String,

	pub clone_timeout_ms: u64,
	pub pull_timeout_ms: u64,
	pub depth: u32,

	/// Pause between failed attempts
	pub backoff_ms: u64,

	/// Progress percentages reported for the primary repository
	pub milestones: Vec<u8>,

	pub delete_attempts: u32,

	/// Export HTTP(S)_PROXY for prefix-style endpoints
	pub proxy_env: bool,
}

impl Default for TransferConfig {
	fn default() -> Self {
		TransferConfig {
			git_program: "git".to_string(),
			clone_timeout_ms: 600_000,
			pull_timeout_ms: 120_000,
			depth: 1,
			backoff_ms: 1000,
			milestones: vec![10, 50, 90],
			delete_attempts: 3,
			proxy_env: false,
		}
	}
}

impl TransferConfig {
	pub fn transfer_options(&self) -> TransferOptions {
		TransferOptions {
			clone_timeout: Duration::from_millis(self.clone_timeout_ms),
			depth: self.depth,
			backoff: Duration::from_millis(self.backoff_ms),
			milestones: self.milestones.clone(),
			delete_attempts: self.delete_attempts,
			proxy_env: self.proxy_env,
		}
	}

	pub fn update_options(&self) -> UpdateOptions {
		UpdateOptions {
			pull_timeout: Duration::from_millis(self.pull_timeout_ms),
			..UpdateOptions::default()
		}
	}
}

/// Strictness level, content switches and ban list location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterConfig {
	/// Raw strictness level (0, 1 or 2); other values are clamped to 0
	pub strictness: i64,

	pub ai: bool,
	pub easter_egg: bool,
	pub layout: bool,

	/// User exclusion store, relative to `dataDir` unless absolute
	pub ban_list_file: PathBuf,
}

impl Default for FilterConfig {
	fn default() -> Self {
		FilterConfig {
			strictness: 0,
			ai: true,
			easter_egg: true,
			layout: true,
			ban_list_file: PathBuf::from("banlist.json"),
		}
	}
}

impl FilterConfig {
	pub fn level(&self) -> StrictnessLevel {
		StrictnessLevel::clamped(self.strictness)
	}

	pub fn switches(&self) -> ContentSwitches {
		ContentSwitches { ai: self.ai, easter_egg: self.easter_egg, layout: self.layout }
	}
}

/// One downstream target directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TargetConfig {
	pub name: String,
	pub root: PathBuf,
	pub source_folders: Vec<String>,
}

impl Default for TargetConfig {
	fn default() -> Self {
		TargetConfig { name: String::new(), root: PathBuf::new(), source_folders: Vec::new() }
	}
}

// ============================================================================
// LOADING & DERIVED VALUES
// ============================================================================

impl Config {
	/// Default config file location
	pub fn default_path() -> PathBuf {
		std::env::var("HOME")
			.ok()
			.map(|h| PathBuf::from(h).join(".gallery-sync").join("config.toml"))
			.unwrap_or_else(|| PathBuf::from("config.toml"))
	}

	/// Parse TOML text
	pub fn from_toml(text: &str) -> Result<Self, SyncError> {
		toml::from_str(text).map_err(|e| SyncError::InvalidConfig { message: e.to_string() })
	}

	/// Load `path`; a missing file yields the defaults
	pub async fn load(path: &Path) -> Result<Self, SyncError> {
		match tokio::fs::read_to_string(path).await {
			Ok(text) => {
				info!("Loading configuration from {}", path.display());
				let config = Self::from_toml(&text)?;
				config.validate()?;
				Ok(config)
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				debug!("No configuration at {}, using defaults", path.display());
				Ok(Config::default())
			}
			Err(e) => Err(SyncError::FilesystemIo { path: path.display().to_string(), source: e }),
		}
	}

	/// Check repositories and targets for consistency
	pub fn validate(&self) -> Result<(), SyncError> {
		let invalid = |message: String| Err(SyncError::InvalidConfig { message });

		if self.repos.is_empty() {
			return invalid("at least one repository is required".to_string());
		}
		let mut names = HashSet::new();
		for repo in &self.repos {
			if repo.name.trim().is_empty() || repo.url.trim().is_empty() {
				return invalid("repositories need a name and a url".to_string());
			}
			if !names.insert(repo.name.as_str()) {
				return invalid(format!("duplicate repository name '{}'", repo.name));
			}
		}
		match self.repos.iter().filter(|r| r.primary).count() {
			0 | 1 => {}
			n => return invalid(format!("{} repositories are marked primary, at most one may be", n)),
		}

		let mut folders = HashSet::new();
		for target in &self.targets {
			if target.root.as_os_str().is_empty() {
				return invalid(format!("target '{}' has no root", target.name));
			}
			for folder in &target.source_folders {
				if !folders.insert(folder.as_str()) {
					return invalid(format!("source folder '{}' is mapped to more than one target", folder));
				}
			}
		}

		let mut claimed: HashMap<String, &str> = HashMap::new();
		for (main, names) in &self.aliases {
			for alias in names {
				let key = alias.trim().to_lowercase();
				if key.is_empty() {
					continue;
				}
				match claimed.get(&key) {
					Some(owner) if *owner != main.as_str() => {
						return invalid(format!("alias '{}' is claimed by both {} and {}", alias, owner, main));
					}
					_ => {
						claimed.insert(key, main.as_str());
					}
				}
			}
		}

		if let Some(endpoints) = &self.endpoints {
			if endpoints.iter().all(|e| !e.has_usable_transfer()) {
				return invalid("no endpoint has a usable transfer template".to_string());
			}
		}
		if self.copy_fan_out == 0 {
			return invalid("copyFanOut must be at least 1".to_string());
		}
		Ok(())
	}

	/// The primary repository: the one marked primary, else the first
	pub fn primary_repo(&self) -> Option<&RepoConfig> {
		self.repos.iter().find(|r| r.primary).or_else(|| self.repos.first())
	}

	pub fn is_primary(&self, repo: &RepoConfig) -> bool {
		self.primary_repo().map_or(false, |p| p.name == repo.name)
	}

	pub fn repo(&self, name: &str) -> Option<&RepoConfig> {
		self.repos.iter().find(|r| r.name == name)
	}

	pub fn repo_path(&self, repo: &RepoConfig) -> PathBuf {
		repo.local_path.clone().unwrap_or_else(|| self.repo_dir.join(&repo.name))
	}

	pub fn ban_list_path(&self) -> PathBuf {
		if self.filter.ban_list_file.is_absolute() {
			self.filter.ban_list_file.clone()
		} else {
			self.data_dir.join(&self.filter.ban_list_file)
		}
	}

	/// Manifest candidates in order of preference
	pub fn manifest_candidates(&self) -> Vec<PathBuf> {
		let mut candidates = vec![self.data_dir.join(&self.manifest_file)];
		if let Some(primary) = self.primary_repo() {
			candidates.push(self.repo_path(primary).join(&self.repo_manifest_path));
		}
		candidates
	}

	pub fn source_repos(&self) -> Vec<SourceRepo> {
		self.repos
			.iter()
			.map(|r| SourceRepo { name: r.name.clone(), path: self.repo_path(r) })
			.collect()
	}

	pub fn target_roots(&self) -> Vec<TargetRoot> {
		self.targets
			.iter()
			.map(|t| TargetRoot {
				name: t.name.clone(),
				root: t.root.clone(),
				source_folders: t.source_folders.clone(),
			})
			.collect()
	}
}


// vim: ts=4
