//! Exclusion policy: strictness levels, content switches and the user set
//!
//! Two logical sets decide visibility. The user set is maintained by the
//! operator and persisted. The derived set is recomputed from scratch from
//! the catalog and the current policy every time it is needed; it is the
//! only place classification flags are interpreted. The active set is their
//! union.

use crate::catalog::{Catalog, ClassificationFlags};
use crate::error::SyncError;
use crate::store::ExclusionStore;
use crate::util::normalize_rel_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

/// How much restricted content is hidden, ordered by strictness
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrictnessLevel {
	None,
	TierAOnly,
	TierAAndB,
}

impl StrictnessLevel {
	pub const ALL: [StrictnessLevel; 3] =
		[StrictnessLevel::None, StrictnessLevel::TierAOnly, StrictnessLevel::TierAAndB];

	/// Map the integer form (0/1/2)
	pub fn from_raw(raw: i64) -> Result<Self, SyncError> {
		match raw {
			0 => Ok(StrictnessLevel::None),
			1 => Ok(StrictnessLevel::TierAOnly),
			2 => Ok(StrictnessLevel::TierAAndB),
			_ => Err(SyncError::PolicyInvalid {
				message: format!("strictness level {} is not one of 0, 1, 2", raw),
			}),
		}
	}

	/// Like [`from_raw`](Self::from_raw), but out-of-range values fall back to `None`
	pub fn clamped(raw: i64) -> Self {
		match Self::from_raw(raw) {
			Ok(level) => level,
			Err(e) => {
				warn!("{}; using {}", e, StrictnessLevel::None);
				StrictnessLevel::None
			}
		}
	}

	pub fn as_raw(self) -> u8 {
		match self {
			StrictnessLevel::None => 0,
			StrictnessLevel::TierAOnly => 1,
			StrictnessLevel::TierAAndB => 2,
		}
	}

	/// Whether an asset with `flags` is hidden at this level
	pub fn excludes(self, flags: &ClassificationFlags) -> bool {
		match self {
			StrictnessLevel::None => false,
			StrictnessLevel::TierAOnly => flags.tier_a,
			StrictnessLevel::TierAAndB => flags.tier_a || flags.tier_b,
		}
	}
}

impl Default for StrictnessLevel {
	fn default() -> Self {
		StrictnessLevel::None
	}
}

impl fmt::Display for StrictnessLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StrictnessLevel::None => write!(f, "0 (none)"),
			StrictnessLevel::TierAOnly => write!(f, "1 (tier A)"),
			StrictnessLevel::TierAAndB => write!(f, "2 (tier A and B)"),
		}
	}
}

/// Content switches; a disabled switch hides the matching assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentSwitches {
	/// Show AI-generated images
	pub ai: bool,

	/// Show easter-egg images
	pub easter_egg: bool,

	/// Show full-screen layout images
	pub layout: bool,
}

impl Default for ContentSwitches {
	fn default() -> Self {
		ContentSwitches { ai: true, easter_egg: true, layout: true }
	}
}

impl ContentSwitches {
	pub fn excludes(&self, flags: &ClassificationFlags) -> bool {
		(!self.ai && flags.ai)
			|| (!self.easter_egg && flags.easter_egg)
			|| (!self.layout && flags.fullscreen)
	}

	pub fn all_enabled(&self) -> bool {
		self.ai && self.easter_egg && self.layout
	}
}

/// Assets hidden by `level` alone
pub fn compute_derived_exclusions(catalog: &Catalog, level: StrictnessLevel) -> BTreeSet<String> {
	if level == StrictnessLevel::None {
		return BTreeSet::new();
	}
	catalog
		.assets()
		.iter()
		.filter(|a| level.excludes(&a.flags))
		.map(|a| a.relative_path.clone())
		.collect()
}

/// Assets hidden by disabled content switches
pub fn compute_switch_exclusions(catalog: &Catalog, switches: &ContentSwitches) -> BTreeSet<String> {
	if switches.all_enabled() {
		return BTreeSet::new();
	}
	catalog
		.assets()
		.iter()
		.filter(|a| switches.excludes(&a.flags))
		.map(|a| a.relative_path.clone())
		.collect()
}

/// Result of adding to the user set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
	Added,
	AlreadyPresent,
}

/// Result of removing from the user set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
	/// Removed and no longer hidden
	Visible,

	/// Removed, but the derived set still hides it
	StillHidden,

	/// The path was not in the user set
	NotInUserSet,
}

/// Owns the user exclusion set and the current policy
pub struct FilterPolicyEngine {
	store: ExclusionStore,
	user: BTreeSet<String>,
	level: StrictnessLevel,
	switches: ContentSwitches,
}

impl FilterPolicyEngine {
	pub fn new(
		store: ExclusionStore,
		user: BTreeSet<String>,
		level: StrictnessLevel,
		switches: ContentSwitches,
	) -> Self {
		FilterPolicyEngine { store, user, level, switches }
	}

	/// Load the user set from `store`
	pub async fn open(
		store: ExclusionStore,
		level: StrictnessLevel,
		switches: ContentSwitches,
	) -> Result<Self, SyncError> {
		let user = store.load().await?;
		Ok(Self::new(store, user, level, switches))
	}

	pub fn user_exclusions(&self) -> &BTreeSet<String> {
		&self.user
	}

	pub fn level(&self) -> StrictnessLevel {
		self.level
	}

	pub fn set_level(&mut self, level: StrictnessLevel) {
		if level != self.level {
			info!("Strictness level {} -> {}", self.level, level);
			self.level = level;
		}
	}

	pub fn switches(&self) -> ContentSwitches {
		self.switches
	}

	pub fn set_switches(&mut self, switches: ContentSwitches) {
		self.switches = switches;
	}

	pub fn store(&self) -> &ExclusionStore {
		&self.store
	}

	/// Everything the current policy hides, excluding user choices
	pub fn derived_exclusions(&self, catalog: &Catalog) -> BTreeSet<String> {
		let mut derived = compute_derived_exclusions(catalog, self.level);
		derived.extend(compute_switch_exclusions(catalog, &self.switches));
		derived
	}

	/// `user ∪ derived`, recomputed on every call
	pub fn active_exclusions(&self, catalog: &Catalog) -> BTreeSet<String> {
		let mut active = self.derived_exclusions(catalog);
		active.extend(self.user.iter().cloned());
		debug!(
			"Active exclusions: {} (user {}, level {})",
			active.len(),
			self.user.len(),
			self.level
		);
		active
	}

	/// Whether `path` is hidden by policy rather than by the user
	pub fn is_policy_hidden(&self, catalog: &Catalog, path: &str) -> bool {
		match catalog.get(path) {
			Some(asset) => self.level.excludes(&asset.flags) || self.switches.excludes(&asset.flags),
			None => false,
		}
	}

	/// Add `path` to the user set; committed only once persisted
	pub async fn add_user_exclusion(&mut self, path: &str) -> Result<AddOutcome, SyncError> {
		let key = normalize_rel_path(path);
		if key.is_empty() {
			return Err(SyncError::Other { message: "empty exclusion path".to_string() });
		}
		if !self.user.insert(key.clone()) {
			return Ok(AddOutcome::AlreadyPresent);
		}
		if let Err(e) = self.store.save(&self.user).await {
			self.user.remove(&key);
			warn!("Rolled back exclusion of {}: {}", key, e);
			return Err(e);
		}
		info!("Excluded {}", key);
		Ok(AddOutcome::Added)
	}

	/// Remove `path` from the user set; committed only once persisted
	pub async fn remove_user_exclusion(
		&mut self,
		catalog: &Catalog,
		path: &str,
	) -> Result<RemovalOutcome, SyncError> {
		let key = normalize_rel_path(path);
		if !self.user.remove(&key) {
			return Ok(RemovalOutcome::NotInUserSet);
		}
		if let Err(e) = self.store.save(&self.user).await {
			self.user.insert(key.clone());
			warn!("Rolled back removal of {}: {}", key, e);
			return Err(e);
		}
		if self.is_policy_hidden(catalog, &key) {
			info!("Removed {} from user exclusions; still hidden by policy", key);
			Ok(RemovalOutcome::StillHidden)
		} else {
			info!("Removed {} from user exclusions", key);
			Ok(RemovalOutcome::Visible)
		}
	}
}


// vim: ts=4
