//! Directory reconciliation on real temporary trees
//!
//! Covers:
//! - freshest-copy source resolution
//! - alias mapping into target roots
//! - idempotent second pass (no rewrites)
//! - exclusion removal leaving unmanaged files alone
//! - containment of every write inside its target root

mod common;

use common::{fake_checkout, write_file};
use filetime::FileTime;
use gallery_sync::catalog::{Asset, Catalog, CatalogOrigin, ClassificationFlags};
use gallery_sync::reconcile::{AliasTable, DirectoryReconciler, SourceRepo, TargetRoot};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn asset(path: &str, owner: &str) -> Asset {
	Asset {
		relative_path: path.to_string(),
		owner_group: owner.to_string(),
		storage_box: "Miao-Plugin-MBT".to_string(),
		flags: ClassificationFlags::default(),
	}
}

struct Fixture {
	tmp: TempDir,
	miao: PathBuf,
	zzz: PathBuf,
	reconciler: DirectoryReconciler,
	catalog: Catalog,
}

fn fixture() -> Fixture {
	let tmp = TempDir::new().unwrap();
	let repo1 = tmp.path().join("Miao-Plugin-MBT");
	let repo2 = tmp.path().join("Miao-Plugin-MBT-2");
	let not_downloaded = tmp.path().join("Miao-Plugin-MBT-3");

	fake_checkout(
		&repo1,
		&[
			("gs-character/hutao/HutaoGu1.webp", b"hutao-1 old"),
			("gs-character/hutao/HutaoGu2.webp", b"hutao-2"),
			("zzz-character/Ellen/EllenGu1.webp", b"ellen-1"),
		],
	);
	fake_checkout(&repo2, &[("gs-character/hutao/HutaoGu1.webp", b"hutao-1 new")]);
	// A tree without .git is never used as a source
	write_file(&not_downloaded.join("gs-character/hutao/HutaoGu2.webp"), b"stale");

	let miao = tmp.path().join("targets/miao");
	let zzz = tmp.path().join("targets/zzz");
	let roots = vec![
		TargetRoot {
			name: "miao".to_string(),
			root: miao.clone(),
			source_folders: vec!["gs-character".to_string(), "sr-character".to_string()],
		},
		TargetRoot {
			name: "zzz".to_string(),
			root: zzz.clone(),
			source_folders: vec!["zzz-character".to_string()],
		},
	];
	let sources = vec![
		SourceRepo { name: "Miao-Plugin-MBT".to_string(), path: repo1 },
		SourceRepo { name: "Miao-Plugin-MBT-2".to_string(), path: repo2 },
		SourceRepo { name: "Miao-Plugin-MBT-3".to_string(), path: not_downloaded },
	];
	let mut table = BTreeMap::new();
	table.insert("Hutao".to_string(), vec!["hutao".to_string(), "胡桃".to_string()]);
	let reconciler = DirectoryReconciler::new(roots, sources, AliasTable::new(&table), 4).unwrap();

	let catalog = Catalog::new(
		vec![
			asset("gs-character/hutao/HutaoGu1.webp", "hutao"),
			asset("gs-character/hutao/HutaoGu2.webp", "hutao"),
			asset("zzz-character/Ellen/EllenGu1.webp", "Ellen"),
			asset("gs-character/Nahida/NahidaGu1.webp", "Nahida"),
		],
		CatalogOrigin::Scan,
	);

	Fixture { tmp, miao, zzz, reconciler, catalog }
}

fn mtime(path: &Path) -> FileTime {
	FileTime::from_last_modification_time(&fs::metadata(path).unwrap())
}

#[tokio::test]
async fn test_populate_from_freshest_repo() {
	let f = fixture();
	let stats = f.reconciler.reconcile(&f.catalog, &BTreeSet::new()).await;

	assert_eq!(stats.copied, 3);
	assert_eq!(stats.missing_source, 1, "Nahida exists in no checked-out repository");
	assert_eq!(stats.errors, 0);

	// Alias maps the lower-case owner folder to its main name
	assert_eq!(fs::read(f.miao.join("Hutao/HutaoGu1.webp")).unwrap(), b"hutao-1 new");
	assert_eq!(fs::read(f.miao.join("Hutao/HutaoGu2.webp")).unwrap(), b"hutao-2");
	assert_eq!(fs::read(f.zzz.join("Ellen/EllenGu1.webp")).unwrap(), b"ellen-1");
}

#[tokio::test]
async fn test_second_pass_writes_nothing() {
	let f = fixture();
	f.reconciler.reconcile(&f.catalog, &BTreeSet::new()).await;

	let target = f.miao.join("Hutao/HutaoGu1.webp");
	let old = FileTime::from_unix_time(1_000_000_000, 0);
	filetime::set_file_mtime(&target, old).unwrap();

	let stats = f.reconciler.reconcile(&f.catalog, &BTreeSet::new()).await;
	assert_eq!(stats.writes(), 0);
	assert_eq!(stats.unchanged, 3);
	assert_eq!(mtime(&target), old);
}

#[tokio::test]
async fn test_exclusion_removes_only_managed_files() {
	let f = fixture();
	f.reconciler.reconcile(&f.catalog, &BTreeSet::new()).await;

	write_file(&f.miao.join("Hutao/notes.txt"), b"user file");
	write_file(&f.miao.join("Hutao/splash.webp"), b"plugin asset");
	// Managed name, but no longer in the catalog
	write_file(&f.miao.join("Keqing/KeqingGu9.webp"), b"orphan");

	let mut active = BTreeSet::new();
	active.insert("gs-character/hutao/HutaoGu2.webp".to_string());
	let stats = f.reconciler.reconcile(&f.catalog, &active).await;

	assert_eq!(stats.excluded, 1);
	assert_eq!(stats.removed, 2);
	assert_eq!(stats.copied, 0);
	assert!(!f.miao.join("Hutao/HutaoGu2.webp").exists());
	assert!(!f.miao.join("Keqing/KeqingGu9.webp").exists());
	assert!(f.miao.join("Hutao/HutaoGu1.webp").exists());
	assert!(f.miao.join("Hutao/notes.txt").exists());
	assert!(f.miao.join("Hutao/splash.webp").exists());

	// Lifting the exclusion restores the file
	let stats = f.reconciler.reconcile(&f.catalog, &BTreeSet::new()).await;
	assert_eq!(stats.copied, 1);
	assert!(f.miao.join("Hutao/HutaoGu2.webp").exists());
}

#[tokio::test]
async fn test_tampered_target_is_rewritten() {
	let f = fixture();
	f.reconciler.reconcile(&f.catalog, &BTreeSet::new()).await;

	let target = f.zzz.join("Ellen/EllenGu1.webp");
	fs::write(&target, b"edited by hand").unwrap();

	let stats = f.reconciler.reconcile(&f.catalog, &BTreeSet::new()).await;
	assert_eq!(stats.copied, 1);
	assert_eq!(fs::read(&target).unwrap(), b"ellen-1");
}

#[tokio::test]
async fn test_unmapped_folder_is_skipped() {
	let f = fixture();
	let catalog = Catalog::new(
		vec![asset("waves-character/Jinhsi/JinhsiGu1.webp", "Jinhsi")],
		CatalogOrigin::Scan,
	);
	let stats = f.reconciler.reconcile(&catalog, &BTreeSet::new()).await;
	assert_eq!(stats.unmapped, 1);
	assert_eq!(stats.writes(), 0);
}

#[tokio::test]
async fn test_traversal_path_never_leaves_target_root() {
	let f = fixture();
	let repo = f.tmp.path().join("Miao-Plugin-MBT");
	write_file(&repo.join("HutaoGu1.webp"), b"escaped");

	let catalog = Catalog::new(
		vec![
			asset("gs-character/../HutaoGu1.webp", ".."),
			asset("gs-character/hutao/../../../HutaoGu1.webp", "hutao"),
		],
		CatalogOrigin::Scan,
	);
	let stats = f.reconciler.reconcile(&catalog, &BTreeSet::new()).await;

	assert_eq!(stats.unmapped, 2);
	assert_eq!(stats.copied, 0);
	assert!(!f.tmp.path().join("targets/HutaoGu1.webp").exists());
	assert!(!f.tmp.path().join("HutaoGu1.webp").exists());
}

// vim: ts=4
