//! Configuration file loading

use gallery_sync::config::Config;
use gallery_sync::error::SyncError;
use gallery_sync::policy::StrictnessLevel;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_missing_file_yields_defaults() {
	let tmp = TempDir::new().unwrap();
	let config = Config::load(&tmp.path().join("absent.toml")).await.unwrap();
	assert_eq!(config.repos.len(), 3);
	assert_eq!(config.primary_repo().unwrap().name, "Miao-Plugin-MBT");
	assert_eq!(config.probe.resource, "/README.md");
}

#[tokio::test]
async fn test_camel_case_file() {
	let tmp = TempDir::new().unwrap();
	let path = tmp.path().join("config.toml");
	fs::write(
		&path,
		r#"
dataDir = "/srv/gallery/data"
repoDir = "/srv/gallery/repos"
copyFanOut = 4

[[repos]]
name = "Gallery"
url = "https://github.com/example/Gallery/"
primary = true

[[repos]]
name = "Gallery-2"
url = "https://github.com/example/Gallery-2/"
localPath = "/mnt/gallery-2"

[probe]
timeoutMs = 2500
directThresholdMs = 150

[transfer]
proxyEnv = true
milestones = [25, 75]

[filter]
strictness = 7
ai = false

[[targets]]
name = "miao"
root = "/srv/yunzai/plugins/miao-plugin/resources/profile/normal-character"
sourceFolders = ["gs-character", "sr-character"]

[aliases]
Hutao = ["hutao", "Hu Tao"]
"#,
	)
	.unwrap();

	let config = Config::load(&path).await.unwrap();
	assert_eq!(config.copy_fan_out, 4);
	assert_eq!(config.probe.timeout(), Duration::from_millis(2500));
	assert_eq!(config.probe.direct_threshold(), Duration::from_millis(150));
	assert!(config.transfer.transfer_options().proxy_env);
	assert_eq!(config.transfer.milestones, vec![25, 75]);

	// Out-of-range strictness falls back to no filtering
	assert_eq!(config.filter.level(), StrictnessLevel::None);
	assert!(!config.filter.switches().ai);
	assert!(config.filter.switches().layout);

	assert_eq!(config.repo_path(&config.repos[0]), PathBuf::from("/srv/gallery/repos/Gallery"));
	assert_eq!(config.repo_path(&config.repos[1]), PathBuf::from("/mnt/gallery-2"));
	assert_eq!(config.ban_list_path(), PathBuf::from("/srv/gallery/data/banlist.json"));
	assert_eq!(
		config.manifest_candidates(),
		vec![
			PathBuf::from("/srv/gallery/data/imagedata.json"),
			PathBuf::from("/srv/gallery/repos/Gallery/GuGuNiu-Gallery/imagedata.json"),
		]
	);
	assert_eq!(config.aliases["Hutao"], vec!["hutao".to_string(), "Hu Tao".to_string()]);
	assert_eq!(config.target_roots()[0].source_folders.len(), 2);
}

#[tokio::test]
async fn test_invalid_file_rejected() {
	let tmp = TempDir::new().unwrap();
	let path = tmp.path().join("config.toml");
	fs::write(
		&path,
		r#"
[[repos]]
name = "A"
url = "https://github.com/example/A/"
primary = true

[[repos]]
name = "B"
url = "https://github.com/example/B/"
primary = true
"#,
	)
	.unwrap();

	assert!(matches!(Config::load(&path).await, Err(SyncError::InvalidConfig { .. })));

	fs::write(&path, "repos = 3").unwrap();
	assert!(matches!(Config::load(&path).await, Err(SyncError::InvalidConfig { .. })));
}

// vim: ts=4
