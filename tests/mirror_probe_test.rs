//! HTTP probing against a local server

mod common;

use common::{local_prober as prober, serve};
use gallery_sync::endpoint::Endpoint;
use gallery_sync::probe::ProbeStatus;
use gallery_sync::rank::SourceRanker;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_probe_statuses_in_registry_order() {
	let addr = serve().await;
	let endpoints = vec![
		Endpoint::new("Missing", 0, Some(format!("http://{}/missing", addr).as_str()), "https://m.example/{url}"),
		Endpoint::new("Local", 10, Some(format!("http://{}/ok", addr).as_str()), "https://l.example/{url}"),
		Endpoint::new("GitClone", 70, None, "https://gitclone.com/{path}"),
	];

	let results = prober(Duration::from_secs(2)).probe_all(&endpoints, "unused", "/README.md").await;
	let names: Vec<&str> = results.iter().map(|r| r.endpoint.name.as_str()).collect();
	assert_eq!(names, vec!["Missing", "Local", "GitClone"]);

	assert_eq!(results[0].status, ProbeStatus::Timeout);
	assert_eq!(results[0].latency, None);
	assert_eq!(results[1].status, ProbeStatus::Ok);
	assert!(results[1].latency.is_some());
	assert_eq!(results[2].status, ProbeStatus::NotApplicable);

	let ranked = SourceRanker::new(true).rank(&results);
	let order: Vec<&str> = ranked.iter().map(|r| r.endpoint.name.as_str()).collect();
	assert_eq!(order, vec!["Local", "GitClone"]);
}

#[tokio::test]
async fn test_probe_honours_timeout() {
	let addr = serve().await;
	let endpoints =
		vec![Endpoint::new("Slow", 0, Some(format!("http://{}/slow", addr).as_str()), "https://s.example/{url}")];

	let started = Instant::now();
	let results = prober(Duration::from_millis(300)).probe_all(&endpoints, "", "/README.md").await;
	assert_eq!(results[0].status, ProbeStatus::Timeout);
	assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_base_placeholder_expansion() {
	let addr = serve().await;
	let endpoints = vec![Endpoint::new("Canonical", 300, Some("{base}"), "{url}")];
	let base = format!("http://{}/ok/GuGuNiu/Miao-Plugin-MBT/main", addr);

	let results = prober(Duration::from_secs(2)).probe_all(&endpoints, &base, "/README.md").await;
	assert_eq!(results[0].status, ProbeStatus::Ok);
}

// vim: ts=4
