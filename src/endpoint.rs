//! Static table of mirror endpoints
//!
//! Each endpoint carries a priority tier (lower is preferred), an optional
//! probe URL template and a transfer URL template. Templates use two
//! placeholders:
//!
//! - `{base}` in probe templates: the raw reference URL being probed
//! - `{url}` in transfer templates: the full repository URL
//! - `{path}` in transfer templates: the repository URL without its scheme
//!
//! An endpoint without a probe template is "not probeable by design". That is
//! a distinct state from a failed probe and must never be confused with one.

use serde::{Deserialize, Serialize};

/// Placeholder for the reference URL in probe templates
pub const BASE_PLACEHOLDER: &str = "{base}";

/// Placeholder for the repository URL in transfer templates
pub const URL_PLACEHOLDER: &str = "{url}";

/// Placeholder for the scheme-less repository URL in transfer templates
pub const PATH_PLACEHOLDER: &str = "{path}";

/// A candidate mirror endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
	/// Display name, unique within a registry
	pub name: String,

	/// Static preference tier, lower is preferred
	pub priority: i32,

	/// Probe URL template, `None` when the endpoint cannot be probed
	#[serde(default)]
	pub probe_template: Option<String>,

	/// Transfer URL template
	pub transfer_template: String,
}

impl Endpoint {
	/// Create a probeable endpoint
	pub fn new(
		name: impl Into<String>,
		priority: i32,
		probe_template: Option<&str>,
		transfer_template: impl Into<String>,
	) -> Self {
		Endpoint {
			name: name.into(),
			priority,
			probe_template: probe_template.map(String::from),
			transfer_template: transfer_template.into(),
		}
	}

	/// True for the origin itself, which uses the repository URL unmodified
	pub fn is_canonical(&self) -> bool {
		self.transfer_template.trim() == URL_PLACEHOLDER
	}

	pub fn is_probeable(&self) -> bool {
		self.probe_template.is_some()
	}

	/// True when the transfer template can actually produce a URL
	pub fn has_usable_transfer(&self) -> bool {
		let t = self.transfer_template.trim();
		!t.is_empty() && (t.contains(URL_PLACEHOLDER) || t.contains(PATH_PLACEHOLDER))
	}

	/// Build the probe URL for `base` + `resource`, or `None` if not probeable
	pub fn probe_url(&self, base: &str, resource: &str) -> Option<String> {
		let template = self.probe_template.as_ref()?;
		let prefix = template.replace(BASE_PLACEHOLDER, base.trim_end_matches('/'));
		Some(join_url(&prefix, resource))
	}

	/// Build the effective transfer URL for a repository
	pub fn transfer_url(&self, repo_url: &str) -> String {
		let repo_url = repo_url.trim();
		if self.is_canonical() {
			return repo_url.to_string();
		}
		let repo_trimmed = repo_url.trim_end_matches('/');
		self.transfer_template
			.replace(URL_PLACEHOLDER, repo_trimmed)
			.replace(PATH_PLACEHOLDER, strip_scheme(repo_trimmed))
	}

	/// HTTP proxy origin for prefix-style endpoints (`scheme://host`)
	pub fn proxy_origin(&self) -> Option<String> {
		if self.is_canonical() {
			return None;
		}
		let template = self.transfer_template.trim();
		let scheme_len = if template.starts_with("https://") {
			"https://".len()
		} else if template.starts_with("http://") {
			"http://".len()
		} else {
			return None;
		};
		let rest = &template[scheme_len..];
		let host_end = rest.find('/').unwrap_or(rest.len());
		let host = &rest[..host_end];
		if host.is_empty() || host.contains('{') {
			return None;
		}
		Some(format!("{}{}", &template[..scheme_len], host))
	}
}

fn join_url(prefix: &str, resource: &str) -> String {
	if resource.is_empty() {
		return prefix.to_string();
	}
	format!("{}/{}", prefix.trim_end_matches('/'), resource.trim_start_matches('/'))
}

fn strip_scheme(url: &str) -> &str {
	url.find("://").map(|i| &url[i + 3..]).unwrap_or(url)
}

/// Ordered table of endpoints, loaded once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRegistry {
	endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
	pub fn new(endpoints: Vec<Endpoint>) -> Self {
		EndpointRegistry { endpoints }
	}

	/// Built-in mirror table for GitHub-hosted repositories
	pub fn builtin() -> Self {
		let gh = |prefix: &str| format!("{}/{}", prefix, BASE_PLACEHOLDER);
		let clone = |prefix: &str| format!("{}/{}", prefix, URL_PLACEHOLDER);
		let mirrors = [
			("Moeyy", 0, "https://github.moeyy.xyz"),
			("Ghfast", 10, "https://ghfast.top"),
			("Ghp", 20, "https://ghp.ci"),
			("Ghgo", 20, "https://ghgo.xyz"),
			("Yumenaka", 30, "https://git.yumenaka.net"),
			("GhConSh", 35, "https://gh.con.sh"),
			("GhpsCc", 45, "https://ghps.cc"),
			("GhproxyCom", 50, "https://ghproxy.com"),
			("GhproxyNet", 50, "https://ghproxy.net"),
			("GhddlcTop", 55, "https://gh.ddlc.top"),
		];

		let mut endpoints: Vec<Endpoint> = mirrors
			.iter()
			.map(|(name, priority, prefix)| Endpoint {
				name: name.to_string(),
				priority: *priority,
				probe_template: Some(gh(prefix)),
				transfer_template: clone(prefix),
			})
			.collect();

		endpoints.push(Endpoint {
			name: "GitClone".to_string(),
			priority: 70,
			probe_template: None,
			transfer_template: format!("https://gitclone.com/{}", PATH_PLACEHOLDER),
		});
		endpoints.push(Endpoint {
			name: "Mirror".to_string(),
			priority: 80,
			probe_template: Some(
				"https://raw.gitmirror.com/GuGuNiu/Miao-Plugin-MBT/main".to_string(),
			),
			transfer_template: clone("https://hub.gitmirror.com"),
		});
		endpoints.push(Endpoint {
			name: "GitHub".to_string(),
			priority: 300,
			probe_template: Some(BASE_PLACEHOLDER.to_string()),
			transfer_template: URL_PLACEHOLDER.to_string(),
		});

		EndpointRegistry { endpoints }
	}

	pub fn endpoints(&self) -> &[Endpoint] {
		&self.endpoints
	}

	pub fn get(&self, name: &str) -> Option<&Endpoint> {
		self.endpoints.iter().find(|e| e.name == name)
	}

	/// The origin endpoint, if the table has one
	pub fn canonical(&self) -> Option<&Endpoint> {
		self.endpoints.iter().find(|e| e.is_canonical())
	}

	pub fn len(&self) -> usize {
		self.endpoints.len()
	}

	pub fn is_empty(&self) -> bool {
		self.endpoints.is_empty()
	}
}

impl Default for EndpointRegistry {
	fn default() -> Self {
		Self::builtin()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const REPO: &str = "https://github.com/GuGuNiu/Miao-Plugin-MBT/";
	const RAW: &str = "https://raw.githubusercontent.com/GuGuNiu/Miao-Plugin-MBT/main";

	#[test]
	fn test_canonical_uses_raw_url() {
		let registry = EndpointRegistry::builtin();
		let github = registry.canonical().unwrap();
		assert_eq!(github.name, "GitHub");
		assert_eq!(github.transfer_url(REPO), REPO);
		assert_eq!(github.proxy_origin(), None);
		assert_eq!(github.probe_url(RAW, "/README.md").unwrap(), format!("{}/README.md", RAW));
	}

	#[test]
	fn test_prefix_endpoint_composes_url() {
		let registry = EndpointRegistry::builtin();
		let ghfast = registry.get("Ghfast").unwrap();
		assert_eq!(
			ghfast.transfer_url(REPO),
			"https://ghfast.top/https://github.com/GuGuNiu/Miao-Plugin-MBT"
		);
		assert_eq!(ghfast.proxy_origin().as_deref(), Some("https://ghfast.top"));
		assert_eq!(
			ghfast.probe_url(RAW, "README.md").unwrap(),
			format!("https://ghfast.top/{}/README.md", RAW)
		);
	}

	#[test]
	fn test_strip_scheme_endpoint() {
		let registry = EndpointRegistry::builtin();
		let gitclone = registry.get("GitClone").unwrap();
		assert!(!gitclone.is_probeable());
		assert!(gitclone.has_usable_transfer());
		assert_eq!(gitclone.probe_url(RAW, "/README.md"), None);
		assert_eq!(
			gitclone.transfer_url(REPO),
			"https://gitclone.com/github.com/GuGuNiu/Miao-Plugin-MBT"
		);
	}

	#[test]
	fn test_unusable_transfer_template() {
		let endpoint = Endpoint::new("Broken", 1, None, "");
		assert!(!endpoint.has_usable_transfer());
	}
}

// vim: ts=4
