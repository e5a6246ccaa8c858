//! Logging prelude module for convenient access to tracing macros.
//!
//! # Usage
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("Selected mirror {}", name);
//! warn!("Probe timed out");
//! ```

pub use tracing::{debug, error, info, warn};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Handle for adjusting the level after the subscriber is installed
pub struct LogLevel {
	handle: reload::Handle<EnvFilter, Registry>,
	from_env: bool,
}

impl LogLevel {
	/// Switch to `level`, unless `RUST_LOG` chose the filter
	pub fn apply(&self, level: &str) {
		if self.from_env {
			return;
		}
		match EnvFilter::try_new(level) {
			Ok(filter) => {
				if let Err(e) = self.handle.reload(filter) {
					warn!("Cannot change log level: {}", e);
				}
			}
			Err(e) => warn!("Ignoring invalid log level '{}': {}", level, e),
		}
	}
}

/// Initialize the tracing subscriber with environment filter support.
///
/// By default, logs at INFO level and above are displayed. Control the log level
/// with the `RUST_LOG` environment variable:
///
/// ```bash
/// RUST_LOG=debug gallery-sync update
/// RUST_LOG=gallery_sync::transfer=trace,gallery_sync::probe=debug gallery-sync clone
/// ```
///
/// `default_level` is used when `RUST_LOG` is unset. The returned handle
/// lets a level read later (e.g. from the config file) take over; it is
/// `None` when a subscriber was already installed.
pub fn init_tracing(default_level: &str) -> Option<LogLevel> {
	let (filter, from_env) = match EnvFilter::try_from_default_env() {
		Ok(filter) => (filter, true),
		Err(_) => (EnvFilter::new(default_level), false),
	};
	let (filter, handle) = reload::Layer::new(filter);

	// A second init (tests, embedding) must not panic
	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.try_init()
		.ok()
		.map(|_| LogLevel { handle, from_env })
}


// vim: ts=4
