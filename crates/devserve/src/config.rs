use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: &str = "8000";

/// Everything needed to launch the server. Fixed for the lifetime of the
/// supervisor; restarts only ever change the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
	pub document_root: PathBuf,
	pub router_script: Option<PathBuf>,
	pub php_binary: PathBuf,
	pub verbose: bool,
	pub auto_reload: bool,
	pub timing: Timing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
	pub poll_interval: Duration,
	pub settle_delay: Duration,
	pub stop_timeout: Duration,
}

impl Default for Timing {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_millis(500),
			settle_delay: Duration::from_secs(1),
			stop_timeout: Duration::from_secs(3),
		}
	}
}

impl ServerConfig {
	/// The directory holding the `.env` files: the parent of the document root.
	pub fn project_root(&self) -> &Path {
		self.document_root.parent().unwrap_or(&self.document_root)
	}

	pub fn command(&self) -> Vec<String> {
		let mut cmd = vec![
			self.php_binary.to_string_lossy().into_owned(),
			"-S".to_string(),
			format!("{}:{}", self.host, self.port),
			"-t".to_string(),
			self.document_root.to_string_lossy().into_owned(),
		];
		if let Some(router) = &self.router_script {
			cmd.push(router.to_string_lossy().into_owned());
		}
		cmd
	}

	pub fn url(&self) -> String {
		format!("http://{}:{}", self.host, self.port)
	}
}

/// Accepts a decimal token in `1..=65535`.
pub fn validate_port(token: &str) -> Result<u16, String> {
	let message = || ConfigError::InvalidPort(token.to_string()).to_string();
	if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
		return Err(message());
	}
	match token.parse::<u32>() {
		Ok(port @ 1..=65535) => Ok(port as u16),
		_ => Err(message()),
	}
}

pub fn resolve_document_root(root: &Path) -> Result<PathBuf, ConfigError> {
	if !root.is_dir() {
		return Err(ConfigError::MissingDocumentRoot(root.to_path_buf()));
	}
	root.canonicalize()
		.map_err(|source| ConfigError::UnresolvableDocumentRoot { path: root.to_path_buf(), source })
}

/// `None` and the literal `null` both mean "no router script".
pub fn resolve_router(token: Option<&str>) -> Result<Option<PathBuf>, ConfigError> {
	match token {
		None | Some("null") => Ok(None),
		Some(path) => {
			let path = PathBuf::from(path);
			if !path.is_file() {
				return Err(ConfigError::MissingRouter(path));
			}
			path.canonicalize()
				.map(Some)
				.map_err(|_| ConfigError::MissingRouter(path))
		}
	}
}
