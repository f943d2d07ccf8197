use std::path::{Path, PathBuf};

pub const APP_ENV: &str = "APP_ENV";

/// Insertion-ordered environment handed to the child. Setting an existing key
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
	entries: Vec<(String, String)>,
}

impl EnvironmentSnapshot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seeds the snapshot from this process's environment, skipping entries
	/// that are not valid unicode.
	pub fn from_process() -> Self {
		let mut snapshot = Self::new();
		for (key, value) in std::env::vars_os() {
			if let (Some(key), Some(value)) = (key.to_str(), value.to_str()) {
				snapshot.set(key, value);
			}
		}
		snapshot
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.entries
			.iter()
			.find(|(k, _)| k == key)
			.map(|(_, v)| v.as_str())
	}

	pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
		let key = key.into();
		let value = value.into();
		match self.entries.iter_mut().find(|(k, _)| *k == key) {
			Some(entry) => entry.1 = value,
			None => self.entries.push((key, value)),
		}
	}

	pub fn merge<I, K, V>(&mut self, pairs: I)
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		for (key, value) in pairs {
			self.set(key, value);
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	/// Parses a dotenv file and merges it. The file is parsed completely before
	/// anything is merged, so a syntax error leaves the snapshot untouched.
	pub fn load_file(&mut self, path: &Path) -> Result<usize, dotenvy::Error> {
		let pairs = dotenvy::from_path_iter(path)?.collect::<Result<Vec<_>, _>>()?;
		let count = pairs.len();
		self.merge(pairs);
		Ok(count)
	}

	/// Like [`load_file`](Self::load_file) but a missing file is not worth
	/// mentioning and any other failure is only logged.
	pub fn load_optional_file(&mut self, path: &Path) {
		if !path.exists() {
			return;
		}
		match self.load_file(path) {
			Ok(count) => tracing::debug!(path = %path.display(), count, "loaded env file"),
			Err(e) => tracing::warn!("failed to load {}: {}", path.display(), e),
		}
	}

	/// Builds the startup environment: process env, then `.env` and
	/// `.env.local`, then (unless the profile is disabled) `APP_ENV` and the
	/// profile's `.env.<name>` pair.
	pub fn load_initial(project_root: &Path, profile: Option<&str>) -> Self {
		let mut snapshot = Self::from_process();
		snapshot.load_optional_file(&project_root.join(dotenv_file_name(false, None)));
		snapshot.load_optional_file(&project_root.join(dotenv_file_name(true, None)));

		if let Some(name) = profile {
			snapshot.set(APP_ENV, name);
			snapshot.load_optional_file(&project_root.join(dotenv_file_name(false, Some(name))));
			snapshot.load_optional_file(&project_root.join(dotenv_file_name(true, Some(name))));
		}
		snapshot
	}
}

pub fn dotenv_file_name(local: bool, env_name: Option<&str>) -> String {
	let mut name = String::from(".env");
	if let Some(env_name) = env_name.filter(|n| !n.is_empty()) {
		name.push('.');
		name.push_str(env_name);
	}
	if local {
		name.push_str(".local");
	}
	name
}

/// The four files whose modification triggers a restart. The named pair is
/// only included when an environment name is known.
pub fn watched_files(project_root: &Path, env_name: Option<&str>) -> Vec<PathBuf> {
	let mut files = vec![
		project_root.join(dotenv_file_name(false, None)),
		project_root.join(dotenv_file_name(true, None)),
	];
	if let Some(name) = env_name.filter(|n| !n.is_empty()) {
		files.push(project_root.join(dotenv_file_name(false, Some(name))));
		files.push(project_root.join(dotenv_file_name(true, Some(name))));
	}
	files
}
