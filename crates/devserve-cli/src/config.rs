use std::path::{Path, PathBuf};

use clap::Parser;
use devserve::config::{resolve_document_root, resolve_router, validate_port, DEFAULT_HOST, DEFAULT_PORT};
use devserve::env::{watched_files, APP_ENV};
use devserve::workers::resolve_workers;
use devserve::{ConfigError, EnvironmentSnapshot, ProcessorCount, ServerConfig, Timing};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "devserve.toml";

// --- Command line ---

/// Starts the PHP built-in webserver for your application and restarts it
/// when its .env files change.
#[derive(Debug, Parser)]
#[command(name = "devserve", version)]
pub struct Args {
	/// Host to bind to
	#[arg(env = "SERVER_HOST", default_value = DEFAULT_HOST)]
	pub host: String,

	/// Port to bind to (>=1, <=65535)
	#[arg(env = "SERVER_PORT", default_value = DEFAULT_PORT, value_parser = validate_port)]
	pub port: u16,

	/// Root directory to serve from [default: ./public]
	#[arg(long)]
	pub root: Option<PathBuf>,

	/// The environment to use (e.g. development, staging or production), "null" to skip .env.<name> files
	#[arg(long, env = APP_ENV, default_value = "development")]
	pub env: String,

	/// The router script to use, "null" for none
	#[arg(long)]
	pub router: Option<String>,

	/// How many workers the PHP server may use: a number, "auto" or "null"
	#[arg(long, env = devserve::workers::WORKERS_VAR, default_value = "auto")]
	pub workers: String,

	/// Do not restart the server when .env files change
	#[arg(long)]
	pub no_reload: bool,

	/// Print connection events and debug output
	#[arg(short, long)]
	pub verbose: bool,

	/// PHP executable [default: php on PATH]
	#[arg(long)]
	pub php: Option<PathBuf>,
}

// --- devserve.toml ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
	pub root: Option<PathBuf>,
	pub router: Option<String>,
	pub php: Option<PathBuf>,
	#[serde(default)]
	pub timing: TimingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingConfig {
	#[serde(default = "default_poll_interval")]
	pub poll_interval_ms: u64,
	#[serde(default = "default_settle_delay")]
	pub settle_delay_ms: u64,
	#[serde(default = "default_stop_timeout")]
	pub stop_timeout_ms: u64,
}

impl Default for TimingConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: default_poll_interval(),
			settle_delay_ms: default_settle_delay(),
			stop_timeout_ms: default_stop_timeout(),
		}
	}
}

fn default_poll_interval() -> u64 { 500 }
fn default_settle_delay() -> u64 { 1000 }
fn default_stop_timeout() -> u64 { 3000 }

impl From<&TimingConfig> for Timing {
	fn from(config: &TimingConfig) -> Self {
		use std::time::Duration;
		Self {
			poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
			settle_delay: Duration::from_millis(config.settle_delay_ms),
			stop_timeout: Duration::from_millis(config.stop_timeout_ms),
		}
	}
}

/// Reads `devserve.toml` from `dir`. A missing file means defaults.
pub fn load_project_config(dir: &Path) -> Result<ProjectConfig, ConfigError> {
	let path = dir.join(CONFIG_FILE);
	if !path.exists() {
		return Ok(ProjectConfig::default());
	}
	let content = std::fs::read_to_string(&path)
		.map_err(|source| ConfigError::ConfigFile { path: path.clone(), source })?;
	toml::from_str(&content).map_err(|e| ConfigError::ConfigSyntax { path, message: e.to_string() })
}

// --- Resolution ---

pub struct Resolved {
	pub server: ServerConfig,
	pub env: EnvironmentSnapshot,
	pub watched: Vec<PathBuf>,
}

/// Validates everything and builds the child's environment. Nothing is
/// spawned here apart from the processor count probe.
pub fn resolve(
	args: &Args,
	project: &ProjectConfig,
	probe: &dyn ProcessorCount,
) -> Result<Resolved, ConfigError> {
	let root = args
		.root
		.clone()
		.or_else(|| project.root.clone())
		.unwrap_or_else(|| PathBuf::from("public"));
	let document_root = resolve_document_root(&root)?;
	let router_script = resolve_router(args.router.as_deref().or(project.router.as_deref()))?;
	let php_binary = find_php(args.php.as_deref().or(project.php.as_deref()))?;

	let server = ServerConfig {
		host: args.host.clone(),
		port: args.port,
		document_root,
		router_script,
		php_binary,
		verbose: args.verbose,
		auto_reload: !args.no_reload,
		timing: Timing::from(&project.timing),
	};

	let profile = Some(args.env.as_str()).filter(|name| *name != "null" && !name.is_empty());
	let mut env = EnvironmentSnapshot::load_initial(server.project_root(), profile);
	resolve_workers(Some(&args.workers), probe, &mut env)?;
	let watched = watched_files(server.project_root(), env.get(APP_ENV));

	Ok(Resolved { server, env, watched })
}

fn find_php(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
	let name = explicit.unwrap_or(Path::new("php"));
	which::which(name).map_err(|e| ConfigError::PhpNotFound(format!("{}: {}", name.display(), e)))
}
