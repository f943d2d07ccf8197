use std::path::PathBuf;

use thiserror::Error;

/// Fatal problems found before any child process is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("port must be a number between 1 and 65535 (got {0:?})")]
	InvalidPort(String),

	#[error("root directory ({}) does not exist", .0.display())]
	MissingDocumentRoot(PathBuf),

	#[error("unable to resolve document root {}: {source}", .path.display())]
	UnresolvableDocumentRoot {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("router file ({}) does not exist", .0.display())]
	MissingRouter(PathBuf),

	#[error("workers must be a number, \"auto\" or \"null\" (got {0:?})")]
	InvalidWorkers(String),

	#[error("unable to determine number of cores available (used: {command}): {reason}")]
	ProcessorCount { command: String, reason: String },

	#[error("php executable not found: {0}")]
	PhpNotFound(String),

	#[error("failed to read {}: {source}", .path.display())]
	ConfigFile {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse {}: {message}", .path.display())]
	ConfigSyntax { path: PathBuf, message: String },
}

/// Failures while driving the child process.
#[derive(Debug, Error)]
pub enum SupervisorError {
	#[error("failed to spawn {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("empty server command")]
	EmptyCommand,
}
