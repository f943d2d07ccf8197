use std::process::Command;

use crate::env::EnvironmentSnapshot;
use crate::error::ConfigError;

/// Concurrency hint read by the PHP built-in server.
pub const WORKERS_VAR: &str = "PHP_CLI_SERVER_WORKERS";

/// Capability for asking the host how many processors it has.
pub trait ProcessorCount {
	/// Human readable form of the query, used in error messages.
	fn describe(&self) -> String;

	fn query(&self) -> Result<u32, String>;

	/// Whether the server honors [`WORKERS_VAR`] on this platform.
	fn workers_supported(&self) -> bool {
		true
	}
}

/// Runs the platform's processor count command.
pub struct CommandProbe {
	program: String,
	args: Vec<String>,
}

impl CommandProbe {
	pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
		Self {
			program: program.into(),
			args: args.iter().map(|a| a.to_string()).collect(),
		}
	}

	#[cfg(windows)]
	pub fn platform() -> Self {
		Self::new("cmd", &["/C", "echo %NUMBER_OF_PROCESSORS%"])
	}

	#[cfg(not(windows))]
	pub fn platform() -> Self {
		Self::new("nproc", &[])
	}
}

impl ProcessorCount for CommandProbe {
	fn describe(&self) -> String {
		std::iter::once(self.program.as_str())
			.chain(self.args.iter().map(String::as_str))
			.collect::<Vec<_>>()
			.join(" ")
	}

	fn query(&self) -> Result<u32, String> {
		let output = Command::new(&self.program)
			.args(&self.args)
			.output()
			.map_err(|e| e.to_string())?;
		if !output.status.success() {
			return Err(format!("exited with {}", output.status));
		}
		let stdout = String::from_utf8_lossy(&output.stdout);
		let first = stdout.lines().next().unwrap_or("").trim();
		parse_count(first).ok_or_else(|| format!("unexpected output {:?}", first))
	}

	fn workers_supported(&self) -> bool {
		!cfg!(windows)
	}
}

fn parse_count(text: &str) -> Option<u32> {
	if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	text.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCount {
	Fixed(String),
	Auto,
	Unset,
}

impl WorkerCount {
	pub fn parse(token: Option<&str>) -> Result<Self, ConfigError> {
		match token {
			None | Some("null") => Ok(WorkerCount::Unset),
			Some("auto") => Ok(WorkerCount::Auto),
			Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
				Ok(WorkerCount::Fixed(n.to_string()))
			}
			Some(other) => Err(ConfigError::InvalidWorkers(other.to_string())),
		}
	}
}

/// Applies the worker count to `env`. `auto` consults the probe and any
/// probe failure is fatal.
pub fn resolve_workers(
	token: Option<&str>,
	probe: &dyn ProcessorCount,
	env: &mut EnvironmentSnapshot,
) -> Result<WorkerCount, ConfigError> {
	let count = WorkerCount::parse(token)?;
	match &count {
		WorkerCount::Fixed(n) => env.set(WORKERS_VAR, n.as_str()),
		WorkerCount::Auto => {
			if !probe.workers_supported() {
				tracing::warn!("{} is not supported by PHP on this platform but will be set anyway", WORKERS_VAR);
			}
			let cores = probe.query().map_err(|reason| ConfigError::ProcessorCount {
				command: probe.describe(),
				reason,
			})?;
			tracing::debug!(cores, "detected processor count");
			env.set(WORKERS_VAR, cores.to_string());
		}
		WorkerCount::Unset => {}
	}
	Ok(count)
}
