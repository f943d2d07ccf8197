use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::env::EnvironmentSnapshot;
use crate::error::SupervisorError;
use crate::output::{pipe_output, OutputCapture};

const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What the reload loop needs from a running child.
pub trait ChildHandle {
	fn pid(&self) -> Option<u32>;
	/// Non-blocking liveness check.
	fn is_running(&mut self) -> bool;
	/// `None` while running or when the child died without an exit code.
	fn exit_code(&self) -> Option<i32>;
}

/// Starts and stops children with a fixed command and working directory.
#[allow(async_fn_in_trait)]
pub trait Launcher {
	type Handle: ChildHandle;

	fn start(&mut self, env: &EnvironmentSnapshot) -> Result<Self::Handle, SupervisorError>;

	/// Returns once the child is confirmed down (or the bounded wait elapsed
	/// and it was killed) and its output has been fully delivered. Also used
	/// to release a child that already exited on its own.
	async fn stop(&mut self, handle: &mut Self::Handle);
}

/// One spawned server process. Dropping a handle that was never stopped
/// kills the whole process group.
pub struct ProcessHandle {
	child: Child,
	pid: Option<u32>,
	exited: bool,
	exit_code: Option<i32>,
	/// Set once `Supervisor::stop` has taken the process group down.
	released: bool,
	pumps: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
	fn record(&mut self, status: ExitStatus) {
		self.exited = true;
		self.exit_code = status.code();
	}

	async fn drain_output(&mut self) {
		for mut pump in self.pumps.drain(..) {
			if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut pump).await.is_err() {
				pump.abort();
			}
		}
	}
}

impl ChildHandle for ProcessHandle {
	fn pid(&self) -> Option<u32> {
		self.pid
	}

	fn is_running(&mut self) -> bool {
		if self.exited {
			return false;
		}
		match self.child.try_wait() {
			Ok(None) => true,
			Ok(Some(status)) => {
				self.record(status);
				false
			}
			Err(e) => {
				tracing::warn!(pid = ?self.pid, "failed to query server process: {}", e);
				self.exited = true;
				false
			}
		}
	}

	fn exit_code(&self) -> Option<i32> {
		self.exit_code
	}
}

impl Drop for ProcessHandle {
	fn drop(&mut self) {
		if self.released {
			return;
		}
		if let Some(pid) = self.pid {
			signal_group(pid, GroupSignal::Kill);
		}
		if !self.exited {
			let _ = self.child.start_kill();
		}
	}
}

pub struct Supervisor {
	output: OutputCapture,
	stop_timeout: Duration,
	verbose: bool,
}

impl Supervisor {
	pub fn new(output: OutputCapture, stop_timeout: Duration, verbose: bool) -> Self {
		Self { output, stop_timeout, verbose }
	}

	/// Spawns `command` in `cwd` with exactly `env` as its environment and
	/// starts forwarding its output. Does not wait for the server to listen.
	pub fn start(
		&self,
		command: &[String],
		cwd: &Path,
		env: &EnvironmentSnapshot,
	) -> Result<ProcessHandle, SupervisorError> {
		let (program, args) = command.split_first().ok_or(SupervisorError::EmptyCommand)?;

		let mut cmd = Command::new(program);
		cmd.args(args)
			.current_dir(cwd)
			.env_clear()
			.envs(env.iter())
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		#[cfg(unix)]
		cmd.process_group(0);

		let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
			program: program.clone(),
			source,
		})?;

		let mut pumps = Vec::with_capacity(2);
		if let Some(stdout) = child.stdout.take() {
			pumps.push(tokio::spawn(pipe_output(stdout, self.output.clone())));
		}
		if let Some(stderr) = child.stderr.take() {
			pumps.push(tokio::spawn(pipe_output(stderr, self.output.clone())));
		}

		let pid = child.id();
		if self.verbose {
			tracing::info!(pid = ?pid, command = %command.join(" "), "server process started");
		} else {
			tracing::info!(pid = ?pid, "server process started");
		}

		Ok(ProcessHandle {
			child,
			pid,
			exited: false,
			exit_code: None,
			released: false,
			pumps,
		})
	}

	/// Sends SIGTERM to the child's process group and waits up to the stop
	/// timeout before escalating to SIGKILL. Whatever is left of the group once
	/// the leader is gone gets the same treatment, including when the leader
	/// had already exited on its own. Output is drained last.
	pub async fn stop(&self, handle: &mut ProcessHandle) {
		if handle.is_running() {
			if let Some(pid) = handle.pid {
				signal_group(pid, GroupSignal::Terminate);
			} else {
				let _ = handle.child.start_kill();
			}

			match tokio::time::timeout(self.stop_timeout, handle.child.wait()).await {
				Ok(Ok(status)) => handle.record(status),
				Ok(Err(e)) => {
					tracing::warn!(pid = ?handle.pid, "failed to wait for server process: {}", e);
					handle.exited = true;
				}
				Err(_) => {
					tracing::warn!(
						pid = ?handle.pid,
						"server process did not exit within {:?}, killing",
						self.stop_timeout
					);
					if let Some(pid) = handle.pid {
						signal_group(pid, GroupSignal::Kill);
					}
					let _ = handle.child.kill().await;
					handle.exited = true;
				}
			}
		}

		if let Some(pid) = handle.pid {
			self.release_group(pid).await;
		}
		handle.released = true;
		handle.drain_output().await;

		if self.verbose {
			tracing::info!(pid = ?handle.pid, exit_code = ?handle.exit_code, "server process stopped");
		} else {
			tracing::info!(pid = ?handle.pid, "server process stopped");
		}
	}

	/// Terminates the remaining members of the process group led by `pid`.
	async fn release_group(&self, pid: u32) {
		if !group_alive(pid) {
			return;
		}
		tracing::debug!(pid, "terminating remaining process group members");
		signal_group(pid, GroupSignal::Terminate);

		let deadline = tokio::time::Instant::now() + self.stop_timeout;
		while tokio::time::Instant::now() < deadline {
			tokio::time::sleep(GROUP_POLL_INTERVAL).await;
			if !group_alive(pid) {
				return;
			}
		}
		tracing::warn!(pid, "process group did not exit within {:?}, killing", self.stop_timeout);
		signal_group(pid, GroupSignal::Kill);
	}
}

/// A [`Supervisor`] bound to one command line and working directory.
pub struct ServerLauncher {
	pub supervisor: Supervisor,
	pub command: Vec<String>,
	pub cwd: PathBuf,
}

impl Launcher for ServerLauncher {
	type Handle = ProcessHandle;

	fn start(&mut self, env: &EnvironmentSnapshot) -> Result<ProcessHandle, SupervisorError> {
		self.supervisor.start(&self.command, &self.cwd, env)
	}

	async fn stop(&mut self, handle: &mut ProcessHandle) {
		self.supervisor.stop(handle).await;
	}
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
	Terminate,
	Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: GroupSignal) {
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;

	let signal = match signal {
		GroupSignal::Terminate => Signal::SIGTERM,
		GroupSignal::Kill => Signal::SIGKILL,
	};
	let _ = killpg(Pid::from_raw(pid as i32), signal);
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: GroupSignal) {}

#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;

	killpg(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn group_alive(_pid: u32) -> bool {
	false
}
