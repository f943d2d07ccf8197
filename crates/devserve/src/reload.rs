use std::future::Future;
use std::path::{Path, PathBuf};

use crate::config::Timing;
use crate::env::EnvironmentSnapshot;
use crate::error::SupervisorError;
use crate::supervisor::{ChildHandle, Launcher};
use crate::watcher::FileWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
	Starting,
	Running,
	Restarting,
	/// The child exited on its own; `None` when no exit code was available.
	Stopped(Option<i32>),
}

/// Owns the single live child and the environment it was started with, and
/// restarts it when a watched file changes.
pub struct ReloadOrchestrator<L: Launcher> {
	launcher: L,
	watcher: FileWatcher,
	env: EnvironmentSnapshot,
	current: Option<L::Handle>,
	state: ReloadState,
	auto_reload: bool,
	timing: Timing,
}

impl<L: Launcher> ReloadOrchestrator<L> {
	pub fn new(
		launcher: L,
		env: EnvironmentSnapshot,
		watched: Vec<PathBuf>,
		auto_reload: bool,
		timing: Timing,
	) -> Self {
		let mut watcher = FileWatcher::new();
		watcher.register(watched, |path: &Path| {
			let name = path.file_name().unwrap_or(path.as_os_str()).to_string_lossy();
			tracing::warn!("{} file changed. Restarting server...", name);
		});
		Self {
			launcher,
			watcher,
			env,
			current: None,
			state: ReloadState::Starting,
			auto_reload,
			timing,
		}
	}

	pub fn state(&self) -> ReloadState {
		self.state
	}

	pub fn env(&self) -> &EnvironmentSnapshot {
		&self.env
	}

	pub fn launcher(&self) -> &L {
		&self.launcher
	}

	pub fn current(&self) -> Option<&L::Handle> {
		self.current.as_ref()
	}

	/// `Starting -> Running`. Also takes the initial snapshot of the watched
	/// files so that only later changes trigger a restart.
	pub fn start(&mut self) -> Result<(), SupervisorError> {
		self.watcher.initialize();
		let handle = self.launcher.start(&self.env)?;
		self.current = Some(handle);
		self.state = ReloadState::Running;
		Ok(())
	}

	/// One iteration of the loop: liveness first, then (with auto-reload) the
	/// watcher. Returns the state after the iteration. A child found dead is
	/// still stopped through the launcher so that its process group and
	/// pending output are dealt with.
	pub async fn tick(&mut self) -> Result<ReloadState, SupervisorError> {
		if let ReloadState::Stopped(_) = self.state {
			return Ok(self.state);
		}
		let running = match self.current.as_mut() {
			Some(handle) => handle.is_running(),
			None => false,
		};
		if !running {
			let code = self.current.as_ref().and_then(|h| h.exit_code());
			if let Some(handle) = self.current.as_mut() {
				self.launcher.stop(handle).await;
			}
			self.state = ReloadState::Stopped(code);
			return Ok(self.state);
		}

		if self.auto_reload {
			let changed = self.watcher.poll();
			if !changed.is_empty() {
				self.restart(&changed).await?;
			}
		}
		Ok(self.state)
	}

	/// `Running -> Restarting -> Running`: merge the changed files, stop the
	/// old child, wait for the settle delay, start a new child.
	pub async fn restart(&mut self, changed: &[PathBuf]) -> Result<(), SupervisorError> {
		self.state = ReloadState::Restarting;

		for path in changed {
			match self.env.load_file(path) {
				Ok(count) => tracing::debug!(path = %path.display(), count, "reloaded env file"),
				Err(e) => tracing::warn!(
					"failed to read {}: {}; keeping previous environment",
					path.display(),
					e
				),
			}
		}

		if let Some(mut handle) = self.current.take() {
			self.launcher.stop(&mut handle).await;
		}

		tokio::time::sleep(self.timing.settle_delay).await;

		let handle = self.launcher.start(&self.env)?;
		self.current = Some(handle);
		self.state = ReloadState::Running;
		Ok(())
	}

	/// Stops the live child, if any.
	pub async fn shutdown(&mut self) {
		if let Some(mut handle) = self.current.take() {
			self.launcher.stop(&mut handle).await;
		}
	}

	/// Runs until the child exits or the process receives SIGINT/SIGTERM.
	/// The signal listeners are installed before the first child is spawned.
	pub async fn run(mut self) -> Result<Option<i32>, SupervisorError> {
		let shutdown = shutdown_signal();
		self.run_until(shutdown).await
	}

	/// Runs until the child exits or `shutdown` completes. Returns the child's
	/// exit code when it exited on its own.
	pub async fn run_until<F>(&mut self, shutdown: F) -> Result<Option<i32>, SupervisorError>
	where
		F: Future<Output = ()>,
	{
		if self.current.is_none() {
			self.start()?;
		}
		tokio::pin!(shutdown);

		loop {
			if let ReloadState::Stopped(code) = self.tick().await? {
				let code_text = code.map(|c| c.to_string()).unwrap_or_else(|| "<unknown>".to_string());
				tracing::warn!("server process exited with code {}", code_text);
				return Ok(code);
			}

			tokio::select! {
				_ = tokio::time::sleep(self.timing.poll_interval) => {}
				_ = &mut shutdown => {
					tracing::info!("shutting down");
					self.shutdown().await;
					return Ok(None);
				}
			}
		}
	}
}

/// Registers the SIGINT and SIGTERM handlers immediately; the returned
/// future completes on the first of either.
#[cfg(unix)]
fn shutdown_signal() -> impl Future<Output = ()> {
	use tokio::signal::unix::{signal, Signal, SignalKind};

	fn listen(kind: SignalKind, name: &str) -> Option<Signal> {
		match signal(kind) {
			Ok(listener) => Some(listener),
			Err(e) => {
				tracing::warn!("cannot listen for {}: {}", name, e);
				None
			}
		}
	}

	async fn recv(listener: &mut Option<Signal>) {
		match listener {
			Some(listener) => {
				listener.recv().await;
			}
			None => std::future::pending::<()>().await,
		}
	}

	let mut interrupt = listen(SignalKind::interrupt(), "SIGINT");
	let mut terminate = listen(SignalKind::terminate(), "SIGTERM");
	async move {
		tokio::select! {
			_ = recv(&mut interrupt) => {}
			_ = recv(&mut terminate) => {}
		}
	}
}

#[cfg(not(unix))]
fn shutdown_signal() -> impl Future<Output = ()> {
	async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::warn!("cannot listen for ctrl-c: {}", e);
			std::future::pending::<()>().await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
	use std::sync::{Arc, Mutex};
	use std::time::Duration;

	static COUNTER: AtomicU32 = AtomicU32::new(0);

	fn temp_dir(name: &str) -> PathBuf {
		let n = COUNTER.fetch_add(1, Ordering::SeqCst);
		let dir = std::env::temp_dir().join(format!("devserve-reload-{}-{}-{}", std::process::id(), n, name));
		let _ = std::fs::create_dir_all(&dir);
		dir
	}

	#[derive(Debug, Clone, PartialEq, Eq)]
	enum Call {
		Start(u32),
		Stop(u32),
	}

	struct FakeHandle {
		id: u32,
		alive: Arc<AtomicBool>,
		exit_code: Arc<Mutex<Option<i32>>>,
	}

	impl ChildHandle for FakeHandle {
		fn pid(&self) -> Option<u32> {
			Some(self.id)
		}

		fn is_running(&mut self) -> bool {
			self.alive.load(Ordering::SeqCst)
		}

		fn exit_code(&self) -> Option<i32> {
			*self.exit_code.lock().unwrap()
		}
	}

	#[derive(Default)]
	struct FakeLauncher {
		calls: Vec<Call>,
		envs: Vec<EnvironmentSnapshot>,
		handles: Vec<(Arc<AtomicBool>, Arc<Mutex<Option<i32>>>)>,
		max_alive: usize,
	}

	impl FakeLauncher {
		fn alive(&self) -> usize {
			self.handles.iter().filter(|(a, _)| a.load(Ordering::SeqCst)).count()
		}

		fn exit(&self, id: u32, code: Option<i32>) {
			let (alive, exit_code) = &self.handles[id as usize];
			*exit_code.lock().unwrap() = code;
			alive.store(false, Ordering::SeqCst);
		}
	}

	impl Launcher for FakeLauncher {
		type Handle = FakeHandle;

		fn start(&mut self, env: &EnvironmentSnapshot) -> Result<FakeHandle, SupervisorError> {
			let id = self.handles.len() as u32;
			let alive = Arc::new(AtomicBool::new(true));
			let exit_code = Arc::new(Mutex::new(None));
			self.handles.push((alive.clone(), exit_code.clone()));
			self.calls.push(Call::Start(id));
			self.envs.push(env.clone());
			self.max_alive = self.max_alive.max(self.alive());
			Ok(FakeHandle { id, alive, exit_code })
		}

		async fn stop(&mut self, handle: &mut FakeHandle) {
			handle.alive.store(false, Ordering::SeqCst);
			self.calls.push(Call::Stop(handle.id));
		}
	}

	fn fast() -> Timing {
		Timing {
			poll_interval: Duration::from_millis(10),
			settle_delay: Duration::from_millis(5),
			stop_timeout: Duration::from_millis(100),
		}
	}

	fn orchestrator(dir: &Path, auto_reload: bool) -> ReloadOrchestrator<FakeLauncher> {
		let mut env = EnvironmentSnapshot::new();
		env.set("APP_ENV", "dev");
		env.set("GREETING", "hello");
		ReloadOrchestrator::new(
			FakeLauncher::default(),
			env,
			crate::env::watched_files(dir, Some("dev")),
			auto_reload,
			fast(),
		)
	}

	#[tokio::test]
	async fn start_enters_running() {
		let dir = temp_dir("start");
		let mut orch = orchestrator(&dir, true);
		assert_eq!(orch.state(), ReloadState::Starting);
		orch.start().unwrap();
		assert_eq!(orch.state(), ReloadState::Running);
		assert_eq!(orch.tick().await.unwrap(), ReloadState::Running);
		assert_eq!(orch.launcher().calls, vec![Call::Start(0)]);
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn file_change_restarts_once_with_merged_env() {
		let dir = temp_dir("restart");
		let mut orch = orchestrator(&dir, true);
		orch.start().unwrap();

		std::fs::write(dir.join(".env.local"), "GREETING=bonjour\nEXTRA=1\n").unwrap();
		assert_eq!(orch.tick().await.unwrap(), ReloadState::Running);

		let launcher = orch.launcher();
		assert_eq!(launcher.calls, vec![Call::Start(0), Call::Stop(0), Call::Start(1)]);
		assert_eq!(launcher.max_alive, 1);
		assert_eq!(launcher.envs[1].get("GREETING"), Some("bonjour"));
		assert_eq!(launcher.envs[1].get("EXTRA"), Some("1"));
		assert_eq!(launcher.envs[1].get("APP_ENV"), Some("dev"));
		assert_eq!(orch.current().and_then(|h| h.pid()), Some(1));

		assert_eq!(orch.tick().await.unwrap(), ReloadState::Running);
		assert_eq!(orch.launcher().calls.len(), 3);
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn several_changes_in_one_tick_coalesce() {
		let dir = temp_dir("coalesce");
		let mut orch = orchestrator(&dir, true);
		orch.start().unwrap();

		std::fs::write(dir.join(".env"), "LAYER=base\n").unwrap();
		std::fs::write(dir.join(".env.dev.local"), "LAYER=dev-local\n").unwrap();
		orch.tick().await.unwrap();

		let launcher = orch.launcher();
		assert_eq!(launcher.calls, vec![Call::Start(0), Call::Stop(0), Call::Start(1)]);
		assert_eq!(launcher.envs[1].get("LAYER"), Some("dev-local"));
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn unreadable_file_keeps_previous_env() {
		let dir = temp_dir("unreadable");
		let mut orch = orchestrator(&dir, true);
		orch.start().unwrap();

		// a directory where a file is expected: stat works, reading fails
		std::fs::create_dir_all(dir.join(".env")).unwrap();
		orch.tick().await.unwrap();

		let launcher = orch.launcher();
		assert_eq!(launcher.calls.len(), 3);
		assert_eq!(launcher.envs[1], launcher.envs[0]);
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn no_reload_ignores_changes() {
		let dir = temp_dir("noreload");
		let mut orch = orchestrator(&dir, false);
		orch.start().unwrap();

		std::fs::write(dir.join(".env"), "A=1\n").unwrap();
		assert_eq!(orch.tick().await.unwrap(), ReloadState::Running);
		assert_eq!(orch.launcher().calls, vec![Call::Start(0)]);
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn child_exit_stops_with_code() {
		let dir = temp_dir("exit");
		let mut orch = orchestrator(&dir, true);
		orch.start().unwrap();
		orch.launcher().exit(0, Some(255));
		assert_eq!(orch.tick().await.unwrap(), ReloadState::Stopped(Some(255)));

		let mut orch = orchestrator(&dir, true);
		orch.start().unwrap();
		orch.launcher().exit(0, None);
		assert_eq!(orch.tick().await.unwrap(), ReloadState::Stopped(None));
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn run_returns_exit_code() {
		let dir = temp_dir("run");
		let mut orch = orchestrator(&dir, true);
		orch.start().unwrap();
		orch.launcher().exit(0, Some(0));
		let code = orch.run_until(std::future::pending()).await.unwrap();
		assert_eq!(code, Some(0));
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn exited_child_is_still_released_once() {
		let dir = temp_dir("release");
		let mut orch = orchestrator(&dir, true);
		orch.start().unwrap();
		orch.launcher().exit(0, Some(1));
		assert_eq!(orch.tick().await.unwrap(), ReloadState::Stopped(Some(1)));
		assert_eq!(orch.tick().await.unwrap(), ReloadState::Stopped(Some(1)));
		assert_eq!(orch.launcher().calls, vec![Call::Start(0), Call::Stop(0)]);
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn signal_listener_is_ready_before_first_poll() {
		use nix::sys::signal::{kill, Signal};
		use nix::unistd::Pid;

		let dir = temp_dir("sigterm");
		let mut orch = orchestrator(&dir, true);
		let shutdown = shutdown_signal();
		kill(Pid::this(), Signal::SIGTERM).unwrap();

		let code = tokio::time::timeout(Duration::from_secs(5), orch.run_until(shutdown))
			.await
			.expect("SIGTERM was not observed")
			.unwrap();
		assert_eq!(code, None);
		assert_eq!(orch.launcher().calls, vec![Call::Start(0), Call::Stop(0)]);
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn run_stops_child_on_shutdown() {
		let dir = temp_dir("shutdown");
		let mut orch = orchestrator(&dir, true);
		let code = orch
			.run_until(tokio::time::sleep(Duration::from_millis(30)))
			.await
			.unwrap();
		assert_eq!(code, None);
		assert_eq!(orch.launcher().calls, vec![Call::Start(0), Call::Stop(0)]);
		assert!(orch.current().is_none());
		let _ = std::fs::remove_dir_all(&dir);
	}
}
