//! # devserve
//!
//! Development server supervisor.
//!
//! Runs the PHP built-in web server as a child process, turns its output into
//! structured log events, and restarts it when one of the project's `.env`
//! files changes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use devserve::{EnvironmentSnapshot, OutputCapture, ReloadOrchestrator, ServerLauncher, Supervisor, Timing};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let timing = Timing::default();
//! let launcher = ServerLauncher {
//!     supervisor: Supervisor::new(OutputCapture::tracing(false), timing.stop_timeout, false),
//!     command: vec!["php".into(), "-S".into(), "localhost:8000".into()],
//!     cwd: "/srv/app/public".into(),
//! };
//! let env = EnvironmentSnapshot::load_initial("/srv/app".as_ref(), Some("development"));
//! let watched = devserve::env::watched_files("/srv/app".as_ref(), Some("development"));
//!
//! let code = ReloadOrchestrator::new(launcher, env, watched, true, timing)
//!     .run()
//!     .await
//!     .unwrap();
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod env;
pub mod error;
pub mod output;
pub mod reload;
pub mod supervisor;
pub mod watcher;
pub mod workers;

pub use classify::{Classifier, ConnectionAction, LogEvent};
pub use config::{ServerConfig, Timing};
pub use env::EnvironmentSnapshot;
pub use error::{ConfigError, SupervisorError};
pub use output::{EventSink, LineSplitter, OutputCapture, TracingSink};
pub use reload::{ReloadOrchestrator, ReloadState};
pub use supervisor::{ChildHandle, Launcher, ProcessHandle, ServerLauncher, Supervisor};
pub use watcher::FileWatcher;
pub use workers::{CommandProbe, ProcessorCount, WorkerCount};
