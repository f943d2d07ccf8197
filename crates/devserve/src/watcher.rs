use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
	Absent,
	Present { modified: Option<SystemTime>, len: u64 },
}

impl FileState {
	fn read(path: &Path) -> io::Result<Self> {
		match std::fs::metadata(path) {
			Ok(meta) => Ok(FileState::Present {
				modified: meta.modified().ok(),
				len: meta.len(),
			}),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileState::Absent),
			Err(e) => Err(e),
		}
	}
}

#[derive(Debug, Clone)]
pub struct WatchedFile {
	pub path: PathBuf,
	/// `None` until the first snapshot is taken.
	pub last_known: Option<FileState>,
	owner: usize,
}

type Callback = Box<dyn FnMut(&Path) + Send>;

/// Polls a fixed set of files for modification or (dis)appearance.
#[derive(Default)]
pub struct FileWatcher {
	files: Vec<WatchedFile>,
	callbacks: Vec<Callback>,
}

impl FileWatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds `paths` with a callback. A path already watched by an earlier
	/// registration stays with that registration.
	pub fn register<I, P, F>(&mut self, paths: I, on_change: F)
	where
		I: IntoIterator<Item = P>,
		P: AsRef<Path>,
		F: FnMut(&Path) + Send + 'static,
	{
		let owner = self.callbacks.len();
		self.callbacks.push(Box::new(on_change));
		for path in paths {
			let path = resolve(path.as_ref());
			if self.files.iter().any(|f| f.path == path) {
				continue;
			}
			self.files.push(WatchedFile { path, last_known: None, owner });
		}
	}

	pub fn files(&self) -> &[WatchedFile] {
		&self.files
	}

	/// Records the current state of every file without firing callbacks.
	pub fn initialize(&mut self) {
		for file in &mut self.files {
			match FileState::read(&file.path) {
				Ok(state) => file.last_known = Some(state),
				Err(e) => tracing::warn!("cannot stat {}: {}", file.path.display(), e),
			}
		}
	}

	/// Fires the owning callback for every file whose state changed since the
	/// last snapshot, in registration order, and returns the changed paths.
	/// The snapshot is updated before the callback runs.
	pub fn poll(&mut self) -> Vec<PathBuf> {
		let mut changed = Vec::new();
		for file in &mut self.files {
			let state = match FileState::read(&file.path) {
				Ok(state) => state,
				Err(e) => {
					tracing::warn!("cannot stat {}: {}", file.path.display(), e);
					continue;
				}
			};
			let previous = file.last_known.replace(state);
			match previous {
				Some(previous) if previous != state => {
					let on_change = &mut self.callbacks[file.owner];
					on_change(&file.path);
					changed.push(file.path.clone());
				}
				_ => {}
			}
		}
		changed
	}
}

/// Absolute path with the parent directory resolved through the filesystem,
/// so `dir/./.env`, `dir/sub/../.env` and a symlinked `dir` all compare equal.
/// The file itself may not exist yet.
fn resolve(path: &Path) -> PathBuf {
	let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
	match (path.parent(), path.file_name()) {
		(Some(dir), Some(name)) => match dir.canonicalize() {
			Ok(dir) => dir.join(name),
			Err(_) => path,
		},
		_ => path,
	}
}
