use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::classify::{Classifier, LogEvent};

const READ_BUFFER_SIZE: usize = 4096;

/// Receives every classified line of child output.
pub trait EventSink: Send + Sync + 'static {
	fn event(&self, event: LogEvent);
}

/// Default sink: hands events to `tracing`.
pub struct TracingSink;

impl EventSink for TracingSink {
	fn event(&self, event: LogEvent) {
		event.emit();
	}
}

#[derive(Clone)]
pub struct OutputCapture {
	classifier: Classifier,
	sink: Arc<dyn EventSink>,
}

impl OutputCapture {
	pub fn new(classifier: Classifier, sink: Arc<dyn EventSink>) -> Self {
		Self { classifier, sink }
	}

	pub fn tracing(verbose: bool) -> Self {
		Self::new(Classifier::new(verbose), Arc::new(TracingSink))
	}

	pub fn line(&self, line: &str) {
		if let Some(event) = self.classifier.classify(line) {
			self.sink.event(event);
		}
	}
}

/// Reassembles arbitrary chunks into complete lines. A chunk may hold several
/// lines or end mid-line; the unfinished tail is kept for the next chunk.
#[derive(Debug, Default)]
pub struct LineSplitter {
	pending: Vec<u8>,
}

impl LineSplitter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
		self.pending.extend_from_slice(chunk);
		let mut lines = Vec::new();
		let mut start = 0;
		while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
			let end = start + offset;
			lines.push(decode(&self.pending[start..end]));
			start = end + 1;
		}
		self.pending.drain(..start);
		lines
	}

	/// Returns whatever is left once the stream has ended.
	pub fn finish(&mut self) -> Option<String> {
		if self.pending.is_empty() {
			return None;
		}
		let line = decode(&self.pending);
		self.pending.clear();
		Some(line)
	}
}

fn decode(bytes: &[u8]) -> String {
	let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
	String::from_utf8_lossy(bytes).into_owned()
}

pub(crate) async fn pipe_output<R: AsyncRead + Unpin>(mut reader: R, output: OutputCapture) {
	let mut buf = [0u8; READ_BUFFER_SIZE];
	let mut splitter = LineSplitter::new();
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => {
				for line in splitter.push(&buf[..n]) {
					output.line(&line);
				}
			}
			Err(e) => {
				tracing::debug!("output stream closed: {}", e);
				break;
			}
		}
	}
	if let Some(line) = splitter.finish() {
		output.line(&line);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	#[derive(Default)]
	struct Collect(Mutex<Vec<LogEvent>>);

	impl EventSink for Collect {
		fn event(&self, event: LogEvent) {
			self.0.lock().unwrap().push(event);
		}
	}

	#[test]
	fn splits_multiple_lines_in_one_chunk() {
		let mut splitter = LineSplitter::new();
		assert_eq!(splitter.push(b"one\ntwo\r\nthree"), vec!["one", "two"]);
		assert_eq!(splitter.push(b" more\n"), vec!["three more"]);
		assert_eq!(splitter.finish(), None);
	}

	#[test]
	fn finish_flushes_partial_line() {
		let mut splitter = LineSplitter::new();
		assert!(splitter.push(b"no newline").is_empty());
		assert_eq!(splitter.finish().as_deref(), Some("no newline"));
		assert_eq!(splitter.finish(), None);
	}

	#[test]
	fn multibyte_split_across_chunks() {
		let mut splitter = LineSplitter::new();
		let text = "héllo\n".as_bytes();
		assert!(splitter.push(&text[..2]).is_empty());
		assert_eq!(splitter.push(&text[2..]), vec!["héllo"]);
	}

	#[tokio::test]
	async fn pipe_classifies_lines_in_order() {
		let sink = Arc::new(Collect::default());
		let capture = OutputCapture::new(Classifier::new(false), sink.clone());
		let input: &[u8] = b"127.0.0.1:1 Accepted\n127.0.0.1:1 [200]: GET /a\nPHP Notice: x\n127.0.0.1:1 [404]: GET /b";

		pipe_output(input, capture).await;

		let events = sink.0.lock().unwrap().clone();
		assert_eq!(events.len(), 3);
		assert!(matches!(&events[0], LogEvent::Request { path, .. } if path == "/a"));
		assert!(matches!(&events[1], LogEvent::Raw { text } if text == "PHP Notice: x"));
		assert!(matches!(&events[2], LogEvent::Request { status: 404, .. }));
	}
}
