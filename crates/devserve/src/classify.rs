//! Turns lines printed by the PHP built-in server into structured events.
//!
//! The server prints one of three shapes, optionally after a `[timestamp] `
//! prefix:
//!
//! ```text
//! 127.0.0.1:54321 Accepted
//! 127.0.0.1:54321 Closing
//! 127.0.0.1:54321 [200]: GET /index.html
//! ```
//!
//! Everything else (startup banner, PHP warnings, `error_log` output) is
//! passed through as [`LogEvent::Raw`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
	Accepted,
	Closing,
}

impl fmt::Display for ConnectionAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectionAction::Accepted => f.write_str("Accepted"),
			ConnectionAction::Closing => f.write_str("Closing"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
	Connection {
		ip: String,
		port: u16,
		action: ConnectionAction,
	},
	Request {
		ip: String,
		port: u16,
		verb: String,
		path: String,
		status: u16,
	},
	Raw {
		text: String,
	},
}

impl LogEvent {
	/// Writes the event to the active tracing subscriber.
	pub fn emit(&self) {
		match self {
			LogEvent::Connection { ip, port, action } => {
				tracing::debug!("{} connection at {}:{}", action, ip, port);
			}
			LogEvent::Request { ip, port, verb, path, status } => {
				tracing::info!(ip = %ip, port, "{} {} -> {}", verb, path, status);
			}
			LogEvent::Raw { text } if is_php_diagnostic(text) => tracing::warn!("{}", text),
			LogEvent::Raw { text } => tracing::info!("{}", text),
		}
	}
}

fn is_php_diagnostic(text: &str) -> bool {
	["Warning:", "Fatal error:", "Parse error:", "Deprecated:"]
		.iter()
		.any(|marker| text.contains(marker))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
	pub verbose: bool,
}

impl Classifier {
	pub fn new(verbose: bool) -> Self {
		Self { verbose }
	}

	/// Classifies one line. Returns `None` for blank lines and for connection
	/// churn when not verbose.
	pub fn classify(&self, line: &str) -> Option<LogEvent> {
		let line = strip_timestamp(line.trim_end_matches(['\r', '\n']));
		if line.trim().is_empty() {
			return None;
		}
		match parse(line) {
			Some(LogEvent::Connection { .. }) if !self.verbose => None,
			Some(event) => Some(event),
			None => Some(LogEvent::Raw { text: line.to_string() }),
		}
	}
}

fn strip_timestamp(line: &str) -> &str {
	if line.starts_with('[') {
		if let Some(end) = line.find("] ") {
			return &line[end + 2..];
		}
	}
	line
}

fn parse(line: &str) -> Option<LogEvent> {
	parse_connection(line).or_else(|| parse_request(line))
}

fn parse_connection(line: &str) -> Option<LogEvent> {
	let (addr, word) = line.rsplit_once(' ')?;
	let action = if word.eq_ignore_ascii_case("accepted") {
		ConnectionAction::Accepted
	} else if word.eq_ignore_ascii_case("closing") {
		ConnectionAction::Closing
	} else {
		return None;
	};
	let (ip, port) = split_addr(addr)?;
	Some(LogEvent::Connection { ip, port, action })
}

fn parse_request(line: &str) -> Option<LogEvent> {
	for (idx, _) in line.match_indices(" [") {
		let Some((ip, port)) = split_addr(&line[..idx]) else {
			continue;
		};
		let rest = &line[idx + 2..];
		let Some(status) = rest.get(..3).filter(|s| s.bytes().all(|b| b.is_ascii_digit())) else {
			continue;
		};
		let Some(request) = rest[3..].strip_prefix("]: ") else {
			continue;
		};
		let (verb, path) = request.split_once(' ')?;
		if verb.is_empty() || verb.contains(char::is_whitespace) {
			return None;
		}
		return Some(LogEvent::Request {
			ip,
			port,
			verb: verb.to_string(),
			path: path.to_string(),
			status: status.parse().ok()?,
		});
	}
	None
}

/// Splits `<ip>:<port>` on the last colon, so `[::1]:8000` works.
fn split_addr(addr: &str) -> Option<(String, u16)> {
	let (ip, port) = addr.rsplit_once(':')?;
	if ip.is_empty() || ip.contains(char::is_whitespace) {
		return None;
	}
	if port.is_empty() || port.len() > 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	Some((ip.to_string(), port.parse().ok()?))
}
