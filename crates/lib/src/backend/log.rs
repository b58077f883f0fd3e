//! Incremental parsing of container build logs.
//!
//! A build log arrives one line at a time. Lines that are JSON are decoded
//! either as Engine API build messages (`stream` / `error` / `errorDetail`)
//! or as BuildKit solve status records (`vertexes` / `logs`); a build error
//! is only ever taken from a structured error field. Plain text lines are
//! kept as context and never classified.
//!
//! Only the last lines are retained, so memory stays bounded no matter how
//! much the build prints.

use std::collections::VecDeque;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::trace;

/// Lines of context kept for error reports.
pub const DEFAULT_TAIL_LINES: usize = 64;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogRecord {
  stream: Option<String>,
  error: Option<String>,
  #[serde(rename = "errorDetail")]
  error_detail: Option<ErrorDetail>,
  vertexes: Vec<Vertex>,
  logs: Vec<VertexLog>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorDetail {
  message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Vertex {
  name: String,
  error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VertexLog {
  /// Base64-encoded output bytes.
  data: String,
}

/// Watches a build log for structured errors while keeping a bounded tail.
#[derive(Debug, Clone)]
pub struct BuildLogMonitor {
  capacity: usize,
  tail: VecDeque<String>,
  errors: Vec<String>,
  lines: usize,
}

impl Default for BuildLogMonitor {
  fn default() -> Self {
    Self::new()
  }
}

impl BuildLogMonitor {
  pub fn new() -> Self {
    Self::with_capacity(DEFAULT_TAIL_LINES)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      tail: VecDeque::with_capacity(capacity.max(1)),
      errors: Vec::new(),
      lines: 0,
    }
  }

  /// Consume one raw log line.
  pub fn feed(&mut self, line: &str) {
    self.lines += 1;
    let trimmed = line.trim();
    if trimmed.is_empty() {
      return;
    }

    if trimmed.starts_with('{') {
      match serde_json::from_str::<LogRecord>(trimmed) {
        Ok(record) => {
          self.record(record);
          return;
        }
        Err(err) => trace!(error = %err, "build log line is not a log record"),
      }
    }

    self.remember(trimmed);
  }

  fn record(&mut self, record: LogRecord) {
    if let Some(text) = &record.stream {
      for line in text.lines() {
        self.remember(line);
      }
    }

    let message = record
      .error
      .filter(|e| !e.is_empty())
      .or_else(|| record.error_detail.and_then(|d| d.message).filter(|m| !m.is_empty()));
    if let Some(message) = message {
      self.fail(message);
    }

    for log in &record.logs {
      match STANDARD.decode(&log.data) {
        Ok(bytes) => {
          for line in String::from_utf8_lossy(&bytes).lines() {
            self.remember(line);
          }
        }
        Err(err) => trace!(error = %err, "undecodable vertex log"),
      }
    }

    for vertex in record.vertexes {
      if let Some(error) = vertex.error.filter(|e| !e.is_empty()) {
        let message = if vertex.name.is_empty() {
          error
        } else {
          format!("{}: {}", vertex.name, error)
        };
        self.fail(message);
      }
    }
  }

  fn fail(&mut self, message: String) {
    if !self.errors.contains(&message) {
      self.remember(&message);
      self.errors.push(message);
    }
  }

  fn remember(&mut self, line: &str) {
    let line = line.trim_end();
    if line.is_empty() {
      return;
    }
    if self.tail.len() == self.capacity {
      self.tail.pop_front();
    }
    self.tail.push_back(line.to_string());
  }

  /// The first structured error seen, if any.
  pub fn error(&self) -> Option<&str> {
    self.errors.first().map(String::as_str)
  }

  pub fn errors(&self) -> &[String] {
    &self.errors
  }

  pub fn has_failed(&self) -> bool {
    !self.errors.is_empty()
  }

  /// The retained last lines, oldest first.
  pub fn tail(&self) -> Vec<String> {
    self.tail.iter().cloned().collect()
  }

  /// Number of raw lines fed so far.
  pub fn lines_seen(&self) -> usize {
    self.lines
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn engine_stream_lines_are_context() {
    let mut monitor = BuildLogMonitor::new();
    monitor.feed(r#"{"stream":"Step 1/3 : FROM alpine\n"}"#);
    monitor.feed(r#"{"stream":" ---> 3f57d9401f8d\n"}"#);

    assert!(!monitor.has_failed());
    assert_eq!(monitor.tail(), vec!["Step 1/3 : FROM alpine", " ---> 3f57d9401f8d"]);
  }

  #[test]
  fn engine_error_field() {
    let mut monitor = BuildLogMonitor::new();
    monitor.feed(
      r#"{"errorDetail":{"code":1,"message":"The command '/bin/sh -c make' returned a non-zero code: 1"},"error":"The command '/bin/sh -c make' returned a non-zero code: 1"}"#,
    );

    assert_eq!(monitor.error(), Some("The command '/bin/sh -c make' returned a non-zero code: 1"));
    assert_eq!(monitor.errors().len(), 1);
  }

  #[test]
  fn error_detail_without_error() {
    let mut monitor = BuildLogMonitor::new();
    monitor.feed(r#"{"errorDetail":{"message":"pull access denied"}}"#);

    assert_eq!(monitor.error(), Some("pull access denied"));
  }

  #[test]
  fn buildkit_vertex_error_and_logs() {
    let data = STANDARD.encode("go: cannot find module\n");
    let mut monitor = BuildLogMonitor::new();
    monitor.feed(&format!(r#"{{"logs":[{{"vertex":"sha256:1","stream":2,"data":"{}"}}]}}"#, data));
    monitor.feed(r#"{"vertexes":[{"digest":"sha256:1","name":"[2/3] RUN go build","error":"exit code: 1"}]}"#);

    assert_eq!(monitor.error(), Some("[2/3] RUN go build: exit code: 1"));
    assert!(monitor.tail().contains(&"go: cannot find module".to_string()));
  }

  #[test]
  fn repeated_vertex_error_is_recorded_once() {
    let mut monitor = BuildLogMonitor::new();
    let line = r#"{"vertexes":[{"name":"step","error":"boom"}]}"#;
    monitor.feed(line);
    monitor.feed(line);

    assert_eq!(monitor.errors().len(), 1);
  }

  #[test]
  fn plain_text_mentioning_errors_is_not_a_failure() {
    let mut monitor = BuildLogMonitor::new();
    monitor.feed(r#"echo '{"error": oops'"#);
    monitor.feed("error: this is just output from the user's build");

    assert!(!monitor.has_failed());
    assert_eq!(monitor.lines_seen(), 2);
  }

  #[test]
  fn tail_is_bounded() {
    let mut monitor = BuildLogMonitor::with_capacity(3);
    for i in 0..10 {
      monitor.feed(&format!("line {}", i));
    }

    assert_eq!(monitor.tail(), vec!["line 7", "line 8", "line 9"]);
    assert_eq!(monitor.lines_seen(), 10);
  }
}
