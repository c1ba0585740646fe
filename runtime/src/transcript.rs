//! Captured child output.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One line of child output, tagged with its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    /// Milliseconds since the Unix epoch when the line was read.
    pub timestamp_ms: u64,
    /// Line text without its terminator.
    pub text: String,
}

impl OutputLine {
    pub fn new(stream: OutputStream, text: impl Into<String>) -> Self {
        Self {
            stream,
            timestamp_ms: now_ms(),
            text: text.into(),
        }
    }

    pub fn is_stderr(&self) -> bool {
        self.stream == OutputStream::Stderr
    }
}

/// Ordered transcript of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    lines: Vec<OutputLine>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: OutputLine) {
        self.lines.push(line);
    }

    /// Append all lines of another transcript.
    pub fn extend(&mut self, other: Transcript) {
        self.lines.extend(other.lines);
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Text of the lines from one stream, newline-joined.
    pub fn text(&self, stream: OutputStream) -> String {
        self.lines
            .iter()
            .filter(|l| l.stream == stream)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Last `n` stderr lines, for failure summaries.
    pub fn stderr_tail(&self, n: usize) -> Vec<&str> {
        let stderr: Vec<&str> = self
            .lines
            .iter()
            .filter(|l| l.is_stderr())
            .map(|l| l.text.as_str())
            .collect();
        let skip = stderr.len().saturating_sub(n);
        stderr[skip..].to_vec()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_by_stream() {
        let mut t = Transcript::new();
        t.push(OutputLine::new(OutputStream::Stdout, "one"));
        t.push(OutputLine::new(OutputStream::Stderr, "warn"));
        t.push(OutputLine::new(OutputStream::Stdout, "two"));
        assert_eq!(t.text(OutputStream::Stdout), "one\ntwo");
        assert_eq!(t.text(OutputStream::Stderr), "warn");
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_stderr_tail() {
        let mut t = Transcript::new();
        for i in 0..5 {
            t.push(OutputLine::new(OutputStream::Stderr, format!("e{i}")));
        }
        assert_eq!(t.stderr_tail(2), vec!["e3", "e4"]);
        assert_eq!(Transcript::new().stderr_tail(3), Vec::<&str>::new());
    }

    #[test]
    fn test_extend_preserves_order() {
        let mut a = Transcript::new();
        a.push(OutputLine::new(OutputStream::Stdout, "a"));
        let mut b = Transcript::new();
        b.push(OutputLine::new(OutputStream::Stdout, "b"));
        a.extend(b);
        assert_eq!(a.text(OutputStream::Stdout), "a\nb");
    }

    #[test]
    fn test_serialized_stream_tag() {
        let line = OutputLine::new(OutputStream::Stderr, "x");
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["stream"], "stderr");
    }
}
