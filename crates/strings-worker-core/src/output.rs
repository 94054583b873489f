use serde::{Deserialize, Serialize};

const MARKER_PREFIX: &str = "[strings-worker: output truncated";

/// Line appended to a stream that hit its capture limit
pub fn truncation_marker(dropped_bytes: u64) -> String {
    format!("{}, {} bytes dropped]\n", MARKER_PREFIX, dropped_bytes)
}

/// Bytes captured from one stream of the tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub bytes: Vec<u8>,
    pub truncated: bool,
    pub dropped_bytes: u64,
}

impl CapturedOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn strings(&self) -> Vec<ExtractedString> {
        parse_strings_output(&self.bytes)
    }

    /// Retained lines, not counting the truncation marker
    pub fn line_count(&self) -> u64 {
        let newlines = self.bytes.iter().filter(|&&b| b == b'\n').count() as u64;
        if self.truncated {
            newlines.saturating_sub(1)
        } else {
            newlines
        }
    }
}

/// Accumulates a stream up to a fixed size.
///
/// Bytes past the limit are counted and discarded so the reader keeps
/// draining the pipe. Memory use never exceeds the limit plus the marker.
#[derive(Debug)]
pub struct OutputBuffer {
    limit: usize,
    data: Vec<u8>,
    dropped: u64,
    lines: u64,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        OutputBuffer {
            limit,
            data: Vec::with_capacity(limit.min(64 * 1024)),
            dropped: 0,
            lines: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.lines += chunk.iter().filter(|&&b| b == b'\n').count() as u64;

        let room = self.limit.saturating_sub(self.data.len());
        let take = room.min(chunk.len());
        self.data.extend_from_slice(&chunk[..take]);
        self.dropped += (chunk.len() - take) as u64;
    }

    /// Newlines seen so far, including dropped ones
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    pub fn finish(mut self) -> CapturedOutput {
        if self.dropped == 0 {
            return CapturedOutput {
                bytes: self.data,
                truncated: false,
                dropped_bytes: 0,
            };
        }

        // Never end on half a line
        let keep = self
            .data
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        self.dropped += (self.data.len() - keep) as u64;
        self.data.truncate(keep);
        self.data
            .extend_from_slice(truncation_marker(self.dropped).as_bytes());

        CapturedOutput {
            bytes: self.data,
            truncated: true,
            dropped_bytes: self.dropped,
        }
    }
}

/// One line of `strings -t d` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedString {
    /// Decimal byte offset in the input, when the tool printed one
    pub offset: Option<u64>,
    pub value: String,
}

/// Parse the tool's stdout into strings, skipping the truncation marker.
pub fn parse_strings_output(bytes: &[u8]) -> Vec<ExtractedString> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with(MARKER_PREFIX))
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> ExtractedString {
    let trimmed = line.trim_start();
    if let Some((offset, value)) = trimmed.split_once(' ') {
        if !offset.is_empty() && offset.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(offset) = offset.parse() {
                return ExtractedString {
                    offset: Some(offset),
                    value: value.to_string(),
                };
            }
        }
    }

    ExtractedString {
        offset: None,
        value: line.to_string(),
    }
}
