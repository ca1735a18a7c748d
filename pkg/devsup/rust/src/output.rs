// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

pub const DEFAULT_OUTPUT_CAP: usize = 400_000;

/// Combined child output, capped at `cap` characters. Oldest text is dropped first.
#[derive(Debug)]
pub struct OutputBuffer {
    text: String,
    chars: usize,
    cap: usize,
}

impl OutputBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            cap,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        self.chars += chunk.chars().count();
        if self.chars <= self.cap {
            return;
        }
        let excess = self.chars - self.cap;
        let cut = self
            .text
            .char_indices()
            .nth(excess)
            .map_or(self.text.len(), |(i, _)| i);
        self.text.drain(..cut);
        self.chars = self.cap;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len_chars(&self) -> usize {
        self.chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_cap_keeps_everything() {
        let mut buf = OutputBuffer::new(16);
        buf.push("hello ");
        buf.push("world");
        assert_eq!(buf.as_str(), "hello world");
        assert_eq!(buf.len_chars(), 11);
    }

    #[test]
    fn test_over_cap_drops_oldest() {
        let mut buf = OutputBuffer::new(8);
        buf.push("0123456789");
        assert_eq!(buf.as_str(), "23456789");
        buf.push("ab");
        assert_eq!(buf.as_str(), "456789ab");
        assert_eq!(buf.len_chars(), 8);
    }

    #[test]
    fn test_cap_counts_chars_not_bytes() {
        let mut buf = OutputBuffer::new(3);
        buf.push("héllo");
        assert_eq!(buf.as_str(), "llo");
        buf.push("→");
        assert_eq!(buf.as_str(), "lo→");
    }

    #[test]
    fn test_ready_marker_survives_when_recent() {
        let mut buf = OutputBuffer::new(32);
        buf.push(&"x".repeat(100));
        buf.push("  Local: http://127.0.0.1:5173/");
        assert!(buf.as_str().contains("Local:"));
    }
}
