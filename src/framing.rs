// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation

use crate::error::{BridgeError, Result};

/// Maximum bytes a single line may accumulate before the stream is
/// considered corrupt.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits an inbound byte stream into newline-delimited lines.
///
/// Bytes after the last `\n` are retained across calls. Lines are trimmed
/// of surrounding whitespace (which also swallows `\r` from CRLF peers);
/// lines that are empty after trimming are discarded.
#[derive(Debug, Default)]
pub struct LineFramer {
    residual: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, invoking `on_line` for every complete line.
    ///
    /// Returns a protocol error if the residual grows past [`MAX_LINE_BYTES`]
    /// without a newline; callers should tear the connection down.
    pub fn feed(&mut self, bytes: &[u8], mut on_line: impl FnMut(String)) -> Result<()> {
        self.residual.extend_from_slice(bytes);

        let mut start = 0;
        while let Some(offset) = self.residual[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.residual[start..end]);
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                on_line(trimmed.to_string());
            }
            start = end + 1;
        }
        self.residual.drain(..start);

        if self.residual.len() > MAX_LINE_BYTES {
            self.residual.clear();
            return Err(BridgeError::Protocol {
                details: format!("line exceeded {MAX_LINE_BYTES} bytes without a newline"),
            });
        }
        Ok(())
    }

    /// Drop any partial line (used when a connection closes).
    pub fn reset(&mut self) {
        self.residual.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(framer: &mut LineFramer, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        framer.feed(bytes, |l| lines.push(l)).unwrap();
        lines
    }

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::new();
        assert_eq!(collect(&mut framer, b"300 ok\n"), vec!["300 ok"]);
    }

    #[test]
    fn test_residual_across_feeds() {
        let mut framer = LineFramer::new();
        assert!(collect(&mut framer, b"lighting on 254").is_empty());
        assert_eq!(
            collect(&mut framer, b"/56/4\nlighting off 254/56/5\n"),
            vec!["lighting on 254/56/4", "lighting off 254/56/5"]
        );
    }

    #[test]
    fn test_crlf_and_blank_lines_dropped() {
        let mut framer = LineFramer::new();
        assert_eq!(collect(&mut framer, b"  300 ok \r\n\r\n\n"), vec!["300 ok"]);
    }

    #[test]
    fn test_oversize_line_is_protocol_error() {
        let mut framer = LineFramer::new();
        let big = vec![b'x'; MAX_LINE_BYTES + 1];
        assert!(framer.feed(&big, |_| ()).is_err());
        // After the error the buffer is usable again.
        assert_eq!(collect(&mut framer, b"ok\n"), vec!["ok"]);
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut framer = LineFramer::new();
        assert!(collect(&mut framer, b"parti").is_empty());
        framer.reset();
        assert_eq!(collect(&mut framer, b"al\nwhole\n"), vec!["al", "whole"]);
    }
}
