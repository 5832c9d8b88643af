//! Newline-delimited JSON framing for the control socket.
//!
//! Wire format: one UTF-8 JSON object per line, terminated by `\n`.

use crate::error::{PilotError, PilotResult};

/// Longest request line accepted before the decoder gives up on it (1 MiB).
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Encode a serializable value as a single JSON line (with trailing `\n`).
pub fn line_encode<T: serde::Serialize>(value: &T) -> PilotResult<Vec<u8>> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

/// Decode one line (without its terminator) into a typed value.
pub fn line_decode<T: serde::de::DeserializeOwned>(line: &[u8]) -> PilotResult<T> {
    let value: T = serde_json::from_slice(line)?;
    Ok(value)
}

/// Streaming line decoder: accumulates bytes and yields complete lines.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    max_line: usize,
    /// Set after an oversized line until its terminating newline arrives.
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed bytes and return every complete, non-blank line.
    ///
    /// A line that grows past the limit is reported once as a `Codec` error
    /// and the rest of it is dropped; decoding resumes after its newline.
    pub fn feed_raw(&mut self, data: &[u8]) -> Vec<PilotResult<Vec<u8>>> {
        let mut lines = Vec::new();

        for &byte in data {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                let mut line = std::mem::take(&mut self.buffer);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if !line.iter().all(u8::is_ascii_whitespace) {
                    lines.push(Ok(line));
                }
                continue;
            }

            if self.discarding {
                continue;
            }
            if self.buffer.len() >= self.max_line {
                lines.push(Err(PilotError::Codec(format!(
                    "request line exceeds {} bytes",
                    self.max_line
                ))));
                self.buffer = Vec::new();
                self.discarding = true;
                continue;
            }
            self.buffer.push(byte);
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        cmd: String,
        n: i64,
    }

    #[test]
    fn encoded_line_ends_with_newline() {
        let line = line_encode(&Sample { cmd: "ping".into(), n: 1 }).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    fn decode_all(decoder: &mut LineDecoder, data: &[u8]) -> Vec<PilotResult<Sample>> {
        decoder
            .feed_raw(data)
            .into_iter()
            .map(|line| line.and_then(|l| line_decode(&l)))
            .collect()
    }

    #[test]
    fn several_lines_in_one_chunk() {
        let mut decoder = LineDecoder::new();
        let decoded = decode_all(
            &mut decoder,
            b"{\"cmd\":\"a\",\"n\":1}\n{\"cmd\":\"b\",\"n\":2}\n",
        );
        let decoded: Vec<Sample> = decoded.into_iter().map(Result::unwrap).collect();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].cmd, "b");
    }

    #[test]
    fn incremental_feed() {
        let line = line_encode(&Sample { cmd: "sessions".into(), n: 9 }).unwrap();
        let mut decoder = LineDecoder::new();

        for i in 0..line.len() - 1 {
            assert!(decode_all(&mut decoder, &line[i..i + 1]).is_empty());
        }

        let out = decode_all(&mut decoder, &line[line.len() - 1..]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().n, 9);
    }

    #[test]
    fn blank_lines_and_crlf() {
        let mut decoder = LineDecoder::new();
        let out = decoder.feed_raw(b"\n  \r\n{\"x\":1}\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), b"{\"x\":1}");
    }

    #[test]
    fn malformed_line_does_not_poison_next() {
        let mut decoder = LineDecoder::new();
        let out = decode_all(&mut decoder, b"not json\n{\"cmd\":\"ok\",\"n\":0}\n");
        assert!(matches!(out[0], Err(PilotError::Codec(_))));
        assert_eq!(out[1].as_ref().unwrap().cmd, "ok");
    }

    #[test]
    fn oversized_line_reported_once_then_resumes() {
        let mut decoder = LineDecoder::with_max_line(8);
        let out = decoder.feed_raw(b"0123456789abcdef\nshort\n");
        assert_eq!(out.len(), 2);
        assert!(out[0].is_err());
        assert_eq!(out[1].as_ref().unwrap(), b"short");
    }
}
