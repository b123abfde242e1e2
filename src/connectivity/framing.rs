// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Message framing on byte streams

use tracing::warn;

/// Longest newline-delimited frame kept while waiting for its terminator
const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One read is one message (RFCOMM)
    MessageBoundary,
    /// Messages end with `\n` (serial, TCP)
    NewlineDelimited,
}

impl Framing {
    /// Wire bytes for one outbound message
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        if *self == Framing::NewlineDelimited {
            frame.push(b'\n');
        }
        frame
    }
}

/// Splits inbound reads into messages
pub struct FrameDecoder {
    framing: Framing,
    buf: Vec<u8>,
    /// Dropping the tail of an overlong line until its terminator
    discarding: bool,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
            discarding: false,
        }
    }

    /// Feed one read; returns the complete messages it finished
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        match self.framing {
            Framing::MessageBoundary => {
                if data.iter().all(u8::is_ascii_whitespace) {
                    Vec::new()
                } else {
                    vec![data.to_vec()]
                }
            }
            Framing::NewlineDelimited => {
                let mut data = data;
                if self.discarding {
                    match data.iter().position(|&b| b == b'\n') {
                        Some(pos) => {
                            self.discarding = false;
                            data = &data[pos + 1..];
                        }
                        None => return Vec::new(),
                    }
                }
                self.buf.extend_from_slice(data);
                let mut frames = Vec::new();
                while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                    let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    if !line.iter().all(u8::is_ascii_whitespace) {
                        frames.push(line);
                    }
                }
                if self.buf.len() > MAX_FRAME_LEN {
                    warn!("Discarding a line longer than {} bytes", MAX_FRAME_LEN);
                    self.buf.clear();
                    self.discarding = true;
                }
                frames
            }
        }
    }

    /// Bytes of an unfinished line
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newline_split_across_reads() {
        let mut decoder = FrameDecoder::new(Framing::NewlineDelimited);
        assert!(decoder.push(b"{\"command\":").is_empty());
        assert_eq!(decoder.pending(), 11);

        let frames = decoder.push(b"\"get_status\"}\r\n\n{\"command\":\"get_distance\"}\n{\"par");
        assert_eq!(
            frames,
            vec![
                b"{\"command\":\"get_status\"}".to_vec(),
                b"{\"command\":\"get_distance\"}".to_vec()
            ]
        );
        assert_eq!(decoder.pending(), 5);
    }

    #[test]
    fn test_message_boundary_is_one_read() {
        let mut decoder = FrameDecoder::new(Framing::MessageBoundary);
        assert_eq!(decoder.push(b"{\"a\":1}"), vec![b"{\"a\":1}".to_vec()]);
        assert!(decoder.push(b" \r\n").is_empty());
    }

    #[test]
    fn test_encode_terminator() {
        assert_eq!(Framing::NewlineDelimited.encode(b"{}"), b"{}\n".to_vec());
        assert_eq!(Framing::MessageBoundary.encode(b"{}"), b"{}".to_vec());
    }

    #[test]
    fn test_oversized_line_discarded() {
        let mut decoder = FrameDecoder::new(Framing::NewlineDelimited);
        decoder.push(&vec![b'x'; MAX_FRAME_LEN + 1]);
        assert_eq!(decoder.pending(), 0);
        assert_eq!(decoder.push(b"ok\n"), Vec::<Vec<u8>>::new());
        assert_eq!(decoder.push(b"{\"command\":\"get_status\"}\n"), vec![b"{\"command\":\"get_status\"}".to_vec()]);
    }

    #[test]
    fn test_oversized_line_tail_is_not_a_frame() {
        let mut decoder = FrameDecoder::new(Framing::NewlineDelimited);
        assert!(decoder.push(&vec![b'{'; MAX_FRAME_LEN + 10]).is_empty());
        assert!(decoder.push(&vec![b'"'; 4096]).is_empty());
        assert_eq!(decoder.pending(), 0);

        let frames = decoder.push(b"tail}\n{\"command\":\"get_distance\"}\n");
        assert_eq!(frames, vec![b"{\"command\":\"get_distance\"}".to_vec()]);
    }
}
