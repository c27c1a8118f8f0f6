//! Turns the bytes coming off a transport into [`RawSample`]s.
//!
//! Two framings are understood:
//!
//! - [`FrameFormat::Text`]: newline delimited decimal integers, one reading
//!   per line, always on channel 0. `\r\n` and `\n` endings both work.
//! - [`FrameFormat::Binary`]: fixed frames of [`BINARY_FRAME_LEN`] bytes, one
//!   unsigned byte per channel.
//!
//! Anything that does not decode is dropped without touching pipeline state.

use crate::telemetry::RawSample;
use clap::ValueEnum;
use log::{debug, warn};
use nom::{
    character::complete::{i32, space0},
    multi::count,
    number::complete::u8 as byte,
    sequence::preceded,
    Finish, IResult,
};
use serde::{Deserialize, Serialize};
use std::str;

/// Number of channels, and so bytes, in one binary frame.
pub const BINARY_FRAME_LEN: usize = 5;

/// Longest text line kept. Anything longer is discarded up to the next newline.
pub const MAX_LINE_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum FrameFormat {
    Text,
    Binary,
}

/// Leading whitespace, then a signed decimal integer. Whatever follows the
/// digits is ignored, so `"42abc"` reads as 42.
fn parse_reading(s: &str) -> IResult<&str, i32> {
    preceded(space0, i32)(s)
}

fn parse_binary_frame(bytes: &[u8]) -> IResult<&[u8], Vec<u8>> {
    count(byte, BINARY_FRAME_LEN)(bytes)
}

/// Decodes a single text line. `None` for anything without a leading integer.
pub fn decode_line(line: &str) -> Option<i32> {
    parse_reading(line)
        .finish()
        .map(|(_rest, value)| value)
        .ok()
}

/// Accumulates bytes until a full line is available.
#[derive(Debug, Default)]
pub struct TextFramer {
    line_buf: Vec<u8>,
    // Skipping the rest of an overlong line
    discarding: bool,
}

impl TextFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<RawSample> {
        let mut out = Vec::new();
        for &c in bytes {
            if c == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else if let Some(sample) = self.take_line() {
                    out.push(sample);
                }
            } else if self.discarding {
                continue;
            } else if self.line_buf.len() >= MAX_LINE_LEN {
                warn!(
                    "Discarding line longer than {} bytes, is the format right?",
                    MAX_LINE_LEN
                );
                self.line_buf.clear();
                self.discarding = true;
            } else {
                self.line_buf.push(c);
            }
        }
        out
    }

    /// Decodes whatever partial line is left when the stream ends.
    pub fn finish(&mut self) -> Option<RawSample> {
        if self.discarding {
            self.discarding = false;
            return None;
        }
        if self.line_buf.is_empty() {
            return None;
        }
        self.take_line()
    }

    fn take_line(&mut self) -> Option<RawSample> {
        if self.line_buf.last() == Some(&b'\r') {
            self.line_buf.pop();
        }
        let res = match str::from_utf8(&self.line_buf) {
            Ok(line) => match decode_line(line) {
                Some(value) => Some(RawSample::new(0, value)),
                None => {
                    debug!("Dropping non-numeric frame {:?}", line);
                    None
                }
            },
            // Usually garbage left in the device buffer when the port opens
            Err(e) => {
                warn!("Failed to decode utf-8: {:?}", e);
                None
            }
        };
        self.line_buf.clear();
        res
    }
}

/// Accumulates bytes into fixed size multi-channel frames.
#[derive(Debug, Default)]
pub struct BinaryFramer {
    frame_buf: Vec<u8>,
}

impl BinaryFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<RawSample> {
        self.frame_buf.extend_from_slice(bytes);

        let mut out = Vec::new();
        let mut consumed = 0;
        while let Ok((_rest, frame)) = parse_binary_frame(&self.frame_buf[consumed..]) {
            out.extend(
                frame
                    .into_iter()
                    .enumerate()
                    .map(|(channel, value)| RawSample::new(channel, value as i32)),
            );
            consumed += BINARY_FRAME_LEN;
        }
        self.frame_buf.drain(..consumed);
        out
    }

    /// Bytes of an incomplete frame still waiting for the rest.
    pub fn pending(&self) -> usize {
        self.frame_buf.len()
    }
}

/// Either framing, picked at startup.
#[derive(Debug)]
pub enum Framer {
    Text(TextFramer),
    Binary(BinaryFramer),
}

impl Framer {
    pub fn new(format: FrameFormat) -> Self {
        match format {
            FrameFormat::Text => Framer::Text(TextFramer::new()),
            FrameFormat::Binary => Framer::Binary(BinaryFramer::new()),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<RawSample> {
        match self {
            Framer::Text(t) => t.push(bytes),
            Framer::Binary(b) => b.push(bytes),
        }
    }

    /// Flushes a trailing text line. A partial binary frame is discarded.
    pub fn finish(&mut self) -> Vec<RawSample> {
        match self {
            Framer::Text(t) => t.finish().into_iter().collect(),
            Framer::Binary(b) => {
                if b.pending() > 0 {
                    debug!("Discarding {} bytes of a partial frame", b.pending());
                }
                b.frame_buf.clear();
                Vec::new()
            }
        }
    }
}
