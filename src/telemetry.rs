//! The seam between the pipeline and whatever device is producing flex
//! readings.

use crate::session::Event;
use std::{error::Error, fmt, io, sync::mpsc::Sender};

pub type Channel = usize;
pub type Degree = f64;
pub type Radian = f64;

/// One reading from one sensor channel, exactly as the device sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub channel: Channel,
    pub value: i32,
}

impl RawSample {
    pub fn new(channel: Channel, value: i32) -> Self {
        Self { channel, value }
    }
}

/// `TelemetrySource`
///
/// Something that, once started, posts [`Event::Samples`] to the session
/// queue in arrival order until it is stopped or the transport fails.
/// Acquisition errors (no device, permission denied) come back from
/// `start()` directly; failures after that arrive as [`Event::SourceFailed`].
pub trait TelemetrySource {
    fn start(&mut self, events: Sender<Event>) -> Result<(), SourceError>;

    /// Cooperative stop. Must return promptly and release the device.
    fn stop(&mut self);
}

#[derive(Debug)]
pub enum SourceError {
    /// The device could not be opened.
    Unavailable(String),
    /// `start()` was called on a source that is already running.
    AlreadyRunning,
    IoError(io::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unavailable(name) => write!(f, "device unavailable: {}", name),
            SourceError::AlreadyRunning => write!(f, "source is already running"),
            SourceError::IoError(error) => write!(f, "io error: {}", error),
        }
    }
}

impl Error for SourceError {}

impl From<io::Error> for SourceError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}
