//! Sliding-window noise filter for raw flex readings.

use crate::telemetry::{Channel, RawSample};
use std::collections::{HashMap, VecDeque};

/// How many of the most recent readings are averaged, per channel.
pub const WINDOW_SIZE: usize = 5;

/// A smoothed reading for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smoothed {
    pub channel: Channel,
    pub value: i32,
}

/// The `SampleSmoother` keeps the last [`WINDOW_SIZE`] readings of every
/// channel it has seen and reports their rounded mean after every push.
/// A window that is not yet full is averaged over what it holds; it is never
/// padded.
#[derive(Debug, Default)]
pub struct SampleSmoother {
    windows: HashMap<Channel, VecDeque<i32>>,
    last: HashMap<Channel, i32>,
}

impl SampleSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `sample` to its channel's window, evicting the oldest reading
    /// when full, and returns the new smoothed value.
    pub fn push(&mut self, sample: RawSample) -> Smoothed {
        let window = self
            .windows
            .entry(sample.channel)
            .or_insert_with(|| VecDeque::with_capacity(WINDOW_SIZE));

        window.push_back(sample.value);
        if window.len() > WINDOW_SIZE {
            window.pop_front();
        }

        let sum: i64 = window.iter().map(|&v| v as i64).sum();
        // Halves round up, toward positive infinity
        let value = (sum as f64 / window.len() as f64 + 0.5).floor() as i32;
        self.last.insert(sample.channel, value);

        Smoothed {
            channel: sample.channel,
            value,
        }
    }

    /// The most recent smoothed value for `channel`, if it has ever had one.
    pub fn last(&self, channel: Channel) -> Option<i32> {
        self.last.get(&channel).copied()
    }

    /// Number of readings currently held for `channel`.
    pub fn window_len(&self, channel: Channel) -> usize {
        self.windows.get(&channel).map_or(0, VecDeque::len)
    }

}
