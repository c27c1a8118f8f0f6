//! A stand-in for real hardware: a background thread that produces a slow,
//! noisy flex sweep on every channel of the rig.

use crate::session::Event;
use crate::telemetry::{RawSample, SourceError, TelemetrySource};
use log::{debug, warn};
use rand::prelude::*;
use std::f64::consts::PI;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Readings per second per channel.
const SAMPLE_RATE: f64 = 50.0;

enum Signal {
    Amplitude(f64),
    Noise(f64),
    Period(f64),
    Stop,
}

/// Shape of the generated sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sweep {
    /// Reading at rest.
    pub base: f64,
    /// Peak distance from `base`.
    pub amplitude: f64,
    /// Seconds for one full bend and release.
    pub period: f64,
    /// Peak uniform noise added to each reading.
    pub noise: f64,
    /// Inclusive bounds readings are clamped to.
    pub range: (i32, i32),
}

impl Sweep {
    /// A single finger sensor sweeping through its whole flexion range.
    pub fn finger() -> Self {
        Self {
            base: 200.0,
            amplitude: 600.0,
            period: 4.0,
            noise: 8.0,
            range: (0, 1023),
        }
    }

    /// Byte-valued spine sensors rocking either side of centre.
    pub fn spine() -> Self {
        Self {
            base: 128.0,
            amplitude: 80.0,
            period: 6.0,
            noise: 3.0,
            range: (0, 255),
        }
    }
}

/// The readings for every channel at time `t` seconds. A single channel
/// bends one way from `base`; multiple channels oscillate about `base`, each
/// a little behind the previous one.
fn sweep_samples<R: Rng>(sweep: &Sweep, channels: usize, t: f64, rng: &mut R) -> Vec<RawSample> {
    let phase = 2.0 * PI * t / sweep.period;
    (0..channels)
        .map(|channel| {
            let clean = if channels == 1 {
                sweep.base + sweep.amplitude * (1.0 - phase.cos()) / 2.0
            } else {
                sweep.base + sweep.amplitude * (phase - channel as f64 * 0.6).sin()
            };
            let noisy = if sweep.noise > 0.0 {
                clean + rng.gen_range(-sweep.noise..sweep.noise)
            } else {
                clean
            };
            let value = (noisy.round() as i32).clamp(sweep.range.0, sweep.range.1);
            RawSample::new(channel, value)
        })
        .collect()
}

pub struct DummySource {
    sweep: Sweep,
    channels: usize,
    handle: Option<thread::JoinHandle<()>>,
    tx: Option<mpsc::Sender<Signal>>,
}

impl DummySource {
    pub fn new(sweep: Sweep, channels: usize) -> Self {
        Self {
            sweep,
            channels,
            handle: None,
            tx: None,
        }
    }

    fn signal(&self, signal: Signal) {
        match &self.tx {
            Some(tx) => {
                if tx.send(signal).is_err() {
                    warn!("Dummy source thread is gone");
                }
            }
            None => debug!("Dummy source not running, signal dropped"),
        }
    }

    pub fn set_amplitude(&self, amplitude: f64) {
        self.signal(Signal::Amplitude(amplitude));
    }

    pub fn set_noise(&self, noise: f64) {
        self.signal(Signal::Noise(noise));
    }

    pub fn set_period(&self, period: f64) {
        self.signal(Signal::Period(period));
    }
}

impl TelemetrySource for DummySource {
    fn start(&mut self, events: Sender<Event>) -> Result<(), SourceError> {
        if self.handle.is_some() {
            return Err(SourceError::AlreadyRunning);
        }
        let (tx, rx) = mpsc::channel::<Signal>();
        let mut sweep = self.sweep;
        let channels = self.channels;

        let handle = thread::spawn(move || {
            let mut rng = thread_rng();
            let started = Instant::now();
            let interval = Duration::from_secs_f64(1.0 / SAMPLE_RATE);
            loop {
                match rx.try_recv() {
                    Ok(Signal::Amplitude(a)) => sweep.amplitude = a,
                    Ok(Signal::Noise(n)) => sweep.noise = n,
                    Ok(Signal::Period(p)) if p > 0.0 => sweep.period = p,
                    Ok(Signal::Period(_)) => {}
                    Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                    Err(mpsc::TryRecvError::Empty) => {}
                }
                let t = started.elapsed().as_secs_f64();
                let samples = sweep_samples(&sweep, channels, t, &mut rng);
                if events.send(Event::Samples(samples)).is_err() {
                    break;
                }
                spin_sleep::sleep(interval);
            }
        });

        self.tx = Some(tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Signal::Stop);
        }
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("Dummy source thread panicked");
            }
        }
    }
}

impl Drop for DummySource {
    fn drop(&mut self) {
        self.stop();
    }
}
