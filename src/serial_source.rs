//! Readings from a sensor attached to a serial port.

use crate::frame_decoder::{FrameFormat, Framer};
use crate::session::Event;
use crate::telemetry::{SourceError, TelemetrySource};
use log::{debug, info, warn};
use serial2::SerialPort;
use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

pub const DEFAULT_BAUD: u32 = 9600;

/// How long one read may wait for bytes. Bounds how long `stop()` takes.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial devices present on this machine.
pub fn available_ports() -> Result<Vec<PathBuf>, SourceError> {
    Ok(SerialPort::available_ports()?)
}

pub struct SerialSource {
    device: PathBuf,
    baud: u32,
    format: FrameFormat,
    keep_reading: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SerialSource {
    pub fn new(device: impl Into<PathBuf>, baud: u32, format: FrameFormat) -> Self {
        Self {
            device: device.into(),
            baud,
            format,
            keep_reading: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn device(&self) -> &PathBuf {
        &self.device
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl TelemetrySource for SerialSource {
    fn start(&mut self, events: Sender<Event>) -> Result<(), SourceError> {
        match &self.handle {
            Some(thread) if !thread.is_finished() => return Err(SourceError::AlreadyRunning),
            Some(_) => self.stop(),
            None => {}
        }

        let mut port = SerialPort::open(&self.device, self.baud).map_err(|e| {
            SourceError::Unavailable(format!("{}: {}", self.device.display(), e))
        })?;
        port.set_read_timeout(READ_TIMEOUT)?;
        info!(
            "Opened {} at {} baud",
            self.device.display(),
            self.baud
        );

        self.keep_reading.store(true, Ordering::Release);
        let keep_reading = Arc::clone(&self.keep_reading);
        let mut framer = Framer::new(self.format);

        let handle = thread::spawn(move || {
            let mut buffer = [0; 256];

            while keep_reading.load(Ordering::Acquire) {
                match port.read(&mut buffer) {
                    Ok(0) => {
                        let tail = framer.finish();
                        if !tail.is_empty() {
                            let _ = events.send(Event::Samples(tail));
                        }
                        let _ = events.send(Event::SourceClosed);
                        return;
                    }
                    Ok(read_len) => {
                        let samples = framer.push(&buffer[..read_len]);
                        if samples.is_empty() {
                            continue;
                        }
                        debug!("Decoded {} samples", samples.len());
                        if events.send(Event::Samples(samples)).is_err() {
                            return;
                        }
                    }
                    Err(e) if is_timeout(&e) => {}
                    Err(e) => {
                        warn!("Serial read failed: {}", e);
                        let _ = events.send(Event::SourceFailed(e.to_string()));
                        return;
                    }
                }
            }
            debug!("Serial reader stopped");
        });

        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.keep_reading.store(false, Ordering::Release);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("Serial reader thread panicked");
            }
            info!("Closed {}", self.device.display());
        }
    }
}

impl Drop for SerialSource {
    fn drop(&mut self) {
        self.stop();
    }
}
