// Commandline argument parser using clap for FlexMirror

use crate::config::RigConfig;
use crate::frame_decoder::FrameFormat;
use crate::serial_source::DEFAULT_BAUD;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct MirrorArgs {
    #[command(subcommand)]
    /// Whether to read a sensor, or mirror another machine
    pub command: CommandTask,

    /// Built-in rig to drive, ignored when --config is given
    #[arg(short = 'r', long = "rig", value_enum, default_value_t = RigPreset::Finger)]
    pub rig: RigPreset,

    /// RON file describing the rig and its tuning
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Animation clock rate, in frames per second (1 to 240)
    #[arg(long = "fps", default_value_t = 60.0, value_parser = parse_fps)]
    pub fps: f64,
}

fn parse_fps(s: &str) -> Result<f64, String> {
    let fps: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (1.0..=240.0).contains(&fps) {
        Ok(fps)
    } else {
        Err(format!("{} is not between 1 and 240", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RigPreset {
    /// Three-joint finger, bounded at 180 degrees
    Finger,
    /// Three-joint finger, bounded at 90 degrees
    Finger90,
    /// Five-channel spine
    Spine,
}

impl RigPreset {
    pub fn config(self) -> RigConfig {
        match self {
            RigPreset::Finger => RigConfig::finger(),
            RigPreset::Finger90 => RigConfig::finger_90(),
            RigPreset::Spine => RigConfig::spine(),
        }
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Read a sensor and optionally relay the pose to mirrors
    #[command(about)]
    Source(SourceCommand),

    /// Show the pose streamed by another machine
    #[command(about)]
    Mirror(MirrorCommand),
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct SourceCommand {
    /// Serial device to read; a selector is shown when omitted
    #[arg(short = 'p', long = "port")]
    pub port: Option<PathBuf>,

    /// Baud rate of the serial device
    #[arg(short = 'b', long = "baud", default_value_t = DEFAULT_BAUD)]
    pub baud: u32,

    /// How readings are framed on the wire
    #[arg(short = 'f', long = "format", value_enum, default_value_t = FrameFormat::Text)]
    pub format: FrameFormat,

    /// Address to accept mirrors on, e.g. 0.0.0.0:7878
    #[arg(short = 'l', long = "listen")]
    pub listen: Option<String>,

    /// Generate synthetic readings instead of opening a device
    #[arg(long = "dummy")]
    pub dummy: bool,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct MirrorCommand {
    /// Address of the source machine, e.g. 192.168.1.20:7878
    #[arg(short = 'a', long = "connect")]
    pub connect: String,

    /// Code shown by the source machine
    #[arg(short = 'k', long = "code")]
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        MirrorArgs::command().debug_assert();
    }

    #[test]
    fn parses_source() {
        let args = MirrorArgs::parse_from([
            "flexmirror",
            "--rig",
            "spine",
            "source",
            "--dummy",
            "--format",
            "binary",
            "--listen",
            "127.0.0.1:7878",
        ]);
        assert_eq!(args.rig, RigPreset::Spine);
        assert_eq!(args.fps, 60.0);
        match args.command {
            CommandTask::Source(cmd) => {
                assert!(cmd.dummy);
                assert_eq!(cmd.format, FrameFormat::Binary);
                assert_eq!(cmd.baud, DEFAULT_BAUD);
                assert_eq!(cmd.listen.as_deref(), Some("127.0.0.1:7878"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fps_must_be_in_range() {
        for bad in ["nan", "inf", "0", "-5", "1000"] {
            let res = MirrorArgs::try_parse_from(["flexmirror", "--fps", bad, "source", "--dummy"]);
            assert!(res.is_err(), "accepted --fps {}", bad);
        }
        let args =
            MirrorArgs::try_parse_from(["flexmirror", "--fps", "30", "source", "--dummy"]).unwrap();
        assert_eq!(args.fps, 30.0);
    }

    #[test]
    fn parses_mirror() {
        let args = MirrorArgs::parse_from([
            "flexmirror",
            "mirror",
            "--connect",
            "10.0.0.2:7878",
            "--code",
            "ab12",
        ]);
        match args.command {
            CommandTask::Mirror(cmd) => {
                assert_eq!(cmd.connect, "10.0.0.2:7878");
                assert_eq!(cmd.code, "ab12");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
