//! The session owns every piece of pipeline state and is the only thing that
//! mutates it.
//!
//! Sources, relay connections, the keyboard and the animation clock all
//! produce [Event]s. The main loop feeds them, one at a time and in arrival
//! order, to [Session::handle], which runs each to completion before the
//! next is looked at.

use crate::angle_mapper::AngleMapper;
use crate::config::{RigConfig, RigKind};
use crate::interpolator::{Pose, PoseInterpolator};
use crate::kinematics::{JointChain, KinematicModel, Severity};
use crate::relay::{RelayBroadcaster, RelayMessage, RelayPeer};
use crate::smoother::SampleSmoother;
use crate::telemetry::{Channel, Degree, RawSample};
use log::{debug, info, warn};
use std::collections::HashMap;

#[derive(Debug)]
pub enum Event {
    /// Decoded readings, in the order they arrived.
    Samples(Vec<RawSample>),
    /// The user asked to zero the sensors.
    Calibrate,
    SourceConnecting,
    SourceConnected,
    /// The source could not be opened, or died mid-stream.
    SourceFailed(String),
    /// The source was stopped or reached the end of its stream.
    SourceClosed,
    PeerJoined(RelayPeer),
    PeerClosed(String),
    MirrorConnecting,
    /// Joined a host under the given identity.
    MirrorOpened(String),
    MirrorFailed(String),
    MirrorData(RelayMessage),
    MirrorClosed,
    /// One beat of the animation clock.
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Connecting,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Idle,
    Connecting,
    Mirroring,
}

/// Everything the render surface needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub chain: JointChain,
    pub severity: Severity,
    pub angle: Degree,
    pub raw: Option<i32>,
    pub offset: f64,
    pub status: String,
}

pub struct Session {
    config: RigConfig,
    smoother: SampleSmoother,
    mapper: AngleMapper,
    interpolator: PoseInterpolator,
    model: KinematicModel,
    broadcaster: RelayBroadcaster,
    /// Latest smoothed reading per channel, or the relayed one when mirroring.
    raw: HashMap<Channel, i32>,
    source: SourceState,
    mirror: MirrorState,
    animating: bool,
    status: String,
}

impl Session {
    pub fn new(config: RigConfig) -> Self {
        let interpolator = PoseInterpolator::new(config.alpha, config.channels())
            .with_snap(config.snap_epsilon);
        Self {
            smoother: SampleSmoother::new(),
            mapper: AngleMapper::new(config.mapping_policy()),
            model: KinematicModel::new(config.rig.clone()),
            interpolator,
            broadcaster: RelayBroadcaster::new(),
            raw: HashMap::new(),
            source: SourceState::Idle,
            mirror: MirrorState::Idle,
            animating: false,
            status: "Disconnected".to_owned(),
            config,
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn source_state(&self) -> SourceState {
        self.source
    }

    pub fn mirror_state(&self) -> MirrorState {
        self.mirror
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn target(&self) -> &Pose {
        self.interpolator.target()
    }

    pub fn current(&self) -> &Pose {
        self.interpolator.current()
    }

    pub fn raw(&self, channel: Channel) -> Option<i32> {
        self.raw.get(&channel).copied()
    }

    pub fn offset(&self, channel: Channel) -> f64 {
        self.mapper.calibration().offset(channel)
    }

    pub fn mirror_count(&self) -> usize {
        self.broadcaster.len()
    }

    /// Applies one event.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Samples(samples) => self.on_samples(samples),
            Event::Calibrate => self.calibrate(),
            Event::SourceConnecting => {
                self.source = SourceState::Connecting;
                self.status = "Opening port...".to_owned();
            }
            Event::SourceConnected => {
                info!("Source streaming");
                self.source = SourceState::Streaming;
                self.status = "Connected".to_owned();
                self.animating = true;
            }
            Event::SourceFailed(reason) => {
                warn!("Source failed: {}", reason);
                self.source = SourceState::Idle;
                self.status = format!("Failed: {}", reason);
                self.settle_animation();
            }
            Event::SourceClosed => {
                info!("Source closed");
                self.source = SourceState::Idle;
                self.status = "Disconnected".to_owned();
                self.settle_animation();
            }
            Event::PeerJoined(peer) => {
                self.broadcaster.add(peer);
                self.refresh_hosting_status();
            }
            Event::PeerClosed(code) => {
                if self.broadcaster.remove(&code) {
                    debug!("Removed mirror {}", code);
                    self.refresh_hosting_status();
                }
            }
            Event::MirrorConnecting => {
                self.mirror = MirrorState::Connecting;
                self.status = "Connecting to source...".to_owned();
            }
            Event::MirrorOpened(code) => {
                self.mirror = MirrorState::Mirroring;
                self.status = format!("Mirroring as {}", code);
                self.animating = true;
            }
            Event::MirrorFailed(reason) => {
                self.mirror = MirrorState::Idle;
                self.status = format!("Mirror failed: {}", reason);
                self.settle_animation();
            }
            Event::MirrorData(msg) => self.apply_remote(msg),
            Event::MirrorClosed => {
                self.mirror = MirrorState::Idle;
                self.status = "Disconnected from source".to_owned();
                self.settle_animation();
            }
            Event::Tick => {
                self.tick();
            }
        }
    }

    fn refresh_hosting_status(&mut self) {
        self.status = if self.broadcaster.is_empty() {
            "No mirrors connected".to_owned()
        } else {
            format!("Hosting {} mirror(s)", self.broadcaster.len())
        };
    }

    fn has_producer(&self) -> bool {
        self.source == SourceState::Streaming || self.mirror == MirrorState::Mirroring
    }

    fn settle_animation(&mut self) {
        if !self.has_producer() {
            self.animating = false;
        }
    }

    fn on_samples(&mut self, samples: Vec<RawSample>) {
        if self.source != SourceState::Streaming {
            debug!("Dropping {} samples, source not streaming", samples.len());
            return;
        }
        if samples.is_empty() {
            return;
        }

        let channels = self.config.channels();
        for sample in samples {
            if sample.channel >= channels {
                continue;
            }
            let smoothed = self.smoother.push(sample);
            let angle = self.mapper.map(smoothed);
            self.raw.insert(smoothed.channel, smoothed.value);
            self.interpolator.set_target_angle(smoothed.channel, angle);
        }

        let msg = self.snapshot();
        self.broadcaster.broadcast(&msg);
    }

    /// The full update a mirror needs to reproduce our target pose.
    fn snapshot(&self) -> RelayMessage {
        let target = self.interpolator.target();
        RelayMessage {
            angle: Some(target.primary()),
            raw: self.raw(0),
            offset: Some(self.offset(0)),
            bends: match self.config.rig {
                RigKind::Spine(_) => Some(target.angles.clone()),
                RigKind::Finger(_) => None,
            },
        }
    }

    /// Zeroes every channel that has a reading at its latest smoothed value.
    /// Only later readings are affected.
    pub fn calibrate(&mut self) {
        let channels = self.config.channels();
        let mut zeroed = 0;
        for channel in 0..channels {
            if let Some(last) = self.smoother.last(channel) {
                self.mapper.calibrate(channel, last);
                zeroed += 1;
            }
        }
        info!("Calibrated {} channel(s)", zeroed);
        self.status = "Calibrated".to_owned();

        if self.source == SourceState::Streaming {
            self.broadcaster
                .broadcast(&RelayMessage::offset_only(self.offset(0)));
        }
    }

    /// Overwrites only the fields present in `msg`.
    fn apply_remote(&mut self, msg: RelayMessage) {
        if self.mirror == MirrorState::Idle {
            debug!("Dropping relayed update, not mirroring");
            return;
        }
        if let Some(angle) = msg.angle {
            self.interpolator.set_target_angle(0, angle);
        }
        if let Some(bends) = msg.bends {
            self.interpolator.set_target(Pose::new(bends));
        }
        if let Some(raw) = msg.raw {
            self.raw.insert(0, raw);
        }
        if let Some(offset) = msg.offset {
            self.mapper.set_offset(0, offset);
        }
        if !self.animating {
            debug!("Relayed update restarted animation");
            self.animating = true;
        }
    }

    /// Advances the rendered pose one step. Returns false, and stops the
    /// animation, once nothing is producing poses any more.
    pub fn tick(&mut self) -> bool {
        if !self.animating {
            return false;
        }
        if !self.has_producer() {
            self.animating = false;
            return false;
        }
        self.interpolator.tick();
        true
    }

    pub fn render_frame(&self) -> RenderFrame {
        let current = self.interpolator.current();
        let angle = self.model.headline_angle(current);
        RenderFrame {
            chain: self.model.chain(current),
            severity: self.config.thresholds.classify(angle),
            angle,
            raw: self.raw(0),
            offset: self.offset(0),
            status: self.status.clone(),
        }
    }

    /// Closes every mirror link.
    pub fn shutdown(&mut self) {
        self.broadcaster.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::MemoryLink;

    fn streaming(config: RigConfig) -> Session {
        let mut session = Session::new(config);
        session.handle(Event::SourceConnecting);
        session.handle(Event::SourceConnected);
        session
    }

    fn feed(session: &mut Session, values: &[i32]) {
        let samples = values.iter().map(|&v| RawSample::new(0, v)).collect();
        session.handle(Event::Samples(samples));
    }

    fn mirroring() -> Session {
        let mut session = Session::new(RigConfig::finger());
        session.handle(Event::MirrorConnecting);
        session.handle(Event::MirrorOpened("AB12".to_owned()));
        session
    }

    #[test]
    fn samples_flow_to_target() {
        let mut session = streaming(RigConfig::finger());
        feed(&mut session, &[10, 20, 30, 40, 50, 60]);

        assert_eq!(session.raw(0), Some(40));
        assert_eq!(session.target().primary(), 40.0 * 0.3);
        // Rendering lags until the clock ticks.
        assert_eq!(session.current().primary(), 0.0);
        assert!(session.tick());
        assert!(session.current().primary() > 0.0);
    }

    #[test]
    fn samples_before_connect_are_dropped() {
        let mut session = Session::new(RigConfig::finger());
        feed(&mut session, &[100]);
        assert_eq!(session.raw(0), None);
        assert!(!session.is_animating());
    }

    #[test]
    fn calibration_only_affects_later_samples() {
        let mut session = streaming(RigConfig::finger());
        feed(&mut session, &[100]);
        let before = session.target().primary();

        session.handle(Event::Calibrate);
        assert_eq!(session.offset(0), 100.0);
        assert_eq!(session.target().primary(), before);

        session.handle(Event::Calibrate);
        assert_eq!(session.offset(0), 100.0);

        feed(&mut session, &[100]);
        assert_eq!(session.target().primary(), 0.0);
    }

    #[test]
    fn calibrating_one_spine_channel_leaves_others() {
        let mut session = streaming(RigConfig::spine());
        session.handle(Event::Samples(vec![
            RawSample::new(0, 200),
            RawSample::new(1, 192),
        ]));
        let before = session.target().clone();

        session.handle(Event::Calibrate);
        session.handle(Event::Calibrate);
        assert_eq!(session.offset(0), 200.0);
        assert_eq!(session.offset(1), 192.0);
        assert_eq!(session.mapper.calibration().get(2), None);
        assert_eq!(session.target(), &before);
    }

    #[test]
    fn broadcasts_while_streaming() {
        let link = MemoryLink::open();
        let closed = MemoryLink::closed();
        let mut session = streaming(RigConfig::finger());
        session.handle(Event::PeerJoined(RelayPeer::new("M1", Box::new(link.clone()))));
        session.handle(Event::PeerJoined(RelayPeer::new("M2", Box::new(closed.clone()))));
        assert_eq!(session.mirror_count(), 2);

        feed(&mut session, &[100]);
        session.handle(Event::Calibrate);

        let updates = link.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].angle, Some(30.0));
        assert_eq!(updates[0].raw, Some(100));
        assert_eq!(updates[0].offset, Some(0.0));
        assert_eq!(updates[1], RelayMessage::offset_only(100.0));
        assert!(closed.updates().is_empty());

        session.handle(Event::PeerClosed("M1".to_owned()));
        assert_eq!(session.mirror_count(), 1);
    }

    #[test]
    fn hosting_status_follows_mirror_count() {
        let mut session = Session::new(RigConfig::finger());
        session.handle(Event::PeerJoined(RelayPeer::new("M1", Box::new(MemoryLink::open()))));
        session.handle(Event::PeerJoined(RelayPeer::new("M2", Box::new(MemoryLink::open()))));
        assert_eq!(session.status(), "Hosting 2 mirror(s)");

        session.handle(Event::PeerClosed("M1".to_owned()));
        assert_eq!(session.status(), "Hosting 1 mirror(s)");
        session.handle(Event::PeerClosed("M2".to_owned()));
        assert_eq!(session.status(), "No mirrors connected");
    }

    #[test]
    fn no_broadcast_unless_streaming() {
        let link = MemoryLink::open();
        let mut session = Session::new(RigConfig::finger());
        session.handle(Event::PeerJoined(RelayPeer::new("M1", Box::new(link.clone()))));
        session.handle(Event::Calibrate);
        feed(&mut session, &[100]);
        assert!(link.updates().is_empty());
    }

    #[test]
    fn partial_remote_update_touches_only_present_fields() {
        let mut session = mirroring();
        session.handle(Event::MirrorData(RelayMessage {
            angle: Some(40.0),
            raw: Some(250),
            offset: Some(1.0),
            bends: None,
        }));

        session.handle(Event::MirrorData(RelayMessage::offset_only(5.0)));
        assert_eq!(session.offset(0), 5.0);
        assert_eq!(session.target().primary(), 40.0);
        assert_eq!(session.raw(0), Some(250));
    }

    #[test]
    fn remote_update_restarts_animation() {
        let mut session = mirroring();
        session.animating = false;
        session.handle(Event::MirrorData(RelayMessage {
            angle: Some(10.0),
            ..Default::default()
        }));
        assert!(session.is_animating());
        assert!(session.tick());
    }

    #[test]
    fn animation_stops_without_producers() {
        let mut session = streaming(RigConfig::finger());
        assert!(session.is_animating());

        session.handle(Event::MirrorConnecting);
        session.handle(Event::MirrorOpened("X".to_owned()));
        session.handle(Event::SourceClosed);
        assert_eq!(session.source_state(), SourceState::Idle);
        assert!(session.is_animating());

        session.handle(Event::MirrorClosed);
        assert_eq!(session.mirror_state(), MirrorState::Idle);
        assert!(!session.is_animating());
        assert!(!session.tick());
    }

    #[test]
    fn failure_returns_to_idle_with_status() {
        let mut session = Session::new(RigConfig::finger());
        session.handle(Event::SourceConnecting);
        assert_eq!(session.source_state(), SourceState::Connecting);

        session.handle(Event::SourceFailed("permission denied".to_owned()));
        assert_eq!(session.source_state(), SourceState::Idle);
        assert!(session.status().contains("permission denied"));
        assert!(!session.is_animating());
    }

    #[test]
    fn spine_snapshot_carries_bends() {
        let link = MemoryLink::open();
        let mut session = streaming(RigConfig::spine());
        session.handle(Event::PeerJoined(RelayPeer::new("M1", Box::new(link.clone()))));
        session.handle(Event::Samples(
            (0..5).map(|c| RawSample::new(c, 192)).collect(),
        ));

        let update = link.updates().pop().unwrap();
        assert_eq!(update.bends, Some(vec![30.0; 5]));

        let frame = session.render_frame();
        assert_eq!(frame.chain.len(), 6);
    }

    #[test]
    fn render_frame_reflects_current_pose() {
        let mut session = streaming(RigConfig::finger());
        feed(&mut session, &[300]);
        for _ in 0..200 {
            session.handle(Event::Tick);
        }
        let frame = session.render_frame();
        assert!((frame.angle - 90.0).abs() < 1e-6);
        assert_eq!(frame.severity, Severity::Danger);
        assert_eq!(frame.raw, Some(300));
        assert_eq!(frame.chain.len(), 4);
    }
}
