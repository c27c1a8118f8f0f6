//! Drives the pose view from a local sensor or from a remote source.

use clap::Parser;
use crossterm::event::KeyCode;
use flexmirror::{
    args::{CommandTask, MirrorArgs, MirrorCommand, SourceCommand},
    config::{RigConfig, RigKind},
    dummy_source::{DummySource, Sweep},
    gui::{device_selector, PoseView, RenderSurface},
    relay::{canonical_code, tcp::spawn_mirror, tcp::RelayHost, LocalRegistry},
    serial_source::{available_ports, SerialSource},
    session::{Event, Session, SourceState},
    telemetry::TelemetrySource,
};
use log::info;
use std::{
    error::Error,
    sync::mpsc::{self, Receiver, Sender},
    time::{Duration, Instant},
};

// Example:
// cargo run -- --rig finger source --port /dev/ttyACM0 --listen 0.0.0.0:7878
// cargo run -- mirror --connect 192.168.1.20:7878 --code 7KQ2

enum Control {
    Continue,
    Quit,
}

fn main() {
    env_logger::init();
    let args = MirrorArgs::parse();

    if let Err(e) = run(args) {
        eprintln!("flexmirror: {}", e);
        std::process::exit(1);
    }
}

fn run(args: MirrorArgs) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => RigConfig::load(path)?,
        None => args.rig.config(),
    };
    let frame_period = Duration::from_secs_f64(1.0 / args.fps);
    let (tx, rx) = mpsc::channel::<Event>();
    let session = Session::new(config);

    match args.command {
        CommandTask::Source(cmd) => run_source(cmd, session, tx, rx, frame_period),
        CommandTask::Mirror(cmd) => run_mirror(cmd, session, tx, rx, frame_period),
    }
}

fn open_source(
    cmd: &SourceCommand,
    config: &RigConfig,
) -> Result<Option<Box<dyn TelemetrySource>>, Box<dyn Error>> {
    if cmd.dummy {
        let sweep = match config.rig {
            RigKind::Finger(_) => Sweep::finger(),
            RigKind::Spine(_) => Sweep::spine(),
        };
        return Ok(Some(Box::new(DummySource::new(sweep, config.channels()))));
    }

    let device = match &cmd.port {
        Some(port) => port.clone(),
        None => match device_selector(available_ports()?)? {
            Some(port) => port,
            None => return Ok(None),
        },
    };
    Ok(Some(Box::new(SerialSource::new(device, cmd.baud, cmd.format))))
}

fn connect(session: &mut Session, source: &mut dyn TelemetrySource, tx: &Sender<Event>) {
    session.handle(Event::SourceConnecting);
    match source.start(tx.clone()) {
        Ok(()) => session.handle(Event::SourceConnected),
        Err(e) => session.handle(Event::SourceFailed(e.to_string())),
    }
}

fn run_source(
    cmd: SourceCommand,
    mut session: Session,
    tx: Sender<Event>,
    rx: Receiver<Event>,
    frame_period: Duration,
) -> Result<(), Box<dyn Error>> {
    let mut source = match open_source(&cmd, session.config())? {
        Some(source) => source,
        None => return Ok(()),
    };

    let mut host = match &cmd.listen {
        Some(addr) => Some(RelayHost::bind(addr.as_str(), LocalRegistry::new(), tx.clone())?),
        None => None,
    };
    let mut hint = String::from("c calibrate  d connect/disconnect  q quit");
    if let Some(host) = &host {
        hint = format!("{}  |  mirror code {} on {}", hint, host.code(), host.local_addr());
    }

    connect(&mut session, source.as_mut(), &tx);
    let mut view = PoseView::new(hint)?;

    let res = event_loop(&mut session, &rx, &mut view, frame_period, |key, session| {
        match key {
            KeyCode::Char('d') => {
                if session.source_state() == SourceState::Idle {
                    connect(session, source.as_mut(), &tx);
                } else {
                    source.stop();
                    session.handle(Event::SourceClosed);
                }
            }
            KeyCode::Char('c') => session.handle(Event::Calibrate),
            KeyCode::Char('q') | KeyCode::Esc => return Control::Quit,
            _ => {}
        }
        Control::Continue
    });

    source.stop();
    session.shutdown();
    if let Some(host) = host.as_mut() {
        host.stop();
    }
    res
}

fn run_mirror(
    cmd: MirrorCommand,
    mut session: Session,
    tx: Sender<Event>,
    rx: Receiver<Event>,
    frame_period: Duration,
) -> Result<(), Box<dyn Error>> {
    let code = canonical_code(&cmd.code);
    session.handle(Event::MirrorConnecting);
    let handle = spawn_mirror(cmd.connect.clone(), code.clone(), tx);

    let mut view = PoseView::new(format!("mirroring {} at {}  |  q quit", code, cmd.connect))?;
    let res = event_loop(&mut session, &rx, &mut view, frame_period, |key, _| match key {
        KeyCode::Char('q') | KeyCode::Esc => Control::Quit,
        _ => Control::Continue,
    });

    handle.close();
    res
}

/// The single control loop. Each pass drains pending events in arrival order,
/// ticks the animation clock once, redraws, and handles at most one key.
fn event_loop<F>(
    session: &mut Session,
    rx: &Receiver<Event>,
    view: &mut PoseView,
    frame_period: Duration,
    mut on_key: F,
) -> Result<(), Box<dyn Error>>
where
    F: FnMut(KeyCode, &mut Session) -> Control,
{
    loop {
        let frame_start = Instant::now();

        while let Ok(event) = rx.try_recv() {
            session.handle(event);
        }
        session.handle(Event::Tick);
        view.render(&session.render_frame())?;

        let remaining = frame_period.saturating_sub(frame_start.elapsed());
        if let Some(key) = view.poll_key(remaining)? {
            if let Control::Quit = on_key(key, session) {
                info!("Quitting");
                return Ok(());
            }
        }
        spin_sleep::sleep(frame_period.saturating_sub(frame_start.elapsed()));
    }
}
