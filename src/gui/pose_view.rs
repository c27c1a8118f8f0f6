//! The terminal render surface: draws the joint chain and a readout.

use std::{
    io::{stdout, Stdout},
    time::Duration,
};

use crate::gui::error::GuiError;
use crate::kinematics::{JointChain, Severity};
use crate::session::RenderFrame;

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use log::warn;
use ratatui::{
    prelude::*,
    widgets::{
        block::Title,
        canvas::{Canvas, Circle, Line as CanvasLine},
        *,
    },
};

/// Anything that can show a [RenderFrame].
pub trait RenderSurface {
    fn render(&mut self, frame: &RenderFrame) -> Result<(), GuiError>;
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Nominal => Color::Cyan,
        Severity::Warning => Color::Yellow,
        Severity::Danger => Color::Red,
    }
}

/// Half-width of a square view that holds the chain however it curls.
fn view_extent(chain: &JointChain) -> f64 {
    let reach: f64 = chain
        .windows(2)
        .map(|w| w[0].position.abs_dist(&w[1].position))
        .sum();
    (reach * 1.1).max(1.0)
}

/// Lays out one frame: the figure on top, the readout below.
pub fn draw_pose(f: &mut Frame, render: &RenderFrame, hint: &str) {
    let areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(4)])
        .split(f.size());

    let color = severity_color(render.severity);
    let extent = view_extent(&render.chain);
    let chain = &render.chain;

    let canvas = Canvas::default()
        .block(
            Block::default()
                .title(Title::from(" FlexMirror ".magenta().bold()).alignment(Alignment::Center))
                .borders(Borders::ALL),
        )
        .marker(symbols::Marker::Braille)
        .x_bounds([-extent, extent])
        .y_bounds([-extent, extent])
        .paint(move |ctx| {
            for w in chain.windows(2) {
                ctx.draw(&CanvasLine {
                    x1: w[0].position.x,
                    y1: w[0].position.y,
                    x2: w[1].position.x,
                    y2: w[1].position.y,
                    color,
                });
            }
            for joint in chain.iter() {
                ctx.draw(&Circle {
                    x: joint.position.x,
                    y: joint.position.y,
                    radius: extent * 0.03,
                    color: Color::White,
                });
            }
        });
    f.render_widget(canvas, areas[0]);

    let raw = render
        .raw
        .map_or_else(|| "-".to_owned(), |r| r.to_string());
    let readout = Paragraph::new(vec![
        Line::from(vec![
            " Raw ".into(),
            raw.bold(),
            "  Offset ".into(),
            format!("{:.0}", render.offset).bold(),
            "  Angle ".into(),
            format!("{:.1}°", render.angle).fg(color).bold(),
        ]),
        Line::from(vec![" ".into(), render.status.clone().italic()]),
        Line::from(vec![" ".into(), hint.to_owned().dark_gray()]),
    ])
    .block(Block::default().borders(Borders::TOP));
    f.render_widget(readout, areas[1]);
}

/// Full-screen terminal view. Restores the terminal when dropped.
pub struct PoseView {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    hint: String,
}

impl PoseView {
    pub fn new(hint: impl Into<String>) -> Result<Self, GuiError> {
        enable_raw_mode()?;
        stdout().execute(EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
        terminal.clear()?;
        Ok(Self {
            terminal,
            hint: hint.into(),
        })
    }

    /// Waits up to `timeout` for a key press.
    pub fn poll_key(&self, timeout: Duration) -> Result<Option<KeyCode>, GuiError> {
        if event::poll(timeout)? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(Some(key.code));
                }
            }
        }
        Ok(None)
    }
}

impl RenderSurface for PoseView {
    fn render(&mut self, frame: &RenderFrame) -> Result<(), GuiError> {
        let hint = &self.hint;
        self.terminal.draw(|f| draw_pose(f, frame, hint))?;
        Ok(())
    }
}

impl Drop for PoseView {
    fn drop(&mut self) {
        let restored = disable_raw_mode()
            .and_then(|_| stdout().execute(LeaveAlternateScreen).map(|_| ()))
            .and_then(|_| self.terminal.show_cursor());
        if let Err(e) = restored {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use crate::session::{Event, Session};
    use crate::telemetry::RawSample;
    use ratatui::backend::TestBackend;

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn draws_readout() {
        let mut session = Session::new(RigConfig::finger());
        session.handle(Event::SourceConnected);
        session.handle(Event::Samples(vec![RawSample::new(0, 120)]));
        for _ in 0..5 {
            session.handle(Event::Tick);
        }

        let mut terminal = Terminal::new(TestBackend::new(60, 24)).unwrap();
        let frame = session.render_frame();
        terminal
            .draw(|f| draw_pose(f, &frame, "c calibrate"))
            .unwrap();

        let text = screen_text(&terminal);
        assert!(text.contains("Raw"));
        assert!(text.contains("120"));
        assert!(text.contains("Connected"));
        assert!(text.contains("c calibrate"));
    }

    #[test]
    fn extent_covers_chain() {
        let chain = RigConfig::spine();
        let session = Session::new(chain);
        let frame = session.render_frame();
        assert!(view_extent(&frame.chain) >= 250.0);
        assert_eq!(view_extent(&Vec::new()), 1.0);
    }

    #[test]
    fn colors_follow_severity() {
        assert_eq!(severity_color(Severity::Nominal), Color::Cyan);
        assert_eq!(severity_color(Severity::Danger), Color::Red);
    }
}
