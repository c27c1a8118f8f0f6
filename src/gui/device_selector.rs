use std::{io::stdout, path::PathBuf, time::Duration};

use crate::gui::error::GuiError;

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

/// Where the cursor lands after `key`, or `None` if the key does not move it.
fn move_cursor(cursor: usize, n_ports: usize, key: KeyCode) -> Option<usize> {
    match key {
        KeyCode::Down => Some((cursor + 1) % n_ports),
        KeyCode::Up => Some((cursor + n_ports - 1) % n_ports),
        _ => None,
    }
}

fn selector_list(ports: &[PathBuf]) -> List<'static> {
    let title = Title::from(" Select Sensor Port ".magenta().bold());
    let instructions = Title::from(Line::from(vec![
        " Navigate ".into(),
        "<Up>/<Down>".magenta().bold(),
        " Select ".into(),
        "<Enter>".magenta().bold(),
        " Quit ".into(),
        "<Q> ".magenta().bold(),
    ]));
    let block = Block::default()
        .title(title.alignment(Alignment::Center))
        .title(
            instructions
                .alignment(Alignment::Center)
                .position(Position::Bottom),
        )
        .borders(Borders::ALL);
    let port_names: Vec<String> = ports
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    List::new(port_names)
        .style(Style::default().fg(Color::White))
        .highlight_symbol(">>")
        .highlight_style(Style::default().fg(Color::Magenta))
        .block(block)
}

/// Lets the user pick one of `available_ports`. `Ok(None)` means they quit.
pub fn device_selector(mut available_ports: Vec<PathBuf>) -> Result<Option<PathBuf>, GuiError> {
    if available_ports.is_empty() {
        return Err(GuiError::NoDevices);
    }

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let res = run_selector(&available_ports);
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(res?.map(|i| available_ports.swap_remove(i)))
}

fn run_selector(ports: &[PathBuf]) -> Result<Option<usize>, GuiError> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let n_ports = ports.len();
    let mut cursor = 0;
    let mut list_state = ListState::default().with_selected(Some(cursor));
    loop {
        list_state.select(Some(cursor));
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_stateful_widget(selector_list(ports), area, &mut list_state);
        })?;

        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Enter => return Ok(Some(cursor)),
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(None),
                    code => {
                        if let Some(next) = move_cursor(cursor, n_ports, code) {
                            cursor = next;
                        }
                    }
                }
            }
        }
    }
}
