use std::collections::VecDeque;

use ratatui::layout::{Constraint, Direction, Layout, Margin};
use ratatui::prelude::Rect;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

use tracon_runtime::{Aircraft, World, WorldUpdate};

pub struct UiState {
    pub position: String,
    pub world: World,
    pub latest: Option<WorldUpdate>,
    pub logs: VecDeque<String>,
    pub max_logs: usize,
    pub input: String,
}

impl UiState {
    pub fn new(position: String, world: World) -> Self {
        Self {
            position,
            world,
            latest: None,
            logs: VecDeque::new(),
            max_logs: 8,
            input: String::new(),
        }
    }

    pub fn push_update(&mut self, update: WorldUpdate) {
        self.latest = Some(update);
    }

    pub fn push_log<S: Into<String>>(&mut self, line: S) {
        let mut text: String = line.into();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        if text.is_empty() {
            return;
        }
        self.logs.push_front(text);
        while self.logs.len() > self.max_logs {
            self.logs.pop_back();
        }
    }
}

pub fn draw_ui(frame: &mut Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(10),
            Constraint::Length(3),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], state);
    draw_traffic(frame, chunks[1], state);
    draw_logs(frame, chunks[2], state);
    draw_input(frame, chunks[3], state);
}

fn inner(area: Rect) -> Rect {
    area.inner(&Margin {
        vertical: 1,
        horizontal: 1,
    })
}

fn draw_header(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("TRACON Scope");
    let mut spans = vec![Span::styled(
        state.position.clone(),
        Style::default().fg(Color::Green),
    )];
    if let Some(update) = &state.latest {
        let status = if update.paused {
            Span::styled(" PAUSED", Style::default().fg(Color::Red))
        } else {
            Span::raw(format!(" x{:.1}", update.sim_rate))
        };
        spans.push(Span::raw(format!(" | t+{:>6.0}s", update.sim_time_secs)));
        spans.push(status);
        spans.push(Span::raw(format!(
            " | positions {}",
            update
                .controllers
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        )));
        if let Some(controller) = &update.launch_controller {
            spans.push(Span::raw(format!(" | launch {controller}")));
        }
    }
    spans.push(Span::raw(" | Esc to exit"));
    let text = Paragraph::new(Line::from(spans)).wrap(Wrap { trim: true });
    frame.render_widget(block, area);
    frame.render_widget(text, inner(area));
}

fn draw_traffic(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Traffic");
    let lines: Vec<Line> = match &state.latest {
        Some(update) => update.aircraft.values().map(traffic_line).collect(),
        None => vec![Line::from(Span::raw("waiting for first update"))],
    };
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(paragraph, inner(area));
}

fn traffic_line(aircraft: &Aircraft) -> Line<'static> {
    let owner = aircraft.tracking_controller.as_deref().unwrap_or("-");
    let mut spans = vec![
        Span::styled(
            format!("{:<8}", aircraft.callsign),
            Style::default().fg(Color::Yellow),
        ),
        Span::raw(format!(" {:<5}", aircraft.aircraft_type)),
        Span::styled(
            format!(" {:>3}", (aircraft.altitude / 100.0).round() as i32),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(format!(" {:>3.0}", aircraft.heading)),
        Span::raw(format!(" {:>3.0}kt", aircraft.ias)),
        Span::styled(format!(" {owner:<8}"), Style::default().fg(Color::Magenta)),
    ];
    if let Some(target) = &aircraft.handoff_target {
        spans.push(Span::styled(
            format!(" HO>{target}"),
            Style::default().fg(Color::Red),
        ));
    }
    if let Some(target) = &aircraft.point_out_target {
        spans.push(Span::raw(format!(" PO>{target}")));
    }
    if !aircraft.scratchpad.is_empty() {
        spans.push(Span::raw(format!(" [{}]", aircraft.scratchpad)));
    }
    if let Some(approach) = &aircraft.nav.cleared_approach {
        spans.push(Span::raw(format!(" cleared {}", approach.approach)));
    }
    Line::from(spans)
}

fn draw_logs(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Logs");
    let lines: Vec<Line> = state
        .logs
        .iter()
        .map(|entry| Line::from(Span::raw(entry)))
        .collect();
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(paragraph, inner(area));
}

fn draw_input(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("CALLSIGN shorthand | /pause /rate /track /ho /accept /control /pos /save /q");
    let line = Line::from(vec![
        Span::styled("> ", Style::default().fg(Color::Green)),
        Span::raw(state.input.as_str()),
    ]);
    frame.render_widget(block, area);
    frame.render_widget(Paragraph::new(line), inner(area));
}
