use std::{io, time::Duration};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Line as CanvasLine},
        Block, BorderType, Borders, Cell, Paragraph, Row, Table,
    },
    Frame, Terminal,
};
use tracing::error;

use crate::app::{App, Status};
use crate::util::{axis_max, axis_min, format_interval, format_rate};
use crate::worker::PollWorker;

// Upper bound on how long we block waiting for a key.
const INPUT_POLL_MS: u64 = 100;

pub fn run(worker: &PollWorker, app: App, agent: &str) -> io::Result<()> {
    // Initialize terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app_loop(&mut terminal, app, worker, agent);

    // Cleanup
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = &res {
        error!(error = %err, "dashboard loop failed");
    }
    res
}

fn run_app_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    worker: &PollWorker,
    agent: &str,
) -> io::Result<()> {
    loop {
        app.on_tick(worker.shared());

        terminal.draw(|f| draw(f, &app, agent))?;

        // Handle input
        if event::poll(Duration::from_millis(INPUT_POLL_MS))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Right | KeyCode::Tab => app.next_interface(),
                    KeyCode::Left | KeyCode::BackTab => app.previous_interface(),
                    KeyCode::Char('u') => app.toggle_unit(),
                    KeyCode::Char('+') => app.slower_refresh(),
                    KeyCode::Char('-') => app.faster_refresh(),
                    _ => {}
                }
            }
        }
    }
}

fn draw(f: &mut Frame, app: &App, agent: &str) {
    // ============= whole screen layout ============
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(0)
        .constraints([
            Constraint::Length(16), // Upside Net Box
            Constraint::Min(6),     // Interface Table
            Constraint::Length(1),  // Bottom Status Bar
        ].as_ref())
        .split(f.size());

    // ============= Top Net Monitor Box ============
    let net_block = Block::default()
        .borders(Borders::ALL)
        .title(format!(
            " SNMP [{}] {} (if {}) every {} ",
            agent,
            app.interface_name(),
            app.interface,
            format_interval(app.interval.as_millis())
        ))
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Cyan));
    f.render_widget(net_block.clone(), main_chunks[0]);

    let inner_area = net_block.inner(main_chunks[0]);
    let graph_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(75), Constraint::Percentage(25)].as_ref())
        .split(inner_area);

    // ======== Left Graphs (Rx/Tx) ========
    let chart_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(graph_chunks[0]);

    draw_history(f, chart_chunks[0], &format!(" Rx ({}) ", app.unit), app.rx_history.iter().copied().collect(), Color::Red);
    draw_history(f, chart_chunks[1], &format!(" Tx ({}) ", app.unit), app.tx_history.iter().copied().collect(), Color::Blue);

    // textual stats on the right
    let text_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(graph_chunks[1]);

    let (current_rx, current_tx) = match &app.last_rates {
        Some(r) => (format_rate(r.rx, app.unit), format_rate(r.tx, app.unit)),
        None => ("-".to_string(), "-".to_string()),
    };
    let peak = |record: Option<(f64, chrono::DateTime<chrono::Local>)>| {
        record
            .map(|(v, at)| format!("{} @{}", format_rate(v, app.unit), at.format("%H:%M:%S")))
            .unwrap_or_else(|| "-".to_string())
    };

    let rx_text = vec![
        Line::from(vec![Span::raw("▼ "), Span::styled(current_rx, Style::default().fg(Color::White).add_modifier(Modifier::BOLD))]),
        Line::from(vec![Span::styled("  Peak: ", Style::default().fg(Color::DarkGray)), Span::raw(peak(app.peak_rx_record))]),
    ];
    f.render_widget(Paragraph::new(rx_text).block(Block::default().style(Style::default().fg(Color::Red))), text_chunks[0]);

    let mut tx_text = vec![
        Line::from(vec![Span::raw("▲ "), Span::styled(current_tx, Style::default().fg(Color::White).add_modifier(Modifier::BOLD))]),
        Line::from(vec![Span::styled("  Peak: ", Style::default().fg(Color::DarkGray)), Span::raw(peak(app.peak_tx_record))]),
    ];
    if let Some(last) = &app.last_rates {
        tx_text.push(Line::from(Span::styled(
            format!("  Updated: {}", last.at.format("%H:%M:%S")),
            Style::default().fg(Color::DarkGray),
        )));
    }
    f.render_widget(Paragraph::new(tx_text).block(Block::default().style(Style::default().fg(Color::Blue))), text_chunks[1]);

    // ============= Interface Table ============
    let header_cells = ["", "ifIndex", "Name"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::Rgb(40, 40, 40)))
        .height(1)
        .bottom_margin(0);

    let rows = app.interfaces.iter().map(|iface| {
        let selected = iface.index == app.interface;
        let style = if selected {
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        Row::new(vec![
            Cell::from(if selected { "▶" } else { " " }),
            Cell::from(iface.index.to_string()),
            Cell::from(iface.name.clone()),
        ])
        .style(style)
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(8),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(Block::default().title(" Interfaces ").borders(Borders::ALL).border_type(BorderType::Rounded));
    f.render_widget(table, main_chunks[1]);

    // ============ Bottom Status Bar ============
    let (status_text, status_style) = match &app.status {
        Status::Info(msg) => (msg.as_str(), Style::default().fg(Color::Gray)),
        Status::Error(msg) => (msg.as_str(), Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
    };
    let status_content = Line::from(vec![
        Span::styled(format!(" {} ", app.unit), Style::default().bg(Color::White).fg(Color::Black).add_modifier(Modifier::BOLD)),
        Span::raw(" "),
        Span::styled(status_text.to_string(), status_style),
        Span::raw(" | ←/→ interface  u unit  +/- refresh  q quit"),
    ]);

    let status_bar = Paragraph::new(status_content)
        .style(Style::default().bg(Color::Rgb(20, 20, 20)));
    f.render_widget(status_bar, main_chunks[2]);
}

fn draw_history(f: &mut Frame, area: Rect, title: &str, values: Vec<f64>, color: Color) {
    let y_max = axis_max(values.iter().copied());
    let y_min = axis_min(values.iter().copied());
    let x_limit = crate::constants::MAX_DATA_POINTS as f64;

    let canvas = Canvas::default()
        .block(Block::default().title(title.to_string()).title_style(Style::default().fg(color)))
        .marker(Marker::Braille)
        .x_bounds([0.0, x_limit])
        .y_bounds([y_min, y_max])
        .paint(|ctx| {
            for (i, val) in values.iter().enumerate() {
                ctx.draw(&CanvasLine {
                    x1: i as f64,
                    y1: 0.0,
                    x2: i as f64,
                    y2: *val,
                    color,
                });
            }
        });
    f.render_widget(canvas, area);
}
