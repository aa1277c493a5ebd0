use crate::app::{App, InputMode};
use crate::input::SearchInput;
use chrono::Utc;
use connview::constants::{
    HELP_POPUP_HEIGHT, HELP_POPUP_WIDTH, INPUT_FIELD_HEIGHT, STATUS_BAR_HEIGHT, TABLE_HEADER_HEIGHT,
};
use connview::core::format::{connection_age_secs, format_age};
use connview::core::{
    format_bytes, format_connection_age, format_speed, EnrichedRecord, ListView, RuleEntry, SortOrder,
    Tab,
};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table},
    Frame,
};

/// Rows available to the table body for a terminal of `height` lines.
pub fn table_rows_for(height: u16) -> u16 {
    height
        .saturating_sub(INPUT_FIELD_HEIGHT)
        .saturating_sub(STATUS_BAR_HEIGHT)
        .saturating_sub(TABLE_HEADER_HEIGHT)
        .saturating_sub(2)
}

pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(INPUT_FIELD_HEIGHT),
            Constraint::Min(1),
            Constraint::Length(STATUS_BAR_HEIGHT),
        ])
        .split(frame.area());

    draw_search_input(frame, app, chunks[0]);
    match app.dashboard.tab() {
        Tab::Connections => draw_connections(frame, app, chunks[1]),
        Tab::Rules => draw_rules(frame, app, chunks[1]),
    }
    draw_status_bar(frame, app, chunks[2]);

    if app.input_mode == InputMode::Search {
        draw_help_popup(frame);
    }
}

fn draw_search_input(frame: &mut Frame, app: &App, area: Rect) {
    let active = app.input_mode == InputMode::Search;
    let style = if active {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    let text = if active {
        app.search.text().to_string()
    } else {
        current_query(app).to_string()
    };
    let title = match app.dashboard.tab() {
        Tab::Connections => " Search connections (/) ",
        Tab::Rules => " Search rules (/) ",
    };

    let widget = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(style),
        )
        .style(style);
    frame.render_widget(widget, area);

    if active {
        set_cursor(frame, &app.search, area);
    }
}

fn set_cursor(frame: &mut Frame, input: &SearchInput, area: Rect) {
    frame.set_cursor_position((area.x + input.cursor() as u16 + 1, area.y + 1));
}

fn current_query(app: &App) -> &str {
    match app.dashboard.tab() {
        Tab::Connections => app.dashboard.connections().query(),
        Tab::Rules => app.dashboard.rules().query(),
    }
}

/// Collects the rows that fall inside the viewport. Overscan rows are
/// computed by the window but a terminal has nowhere to put them.
fn visible<'a, T>(view: &ListView, items: &'a [T], viewport: f64) -> Vec<(usize, &'a T)> {
    let top = view.scroll_offset();
    let bottom = top + viewport;
    let mut out = Vec::new();
    view.render(items, |slot| {
        if slot.pixel_offset + slot.height > top && slot.pixel_offset < bottom {
            out.push((slot.index, slot.record));
        }
    });
    out
}

fn header(labels: &[&'static str]) -> Row<'static> {
    Row::new(labels.iter().map(|l| Cell::from(*l)))
        .style(Style::default().add_modifier(Modifier::BOLD).fg(Color::Cyan))
}

fn draw_empty(frame: &mut Frame, area: Rect, block: Block, message: &str) {
    let para = Paragraph::new(Line::from(message.to_string()))
        .style(Style::default().fg(Color::DarkGray))
        .block(block);
    frame.render_widget(para, area);
}

fn draw_connections(frame: &mut Frame, app: &App, area: Rect) {
    let pane = app.dashboard.connections();
    let state = pane.view().reveal_state();
    let title = format!(
        " Connections [{}/{}{}] ",
        state.revealed_count,
        state.total_count,
        if state.is_revealing { " …" } else { "" }
    );
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(Color::Cyan));

    if pane.rows().is_empty() {
        let message = if pane.last_update().is_none() {
            "Waiting for data..."
        } else {
            "No connections match"
        };
        draw_empty(frame, area, block, message);
        return;
    }

    let viewport = area.height.saturating_sub(2 + TABLE_HEADER_HEIGHT) as f64;
    let now = Utc::now();
    let rows: Vec<Row> = visible(pane.view(), pane.rows(), viewport)
        .into_iter()
        .map(|(_, record)| connection_row(record, now))
        .collect();

    let widths = [
        Constraint::Min(24),
        Constraint::Length(5),
        Constraint::Length(10),
        Constraint::Length(14),
        Constraint::Length(16),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(11),
        Constraint::Length(11),
        Constraint::Length(5),
    ];
    let table = Table::new(rows, widths)
        .header(header(&[
            "Host", "Net", "Type", "Chain", "Rule", "Up", "Down", "Up/s", "Down/s", "Age",
        ]))
        .block(block);
    frame.render_widget(table, area);
}

fn connection_row(record: &EnrichedRecord, now: chrono::DateTime<Utc>) -> Row<'static> {
    let conn = &record.conn;
    let host = if conn.metadata.destination_port.is_empty() {
        conn.metadata.display_host().to_string()
    } else {
        format!("{}:{}", conn.metadata.display_host(), conn.metadata.destination_port)
    };
    let age = match (record.closed_at, conn.started_at()) {
        (Some(closed), Some(start)) => format_age(connection_age_secs(start, closed)),
        _ => format_connection_age(conn.started_at(), now),
    };
    let style = if record.closed {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };
    Row::new(vec![
        Cell::from(host),
        Cell::from(conn.metadata.network.as_str().to_string()),
        Cell::from(conn.metadata.conn_type.clone()),
        Cell::from(conn.outbound().to_string()),
        Cell::from(if conn.rule_payload.is_empty() {
            conn.rule.clone()
        } else {
            format!("{}({})", conn.rule, conn.rule_payload)
        }),
        Cell::from(format_bytes(conn.upload)),
        Cell::from(format_bytes(conn.download)),
        Cell::from(format_speed(record.upload_speed)),
        Cell::from(format_speed(record.download_speed)),
        Cell::from(age),
    ])
    .style(style)
}

fn draw_rules(frame: &mut Frame, app: &App, area: Rect) {
    let pane = app.dashboard.rules();
    let state = pane.view().reveal_state();
    let title = format!(
        " Rules {} / Providers {} [{}/{}] ",
        pane.rule_count(),
        pane.provider_count(),
        state.revealed_count,
        state.total_count
    );
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(Color::Cyan));

    if pane.rows().is_empty() {
        let message = if pane.rule_count() + pane.provider_count() == 0 {
            "No rules received yet"
        } else {
            "No rules match"
        };
        draw_empty(frame, area, block, message);
        return;
    }

    let viewport = area.height.saturating_sub(2 + TABLE_HEADER_HEIGHT) as f64;
    let rows: Vec<Row> = visible(pane.view(), pane.rows(), viewport)
        .into_iter()
        .map(|(_, entry)| rule_row(entry))
        .collect();
    let widths = [
        Constraint::Length(18),
        Constraint::Min(30),
        Constraint::Length(20),
        Constraint::Length(10),
    ];
    let table = Table::new(rows, widths)
        .header(header(&["Type", "Payload", "Proxy", "Size"]))
        .block(block);
    frame.render_widget(table, area);
}

fn rule_row(entry: &RuleEntry) -> Row<'static> {
    match entry {
        RuleEntry::Rule(rule) => Row::new(vec![
            Cell::from(rule.rule_type.clone()),
            Cell::from(rule.payload.clone()),
            Cell::from(rule.proxy.clone()),
            Cell::from(rule.size.map(|s| s.to_string()).unwrap_or_default()),
        ]),
        RuleEntry::Provider(provider) => Row::new(vec![
            Cell::from(format!("provider/{}", provider.behavior)),
            Cell::from(provider.name.clone()),
            Cell::from(provider.vehicle_type.clone()),
            Cell::from(provider.rule_count.to_string()),
        ])
        .style(Style::default().fg(Color::Magenta)),
    }
}

fn draw_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let status = if let Some(msg) = &app.status_message {
        msg.clone()
    } else {
        let pane = app.dashboard.connections();
        let t = pane.throughput();
        let options = pane.options();
        let last = pane
            .last_update()
            .map(|at| format!(" | Last: {}", format_connection_age(Some(at), Utc::now())))
            .unwrap_or_default();
        format!(
            "{} | ↑{} ↓{} ({} / {}) | {} active {} closed | n:{} s:{} o:{}{} | / Tab q{}",
            app.source_label,
            format_speed(t.upload_speed),
            format_speed(t.download_speed),
            format_bytes(t.upload_total),
            format_bytes(t.download_total),
            pane.active_count(),
            pane.closed_count(),
            options.network.label(),
            options.status.label(),
            options.sort.key.label(),
            match options.sort.order {
                SortOrder::Asc => "↑",
                SortOrder::Desc => "↓",
            },
            last
        )
    };

    let paragraph =
        Paragraph::new(status).style(Style::default().fg(Color::White).bg(Color::Blue));
    frame.render_widget(paragraph, area);
}

fn draw_help_popup(frame: &mut Frame) {
    let area = frame.area();
    let popup_area = Rect {
        x: area.width.saturating_sub(HELP_POPUP_WIDTH).max(area.x),
        y: area.y,
        width: HELP_POPUP_WIDTH.min(area.width),
        height: HELP_POPUP_HEIGHT.min(area.height),
    };

    let help_text = vec![
        Line::from("Enter/Esc: Done | Ctrl-W: Word | Ctrl-U: Clear"),
        Line::from("Syntax: field:value field:\"exact\" words"),
        Line::from("Fields: host ip port network type rule chain"),
        Line::from("        process payload proxy"),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Help ")
                .border_style(Style::default().fg(Color::Green)),
        )
        .style(Style::default().bg(Color::Black));

    frame.render_widget(Clear, popup_area);
    frame.render_widget(help, popup_area);
}
