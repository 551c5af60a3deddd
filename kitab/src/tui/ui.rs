use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;

use crate::client::citation::numbered_markers;
use crate::models::Source;

use super::app::{App, Phase};

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub fn render(frame: &mut Frame, app: &App) {
    let [header, body, status, input] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(3),
        Constraint::Length(1),
        Constraint::Length(3),
    ])
    .areas(frame.area());

    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled("kitab", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  ask questions about the books"),
        ])),
        header,
    );

    render_conversation(frame, app, body);
    render_status(frame, app, status);
    render_input(frame, app, input);

    if let Some(selected) = app.viewer {
        if let Some(source) = app.sources().get(selected) {
            render_source(frame, source, selected, app.sources().len());
        }
    }
}

fn render_conversation(frame: &mut Frame, app: &App, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();

    for turn in app.conversation.turns() {
        push_question(&mut lines, &turn.question);
        push_answer(&mut lines, &turn.answer);
        if !turn.sources.is_empty() {
            lines.push(sources_line(&turn.sources));
        }
        lines.push(Line::default());
    }

    if let Some(pending) = app.pending() {
        push_question(&mut lines, &pending.question);
        let answer = pending.parser.answer();
        if !answer.is_empty() {
            push_answer(&mut lines, answer);
        }
    }

    let inner_width = area.width.saturating_sub(2).max(1) as usize;
    let rows: usize = lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(inner_width))
        .sum();
    let visible = area.height.saturating_sub(2) as usize;
    let scroll = rows.saturating_sub(visible).min(u16::MAX as usize) as u16;

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Conversation"))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    frame.render_widget(paragraph, area);
}

fn push_question(lines: &mut Vec<Line<'static>>, question: &str) {
    lines.push(Line::from(vec![
        Span::styled(
            "You: ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(question.to_string()),
    ]));
}

fn push_answer(lines: &mut Vec<Line<'static>>, answer: &str) {
    for line in numbered_markers(answer).lines() {
        lines.push(Line::raw(line.to_string()));
    }
}

fn sources_line(sources: &[Source]) -> Line<'static> {
    let mut spans = vec![Span::styled(
        "Sources: ",
        Style::default().fg(Color::DarkGray),
    )];
    for (i, source) in sources.iter().enumerate() {
        spans.push(Span::styled(
            format!("[{}] {}  ", i + 1, source.label()),
            Style::default().fg(Color::DarkGray),
        ));
    }
    Line::from(spans)
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
    let line = if let Some(pending) = app.pending() {
        let color = match pending.phase {
            Phase::Searching => Color::Yellow,
            Phase::Streaming => Color::Green,
        };
        Line::from(vec![
            Span::styled(
                format!("{} ", SPINNER[app.spinner % SPINNER.len()]),
                Style::default().fg(color),
            ),
            Span::raw(pending.status.clone()),
        ])
    } else if let Some(error) = &app.error {
        Line::styled(error_line(error), Style::default().fg(Color::Red))
    } else if app.sources().is_empty() {
        Line::styled("Enter: ask  Ctrl+C: quit", Style::default().fg(Color::DarkGray))
    } else {
        Line::styled(
            "Enter: ask  s: sources  1-5: jump to source  /source N  Ctrl+C: quit",
            Style::default().fg(Color::DarkGray),
        )
    };
    frame.render_widget(Paragraph::new(line), area);
}

/// Scraped stderr messages often carry their own `Error:` prefix.
fn error_line(error: &str) -> String {
    let message = match error.get(..6) {
        Some(head) if head.eq_ignore_ascii_case("error:") => error[6..].trim_start(),
        _ => error,
    };
    format!("Error: {message}")
}

fn render_input(frame: &mut Frame, app: &App, area: Rect) {
    let width = area.width.saturating_sub(3).max(1) as usize;
    let scroll = app.input.visual_scroll(width);

    let title = if app.is_running() { "Ask (busy)" } else { "Ask" };
    let paragraph = Paragraph::new(app.input.value())
        .scroll((0, scroll as u16))
        .block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(paragraph, area);

    if app.viewer.is_none() {
        let x = app.input.visual_cursor().saturating_sub(scroll) as u16;
        frame.set_cursor_position((area.x + 1 + x, area.y + 1));
    }
}

fn render_source(frame: &mut Frame, source: &Source, selected: usize, total: usize) {
    let area = centered(frame.area(), 80, 70);
    frame.render_widget(Clear, area);

    let title = format!(
        " Source {}/{}: {}, Page {} ",
        selected + 1,
        total,
        source.book,
        source.page
    );
    let mut body = vec![
        Line::styled(
            format!("Relevance: {:.0}%", source.score * 100.0),
            Style::default().fg(Color::DarkGray),
        ),
        Line::default(),
    ];
    body.extend(source.text.lines().map(|line| Line::raw(line.to_string())));
    body.push(Line::default());
    body.push(Line::styled(
        "j/k: next/previous  Esc/q: close",
        Style::default().fg(Color::DarkGray),
    ));

    let paragraph = Paragraph::new(body)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(paragraph, area);
}

fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let [_, middle, _] = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .areas(area);
    let [_, center, _] = Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .areas(middle);
    center
}
