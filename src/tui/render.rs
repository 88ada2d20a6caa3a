use crate::tui::view::WizardScreen;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Padding, Paragraph, Row, Table};
use ratatui::Frame;

pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn main_panel_block() -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .padding(Padding::new(3, 3, 1, 1))
}

pub fn draw_wizard_screen(frame: &mut Frame<'_>, screen: &WizardScreen) {
    let info_height = u16::try_from(screen.info.len())
        .unwrap_or(u16::MAX)
        .saturating_add(2)
        .max(3);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(info_height),
            Constraint::Min(6),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let header = Paragraph::new(vec![
        Line::from(Span::styled(
            screen.title.clone(),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(screen.progress.clone()),
    ])
    .block(Block::default().borders(Borders::ALL));
    frame.render_widget(header, chunks[0]);

    let info = Paragraph::new(
        screen
            .info
            .iter()
            .map(|line| Line::from(line.clone()))
            .collect::<Vec<_>>(),
    )
    .block(Block::default().borders(Borders::ALL));
    frame.render_widget(info, chunks[1]);

    let rows = screen.items.iter().enumerate().map(|(idx, item)| {
        let style = if idx == screen.selected {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        let marker = if item.chosen { "[x]" } else { "[ ]" };
        Row::new(vec![
            Cell::from(marker),
            Cell::from(item.label.clone()),
            Cell::from(item.detail.clone()),
        ])
        .style(style)
    });
    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Percentage(45),
            Constraint::Percentage(55),
        ],
    )
    .column_spacing(2)
    .block(main_panel_block());
    frame.render_widget(table, chunks[2]);

    let submit = if screen.can_submit {
        Span::styled(" [submit ready]", Style::default().fg(Color::Green))
    } else {
        Span::raw("")
    };
    let footer = Paragraph::new(vec![
        Line::from(vec![Span::raw(screen.hint), submit]),
        Line::from(format!("Status: {}", screen.status)),
    ])
    .block(Block::default().borders(Borders::ALL));
    frame.render_widget(footer, chunks[3]);

    if let Some(input) = &screen.input {
        let area = centered_rect(60, 20, frame.area());
        frame.render_widget(Clear, area);
        let popup = Paragraph::new(vec![
            Line::from(Span::styled(
                input.key.to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(format!("{}_", input.buffer)),
        ])
        .block(Block::default().borders(Borders::ALL).title("Edit"));
        frame.render_widget(popup, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tui::view::NAVIGATE_HINT;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    #[test]
    fn renders_title_and_status() {
        let screen = WizardScreen {
            title: "Import enrollments".to_string(),
            progress: "Step 1 of 3: Upload roster".to_string(),
            info: vec!["Class: ENG1".to_string()],
            items: Vec::new(),
            selected: 0,
            input: None,
            status: "Upload a roster file first.".to_string(),
            hint: NAVIGATE_HINT,
            can_submit: false,
        };
        let mut terminal = Terminal::new(TestBackend::new(100, 24)).expect("terminal");
        terminal
            .draw(|frame| draw_wizard_screen(frame, &screen))
            .expect("draw");
        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|cell| cell.symbol()).collect();
        assert!(text.contains("Import enrollments"));
        assert!(text.contains("Status: Upload a roster file first."));
    }
}
