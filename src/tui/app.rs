use anyhow::Result;
use chrono::Local;
use crossterm::event::{Event, EventStream, KeyCode};
use futures_util::StreamExt;
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table, TableState},
    Frame,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::warn;

use crate::{
    holding::Holding,
    state::{Notice, NoticeLevel},
    utils::{format_money, format_pct, format_price},
    valuation::{PortfolioView, ValuationRow},
    AppCommandEvent, AppEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Add,
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Browse,
    Input { kind: InputKind, buffer: String },
}

pub struct App {
    should_quit: bool,
    rx: Receiver<AppEvent>,
    tx_cmd: Sender<AppCommandEvent>,
    holdings: Vec<Holding>,
    view: Option<PortfolioView>,
    notice: Option<Notice>,
    selected_ticker: Option<String>,
    mode: Mode,
}

impl App {
    pub fn new(rx: Receiver<AppEvent>, tx_cmd: Sender<AppCommandEvent>) -> Self {
        Self {
            should_quit: false,
            rx,
            tx_cmd,
            holdings: vec![],
            view: None,
            notice: None,
            selected_ticker: None,
            mode: Mode::Browse,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut terminal = ratatui::init();
        let _ = terminal.clear();

        let mut events = EventStream::new();

        let period = Duration::from_secs_f64(1.0 / 20.0);
        let mut interval = tokio::time::interval(period);

        while !self.should_quit {
            tokio::select! {
                _ = interval.tick() => { terminal.draw(|frame| self.render(frame))?; },
                Some(Ok(event)) = events.next() => self.handle_events(event),
                Some(event) = self.rx.recv() =>
                    self.handle_app_events(event)
            }
        }

        Ok(())
    }

    fn handle_app_events(&mut self, event: AppEvent) {
        match event {
            AppEvent::Holdings(holdings) => {
                self.holdings = holdings;
            }
            AppEvent::Portfolio(view) => {
                let still_listed = self
                    .selected_ticker
                    .as_ref()
                    .is_some_and(|t| view.rows.iter().any(|r| &r.ticker == t));
                if !still_listed {
                    self.selected_ticker = view.rows.first().map(|r| r.ticker.clone());
                }
                self.view = Some(view);
            }
            AppEvent::Notice(notice) => {
                self.notice = Some(notice);
            }
        }
    }

    fn handle_events(&mut self, event: Event) {
        if let Some(key) = event.as_key_press_event() {
            if let Some(command) = self.handle_key(key.code) {
                if let Err(err) = self.tx_cmd.try_send(command) {
                    warn!("Could not send command : {}", err);
                    self.notice = Some(Notice::error("Not connected to the server"));
                }
            }
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> Option<AppCommandEvent> {
        match &mut self.mode {
            Mode::Browse => match code {
                KeyCode::Char('q') => {
                    self.should_quit = true;
                    None
                }
                KeyCode::Up => {
                    self.select_next(false);
                    None
                }
                KeyCode::Down => {
                    self.select_next(true);
                    None
                }
                KeyCode::Char('a') => {
                    self.mode = Mode::Input {
                        kind: InputKind::Add,
                        buffer: String::new(),
                    };
                    None
                }
                KeyCode::Char('e') => {
                    if let Some(buffer) = self.selected_holding().map(Holding::to_string) {
                        self.mode = Mode::Input {
                            kind: InputKind::Edit,
                            buffer,
                        };
                    }
                    None
                }
                KeyCode::Char('d') => self.selected_ticker.clone().map(AppCommandEvent::Remove),
                KeyCode::Char('s') => Some(AppCommandEvent::Save),
                KeyCode::Char('r') => Some(AppCommandEvent::Refresh),
                _ => None,
            },
            Mode::Input { kind, buffer } => match code {
                KeyCode::Esc => {
                    self.mode = Mode::Browse;
                    None
                }
                KeyCode::Backspace => {
                    buffer.pop();
                    None
                }
                KeyCode::Char(c) => {
                    buffer.push(c);
                    None
                }
                KeyCode::Enter => {
                    let kind = *kind;
                    match Holding::try_from(buffer.as_str()) {
                        Ok(holding) => {
                            self.mode = Mode::Browse;
                            self.selected_ticker = Some(holding.ticker.clone());
                            Some(match kind {
                                InputKind::Add => AppCommandEvent::Add(holding),
                                InputKind::Edit => AppCommandEvent::Update(holding),
                            })
                        }
                        Err(err) => {
                            self.notice = Some(Notice::error(err));
                            None
                        }
                    }
                }
                _ => None,
            },
        }
    }

    fn rows(&self) -> &[ValuationRow] {
        self.view.as_ref().map_or(&[], |view| view.rows.as_slice())
    }

    fn selected_index(&self) -> Option<usize> {
        let ticker = self.selected_ticker.as_ref()?;
        self.rows().iter().position(|row| &row.ticker == ticker)
    }

    fn selected_holding(&self) -> Option<&Holding> {
        let ticker = self.selected_ticker.as_ref()?;
        self.holdings.iter().find(|h| &h.ticker == ticker)
    }

    fn select_next(&mut self, forward: bool) {
        let len = self.rows().len();
        if len == 0 {
            return;
        }
        let index = match (self.selected_index(), forward) {
            (None, _) => 0,
            (Some(i), true) => (i + 1) % len,
            (Some(i), false) => (i + len - 1) % len,
        };
        self.selected_ticker = Some(self.rows()[index].ticker.clone());
    }

    fn render(&self, frame: &mut Frame) {
        let [header_area, table_area, chart_area, footer_area] = Layout::vertical([
            Constraint::Length(3),
            Constraint::Fill(1),
            Constraint::Length(14),
            Constraint::Length(4),
        ])
        .areas(frame.area());

        self.render_header(frame, header_area);
        self.render_table(frame, table_area);
        self.render_chart(frame, chart_area);
        self.render_footer(frame, footer_area);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title("Portfolio Dashboard")
            .borders(Borders::ALL);
        let line = match &self.view {
            Some(view) => {
                let totals = &view.totals;
                Line::from(vec![
                    Span::raw(format!("Value {} ", view.display_currency)),
                    Span::styled(format_money(totals.market_value), Style::default().fg(Color::Yellow)),
                    Span::raw("  P/L "),
                    money_span(totals.gain_loss),
                    Span::raw("  Day "),
                    money_span(totals.intraday_move),
                    Span::raw("  Hour "),
                    money_span(totals.hour_move),
                    Span::raw(format!(
                        "  updated {}",
                        view.updated_at.with_timezone(&Local).format("%H:%M:%S")
                    )),
                ])
            }
            None => Line::from("Waiting for prices..."),
        };
        frame.render_widget(Paragraph::new(line).block(block), area);
    }

    fn render_table(&self, frame: &mut Frame, area: Rect) {
        let currency = self
            .view
            .as_ref()
            .map_or("", |view| view.display_currency.as_str());
        let header = Row::new(vec![
            "Ticker".to_string(),
            "Qty".to_string(),
            "Cost".to_string(),
            "Price".to_string(),
            "Ccy".to_string(),
            format!("Price {}", currency),
            "Value".to_string(),
            "P/L".to_string(),
            "Day".to_string(),
            "Hour".to_string(),
            "Notes".to_string(),
        ])
        .style(Style::default().add_modifier(Modifier::BOLD));

        let rows: Vec<Row> = self.rows().iter().map(Row::from).collect();
        let widths = [
            Constraint::Length(9),
            Constraint::Length(12),
            Constraint::Length(11),
            Constraint::Length(11),
            Constraint::Length(4),
            Constraint::Length(11),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Fill(1),
        ];
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().title("Holdings").borders(Borders::ALL))
            .row_highlight_style(Style::default().bg(Color::DarkGray));

        let mut table_state = TableState::default().with_selected(self.selected_index());
        frame.render_stateful_widget(table, area, &mut table_state);
    }

    fn render_chart(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().title("Hourly price (24h)").borders(Borders::ALL);

        let series = self
            .selected_ticker
            .as_ref()
            .and_then(|ticker| self.view.as_ref()?.series(ticker));

        let error = match series {
            Some(series) => {
                let data: Vec<(f64, f64)> = series
                    .points
                    .iter()
                    .filter_map(|p| Some((p.time as f64, p.close.to_f64()?)))
                    .collect();
                if data.is_empty() {
                    Some(format!("No prices for {} yet", series.ticker))
                } else {
                    let start = data.iter().map(|d| d.0).reduce(f64::min).unwrap_or(0.);
                    let end = data.iter().map(|d| d.0).reduce(f64::max).unwrap_or(0.);
                    let min_close = data.iter().map(|d| d.1).reduce(f64::min).unwrap_or(0.);
                    let max_close = data.iter().map(|d| d.1).reduce(f64::max).unwrap_or(0.);

                    let dataset = Dataset::default()
                        .data(&data)
                        .marker(symbols::Marker::Braille)
                        .style(Style::default().fg(Color::Blue))
                        .graph_type(GraphType::Line);

                    let chart = Chart::new(vec![dataset])
                        .x_axis(Axis::default().title("Time").bounds([start, end]))
                        .y_axis(
                            Axis::default()
                                .title("Price")
                                .bounds([min_close, max_close])
                                .labels([format!("{:.2}", min_close), format!("{:.2}", max_close)]),
                        )
                        .block(block.clone().title(series.ticker.clone()));

                    frame.render_widget(chart, area);
                    None
                }
            }
            None => Some(
                self.selected_ticker
                    .as_ref()
                    .map_or("Select a holding".to_string(), |t| format!("No chart for {}", t)),
            ),
        };

        if let Some(error) = error {
            let p = Paragraph::new(Line::from(error)).block(block);
            frame.render_widget(p, area);
        }
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL);
        let mut lines = vec![];

        match &self.mode {
            Mode::Input { kind, buffer } => {
                let title = match kind {
                    InputKind::Add => "Add",
                    InputKind::Edit => "Edit",
                };
                lines.push(Line::from(vec![
                    Span::styled(format!("{} > ", title), Style::default().fg(Color::Cyan)),
                    Span::raw(buffer.clone()),
                    Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
                ]));
                lines.push(Line::from(
                    "TICKER QUANTITY AVG_COST [@CCY] [NOTES...]  Enter to submit, Esc to cancel",
                ));
            }
            Mode::Browse => {
                let warning = self.view.as_ref().and_then(|view| view.warnings.first());
                let status = match (&self.notice, warning) {
                    (Some(notice), _) => notice_line(notice),
                    (None, Some(warning)) => {
                        Line::styled(warning.clone(), Style::default().fg(Color::Yellow))
                    }
                    (None, None) => Line::from(""),
                };
                lines.push(status);
                lines.push(Line::from(
                    "↑/↓ select  a add  e edit  d delete  s save  r refresh  q quit",
                ));
            }
        }

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }
}

fn money_span(value: Decimal) -> Span<'static> {
    let color = if value.is_sign_negative() {
        Color::Red
    } else {
        Color::Green
    };
    Span::styled(format_money(value), Style::default().fg(color))
}

fn notice_line(notice: &Notice) -> Line<'static> {
    let color = match notice.level {
        NoticeLevel::Info => Color::Green,
        NoticeLevel::Error => Color::Red,
    };
    Line::styled(notice.message.clone(), Style::default().fg(color))
}

impl From<&ValuationRow> for Row<'_> {
    fn from(row: &ValuationRow) -> Self {
        let gain_loss = match row.gain_loss {
            Some(gain_loss) => Cell::from(money_span(gain_loss)),
            None => Cell::from("-"),
        };
        let notes = match &row.error {
            Some(error) => Cell::from(Span::styled(error.clone(), Style::default().fg(Color::Red))),
            None => Cell::from(row.notes.clone()),
        };
        Row::new(vec![
            Cell::from(Span::styled(row.ticker.clone(), Style::default().fg(Color::Blue))),
            Cell::from(row.quantity.normalize().to_string()),
            Cell::from(format_price(Some(row.average_cost))),
            Cell::from(format_price(row.price)),
            Cell::from(row.currency.clone()),
            Cell::from(format_price(row.display_price)),
            Cell::from(row.market_value.map_or("-".to_string(), format_money)),
            gain_loss,
            Cell::from(format_pct(row.intraday_pct)),
            Cell::from(format_pct(row.hour_pct)),
            notes,
        ])
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::valuation::{build_view, MarketSnapshot};

    fn app() -> (App, Receiver<AppCommandEvent>) {
        let (_tx, rx) = tokio::sync::mpsc::channel::<AppEvent>(8);
        let (tx_cmd, rx_cmd) = tokio::sync::mpsc::channel::<AppCommandEvent>(8);
        let mut app = App::new(rx, tx_cmd);

        let holdings = vec![
            Holding::new("NDQ.AX", dec!(10), dec!(20)),
            Holding::new("VGS.AX", dec!(1), dec!(100)),
        ];
        let view = build_view(&holdings, &MarketSnapshot::default(), "AUD", vec![], Utc::now());
        app.handle_app_events(AppEvent::Holdings(holdings));
        app.handle_app_events(AppEvent::Portfolio(view));
        (app, rx_cmd)
    }

    fn type_line(app: &mut App, line: &str) -> Option<AppCommandEvent> {
        for c in line.chars() {
            assert_eq!(app.handle_key(KeyCode::Char(c)), None);
        }
        app.handle_key(KeyCode::Enter)
    }

    #[test]
    fn test_selection_wraps() {
        let (mut app, _) = app();
        assert_eq!(app.selected_ticker.as_deref(), Some("NDQ.AX"));
        app.handle_key(KeyCode::Down);
        assert_eq!(app.selected_ticker.as_deref(), Some("VGS.AX"));
        app.handle_key(KeyCode::Down);
        assert_eq!(app.selected_ticker.as_deref(), Some("NDQ.AX"));
        app.handle_key(KeyCode::Up);
        assert_eq!(app.selected_ticker.as_deref(), Some("VGS.AX"));
    }

    #[test]
    fn test_add_and_edit() {
        let (mut app, _) = app();
        assert_eq!(app.handle_key(KeyCode::Char('a')), None);
        let command = type_line(&mut app, "zip.ax 100 2.5");
        assert_eq!(
            command,
            Some(AppCommandEvent::Add(Holding::new("ZIP.AX", dec!(100), dec!(2.5))))
        );
        assert_eq!(app.mode, Mode::Browse);

        app.selected_ticker = Some("NDQ.AX".to_string());
        app.handle_key(KeyCode::Char('e'));
        assert_eq!(
            app.mode,
            Mode::Input {
                kind: InputKind::Edit,
                buffer: "NDQ.AX 10 20".to_string()
            }
        );
        app.handle_key(KeyCode::Backspace);
        app.handle_key(KeyCode::Backspace);
        let command = type_line(&mut app, "21");
        assert_eq!(
            command,
            Some(AppCommandEvent::Update(Holding::new("NDQ.AX", dec!(10), dec!(21))))
        );
    }

    #[test]
    fn test_edit_keeps_currency() {
        let (mut app, _) = app();
        let holdings = vec![Holding::new("AAPL", dec!(3), dec!(300)).with_currency("EUR")];
        let view = build_view(&holdings, &MarketSnapshot::default(), "AUD", vec![], Utc::now());
        app.handle_app_events(AppEvent::Holdings(holdings));
        app.handle_app_events(AppEvent::Portfolio(view));
        assert_eq!(app.selected_ticker.as_deref(), Some("AAPL"));

        app.handle_key(KeyCode::Char('e'));
        assert!(matches!(&app.mode, Mode::Input { buffer, .. } if buffer == "AAPL 3 300 @EUR"));
        let command = type_line(&mut app, " moved");
        assert_eq!(
            command,
            Some(AppCommandEvent::Update(
                Holding::new("AAPL", dec!(3), dec!(300))
                    .with_currency("EUR")
                    .with_notes("moved")
            ))
        );
    }

    #[test]
    fn test_invalid_input_keeps_editing() {
        let (mut app, _) = app();
        app.handle_key(KeyCode::Char('a'));
        assert_eq!(type_line(&mut app, "ZIP.AX lots"), None);
        assert!(matches!(app.mode, Mode::Input { .. }));
        assert!(matches!(&app.notice, Some(n) if n.level == NoticeLevel::Error));
        app.handle_key(KeyCode::Esc);
        assert_eq!(app.mode, Mode::Browse);
    }

    #[test]
    fn test_browse_commands() {
        let (mut app, mut rx_cmd) = app();
        assert_eq!(
            app.handle_key(KeyCode::Char('d')),
            Some(AppCommandEvent::Remove("NDQ.AX".to_string()))
        );
        assert_eq!(app.handle_key(KeyCode::Char('s')), Some(AppCommandEvent::Save));

        app.handle_events(Event::Key(KeyCode::Char('r').into()));
        assert_eq!(rx_cmd.try_recv().unwrap(), AppCommandEvent::Refresh);

        app.handle_key(KeyCode::Char('q'));
        assert!(app.should_quit);
    }
}
