use crate::app::App;
use crate::model::PlaybackState;
use crate::player::format_time;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};

const APP_TITLE: &str = "Soundstage  ";

#[derive(Clone, Copy)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    panel_alt_bg: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    alert: Color,
    low_band: Color,
    high_band: Color,
    selected_bg: Color,
}

const PALETTE: Palette = Palette {
    bg: Color::Rgb(10, 15, 24),
    panel_bg: Color::Rgb(19, 29, 43),
    panel_alt_bg: Color::Rgb(24, 38, 58),
    border: Color::Rgb(69, 121, 176),
    text: Color::Rgb(214, 228, 248),
    muted: Color::Rgb(149, 173, 204),
    accent: Color::Rgb(100, 203, 184),
    alert: Color::Rgb(249, 174, 88),
    low_band: Color::Rgb(255, 122, 165),
    high_band: Color::Rgb(141, 204, 255),
    selected_bg: Color::Rgb(34, 55, 82),
};

fn layout(area: Rect) -> (Rect, Rect, Rect, Rect, Rect) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(area);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(58), Constraint::Percentage(42)])
        .split(vertical[1]);

    (vertical[0], body[0], body[1], vertical[2], vertical[3])
}

pub fn playlist_rect(area: Rect) -> Rect {
    layout(area).1
}

pub fn draw(frame: &mut Frame, app: &App) {
    let colors = PALETTE;
    let state = app.player.snapshot();
    frame.render_widget(
        Block::default().style(Style::default().bg(colors.bg)),
        frame.area(),
    );

    let (header, playlist_area, side, timeline, footer) = layout(frame.area());

    let output = app
        .player
        .device()
        .try_borrow()
        .ok()
        .and_then(|device| device.output_name())
        .unwrap_or_else(|| String::from("-"));
    let header_line = Paragraph::new(Line::from(vec![
        Span::styled(
            APP_TITLE,
            Style::default()
                .fg(colors.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("Tracks {}", state.playlist.len()),
            Style::default().fg(colors.text),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(mode_label(state), Style::default().fg(colors.alert)),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(format!("Output {output}"), Style::default().fg(colors.muted)),
    ]))
    .block(panel_block("Status", colors.panel_bg, colors.text, colors.border));
    frame.render_widget(header_line, header);

    let current = state.current_index;
    let items: Vec<ListItem> = state
        .playlist
        .iter()
        .enumerate()
        .map(|(idx, track)| {
            let marker = if Some(idx) == current { "  > " } else { "    " };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(colors.muted)),
                Span::styled(track.title.as_str(), Style::default().fg(colors.text)),
                Span::styled(
                    format!("  {}", track.artist),
                    Style::default().fg(colors.muted),
                ),
                Span::styled(
                    format!("  {}", format_time(f64::from(track.duration))),
                    Style::default().fg(colors.muted),
                ),
            ]))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select((!state.playlist.is_empty()).then_some(app.selected));

    let list = List::new(items)
        .block(panel_block(
            "Playlist",
            colors.panel_bg,
            colors.text,
            colors.border,
        ))
        .highlight_style(
            Style::default()
                .bg(colors.selected_bg)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, playlist_area, &mut list_state);

    let side_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(4)])
        .split(side);

    frame.render_widget(now_playing(state, &colors), side_chunks[0]);

    let bars_height = side_chunks[1].height.saturating_sub(2) as usize;
    let levels = app.visualizer.levels(app.player.bands());
    let rows: Vec<Line> = bar_rows(&levels, bars_height)
        .into_iter()
        .map(|row| {
            let spans: Vec<Span> = row
                .chars()
                .enumerate()
                .map(|(col, ch)| {
                    let color = if (col / 2) % 2 == 0 {
                        colors.low_band
                    } else {
                        colors.high_band
                    };
                    Span::styled(ch.to_string(), Style::default().fg(color))
                })
                .collect();
            Line::from(spans)
        })
        .collect();
    let visualizer = Paragraph::new(rows).block(panel_block(
        "Visualizer",
        colors.panel_alt_bg,
        colors.text,
        colors.border,
    ));
    frame.render_widget(visualizer, side_chunks[1]);

    let timeline_block = Paragraph::new(Span::styled(
        timeline_line(state, 26, 14),
        Style::default().fg(colors.text),
    ))
    .block(panel_block(
        "Timeline",
        colors.panel_bg,
        colors.text,
        colors.border,
    ))
    .wrap(Wrap { trim: true });
    frame.render_widget(timeline_block, timeline);

    let footer_line = Paragraph::new(Line::from(vec![
        Span::styled(
            "Keys: space play/pause, n/b next/prev, Enter play, x stop, s shuffle, r repeat, m mute, +/- vol, arrows seek, d remove, q quit",
            Style::default().fg(colors.muted),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(app.status.as_str(), Style::default().fg(colors.text)),
    ]))
    .block(panel_block(
        "Message",
        colors.panel_bg,
        colors.text,
        colors.border,
    ));
    frame.render_widget(footer_line, footer);
}

fn now_playing<'a>(state: &'a PlaybackState, colors: &Palette) -> Paragraph<'a> {
    let (title, artist, detail) = match &state.current_track {
        Some(track) => (
            track.title.as_str(),
            track.artist.as_str(),
            track
                .genre
                .as_deref()
                .or(track.description.as_deref())
                .unwrap_or("-"),
        ),
        None => ("-", "-", "-"),
    };
    let transport = if state.is_loading {
        "Loading"
    } else if state.is_playing {
        "Playing"
    } else if state.current_track.is_some() {
        "Paused"
    } else {
        "Stopped"
    };

    let lines = vec![
        Line::from(vec![
            Span::styled(
                "Now",
                Style::default()
                    .fg(colors.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {title}"), Style::default().fg(colors.text)),
        ]),
        Line::from(Span::styled(
            format!("Artist  {artist}"),
            Style::default().fg(colors.muted),
        )),
        Line::from(Span::styled(
            format!("About   {detail}"),
            Style::default().fg(colors.muted),
        )),
        Line::from(Span::styled(
            format!("State   {transport}"),
            Style::default().fg(colors.alert),
        )),
    ];
    Paragraph::new(lines)
        .block(panel_block(
            "Now Playing",
            colors.panel_alt_bg,
            colors.text,
            colors.border,
        ))
        .wrap(Wrap { trim: true })
}

fn mode_label(state: &PlaybackState) -> String {
    format!(
        "Shuffle {}  Repeat {}",
        if state.shuffle_mode { "on" } else { "off" },
        state.repeat_mode.label()
    )
}

fn panel_block(title: &str, bg: Color, text: Color, border: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(text).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(bg))
}

fn progress_bar(ratio: Option<f64>, width: usize) -> String {
    let clamped = ratio.unwrap_or(0.0).clamp(0.0, 1.0);
    let filled = (clamped * width as f64).round() as usize;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    bar.push_str(&"#".repeat(filled));
    bar.push_str(&"-".repeat(width.saturating_sub(filled)));
    bar.push(']');
    bar
}

fn timeline_line(state: &PlaybackState, timeline_bar_width: usize, volume_bar_width: usize) -> String {
    let ratio = (state.duration > 0.0).then(|| state.current_time / state.duration);
    let volume = state.effective_volume();
    let volume_label = if state.is_muted {
        String::from("mute")
    } else {
        format!("{:>3}%", (volume * 100.0).round() as u16)
    };

    format!(
        "{} / {} {}  |  Vol {} {}",
        format_time(state.current_time),
        format_time(state.duration),
        progress_bar(ratio, timeline_bar_width),
        progress_bar(Some(f64::from(volume)), volume_bar_width),
        volume_label
    )
}

/// Renders levels in [0,1] as `height` text rows, top row first, two columns
/// per bar.
fn bar_rows(levels: &[f32], height: usize) -> Vec<String> {
    (0..height)
        .map(|row| {
            let threshold = (height - row) as f32 / height as f32;
            levels
                .iter()
                .map(|level| if *level >= threshold - 1e-6 { "██" } else { "  " })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(Some(0.5), 4), "[##--]");
        assert_eq!(progress_bar(None, 3), "[---]");
        assert_eq!(progress_bar(Some(4.0), 2), "[##]");
    }

    #[test]
    fn timeline_uses_minute_second_format() {
        let state = PlaybackState {
            current_time: 65.0,
            duration: 130.0,
            ..PlaybackState::default()
        };
        let line = timeline_line(&state, 4, 2);
        assert!(line.starts_with("1:05 / 2:10 [##--]"), "{line}");
        assert!(line.ends_with("100%"), "{line}");
    }

    #[test]
    fn muted_timeline_shows_mute_label() {
        let state = PlaybackState {
            is_muted: true,
            ..PlaybackState::default()
        };
        let line = timeline_line(&state, 4, 2);
        assert!(line.contains("Vol [--] mute"), "{line}");
    }

    #[test]
    fn bar_rows_grow_from_the_bottom() {
        let rows = bar_rows(&[1.0, 0.5, 0.0], 2);
        assert_eq!(rows, vec!["██    ".to_string(), "████  ".to_string()]);
    }
}
