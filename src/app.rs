use crate::audio::{NullDevice, RodioDevice, SharedDevice, share};
use crate::catalog::{self, Catalog, TrackFilter, TrackOrdering};
use crate::changes::ExternalChangeAdapter;
use crate::config::{self, Settings};
use crate::model::ContentType;
use crate::player::Player;
use crate::stop::{EndpointRegistry, SharedRegistry};
use crate::visual::Visualizer;
use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::Rect;
use std::fs;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

const VISUALIZER_BARS: usize = 24;
const CATALOG_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub catalog_path: Option<PathBuf>,
    pub content_type: Option<ContentType>,
    pub null_audio: bool,
}

/// Session state for the terminal front end.
pub struct App {
    pub player: Player,
    pub selected: usize,
    pub status: String,
    pub visualizer: Visualizer,
    adapter: ExternalChangeAdapter,
    catalog: Arc<Catalog>,
    catalog_path: Option<PathBuf>,
    catalog_modified: Option<SystemTime>,
    last_catalog_poll: Instant,
    seek_step: f64,
}

impl App {
    pub fn new(
        device: SharedDevice,
        registry: SharedRegistry,
        settings: &Settings,
        content_type: Option<ContentType>,
    ) -> Result<Self> {
        let catalog = match &settings.catalog_path {
            Some(path) => Catalog::load(path)?,
            None => Catalog::default(),
        };
        let catalog = Arc::new(catalog);
        let filter = TrackFilter { content_type };
        let adapter =
            ExternalChangeAdapter::new(catalog.clone(), filter, TrackOrdering::NewestFirst);

        let mut player = Player::new(device, registry, settings);
        adapter.refresh(&mut player);

        let status = match &settings.catalog_path {
            Some(path) => format!("Loaded {} tracks from {}", catalog.len(), path.display()),
            None => String::from("No catalog configured; pass --catalog <path>"),
        };

        Ok(Self {
            player,
            selected: 0,
            status,
            visualizer: Visualizer::bars(VISUALIZER_BARS),
            adapter,
            catalog_modified: settings.catalog_path.as_deref().and_then(modified_at),
            catalog_path: settings.catalog_path.clone(),
            catalog,
            last_catalog_poll: Instant::now(),
            seek_step: f64::from(settings.seek_step_seconds),
        })
    }

    /// One pass of the background work: device events, upstream changes and
    /// the transport watchdog.
    pub fn tick(&mut self, now: Instant) {
        self.poll_catalog_file(now);
        self.player.pump();
        if self.adapter.pump(&mut self.player) > 0 {
            self.status = format!("Playlist updated ({} tracks)", self.playlist_len());
        }
        self.player.reconcile(now);
        self.clamp_selection();
    }

    /// Returns true when the session should end.
    pub fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> bool {
        match code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Char(' ') => {
                self.player.toggle_play_pause();
                self.status = String::from(if self.player.snapshot().is_playing {
                    "Playing"
                } else {
                    "Paused"
                });
            }
            KeyCode::Char('n') => {
                self.player.next_track();
                self.follow_current();
            }
            KeyCode::Char('b') => {
                self.player.previous_track();
                self.follow_current();
            }
            KeyCode::Char('x') => {
                self.player.stop();
                self.status = String::from("Stopped");
            }
            KeyCode::Char('s') => {
                self.player.toggle_shuffle();
                let shuffle = self.player.snapshot().shuffle_mode;
                self.status = format!("Shuffle {}", if shuffle { "on" } else { "off" });
            }
            KeyCode::Char('r') => {
                let mode = self.player.snapshot().repeat_mode.next();
                self.player.set_repeat_mode(mode);
                self.status = format!("Repeat {}", mode.label());
            }
            KeyCode::Char('m') => {
                self.player.toggle_mute();
                let muted = self.player.snapshot().is_muted;
                self.status = String::from(if muted { "Muted" } else { "Unmuted" });
            }
            KeyCode::Char('+') | KeyCode::Char('=') => self.nudge_volume(0.05),
            KeyCode::Char('-') => self.nudge_volume(-0.05),
            KeyCode::Left => self.player.seek_by(-self.seek_step),
            KeyCode::Right => self.player.seek_by(self.seek_step),
            KeyCode::Up => self.select_prev(),
            KeyCode::Down => self.select_next(),
            KeyCode::Enter => self.play_selected(),
            KeyCode::Char('d') => self.remove_selected(),
            _ => {}
        }
        false
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, playlist_rect: Rect) {
        let inside = point_in_rect(mouse.column, mouse.row, playlist_rect);
        match mouse.kind {
            MouseEventKind::ScrollDown if inside => self.select_next(),
            MouseEventKind::ScrollUp if inside => self.select_prev(),
            _ => {}
        }
    }

    fn playlist_len(&self) -> usize {
        self.player.snapshot().playlist.len()
    }

    fn select_next(&mut self) {
        let len = self.playlist_len();
        if len > 0 {
            self.selected = (self.selected + 1).min(len - 1);
        }
    }

    fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn clamp_selection(&mut self) {
        self.selected = self.selected.min(self.playlist_len().saturating_sub(1));
    }

    fn follow_current(&mut self) {
        if let Some(idx) = self.player.snapshot().current_index {
            self.selected = idx;
        }
        if let Some(track) = &self.player.snapshot().current_track {
            self.status = format!("Now: {}", track.title);
        }
    }

    fn play_selected(&mut self) {
        let Some(track) = self.player.snapshot().playlist.get(self.selected).cloned() else {
            self.status = String::from("Playlist is empty");
            return;
        };
        self.player.play_track(track, None);
        self.player.play();
        self.follow_current();
    }

    fn remove_selected(&mut self) {
        let Some(track) = self.player.snapshot().playlist.get(self.selected).cloned() else {
            return;
        };
        self.player.remove_from_playlist(&track.id);
        self.status = format!("Removed {}", track.title);
        self.clamp_selection();
    }

    fn nudge_volume(&mut self, delta: f32) {
        let next = (self.player.snapshot().volume + delta).clamp(0.0, 1.0);
        self.player.set_volume(next);
        self.status = format!("Volume: {}%", (next * 100.0).round() as u16);
    }

    /// Mirrors edits of the catalog file into the in-process table, which in
    /// turn notifies the change adapter.
    fn poll_catalog_file(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_catalog_poll) < CATALOG_POLL_INTERVAL {
            return;
        }
        self.last_catalog_poll = now;

        let Some(path) = self.catalog_path.as_deref() else {
            return;
        };
        let modified = modified_at(path);
        if modified.is_none() || modified == self.catalog_modified {
            return;
        }
        self.catalog_modified = modified;

        match catalog::read_tracks(path).and_then(|tracks| self.catalog.sync(tracks)) {
            Ok(changes) => tracing::info!(changes, "catalog file changed"),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "catalog reload failed");
                self.status = format!("catalog error: {err:#}");
            }
        }
    }
}

fn modified_at(path: &std::path::Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    if rect.width == 0 || rect.height == 0 {
        return false;
    }
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

fn open_device(settings: &Settings, null_audio: bool) -> SharedDevice {
    if null_audio {
        return share(NullDevice::new());
    }
    match RodioDevice::new(settings.media_root.clone()) {
        Ok(device) => share(device),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "audio output unavailable, using null device");
            share(NullDevice::new())
        }
    }
}

pub fn run(options: AppOptions) -> Result<()> {
    let mut settings = config::load_settings()?;
    if let Some(path) = options.catalog_path {
        settings.catalog_path = Some(path);
    }

    let registry = EndpointRegistry::shared();
    let device = open_device(&settings, options.null_audio);
    let mut app = App::new(device, registry, &settings, options.content_type)?;
    let frame_interval = settings.frame_interval();

    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut playlist_rect = Rect::default();

    let result: Result<()> = loop {
        app.tick(Instant::now());
        app.player.analysis_frame();

        terminal.draw(|frame| {
            playlist_rect = crate::ui::playlist_rect(frame.area());
            crate::ui::draw(frame, &app);
        })?;

        if !event::poll(frame_interval)? {
            continue;
        }

        match event::read()? {
            Event::Mouse(mouse) => app.handle_mouse(mouse, playlist_rect),
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if app.handle_key(key.code, key.modifiers) {
                    break Ok(());
                }
            }
            _ => {}
        }
    };

    app.player.stop();
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    result
}
