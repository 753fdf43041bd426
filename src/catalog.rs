use crate::model::{ContentType, Track, TrackId};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

pub const TRACKS_TABLE: &str = "tracks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub event_type: ChangeKind,
    pub table: String,
    pub record: Track,
}

/// Row predicate for fetches and subscriptions. An empty filter matches all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFilter {
    pub content_type: Option<ContentType>,
}

impl TrackFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn content_type(content_type: ContentType) -> Self {
        Self {
            content_type: Some(content_type),
        }
    }

    pub fn matches(&self, track: &Track) -> bool {
        self.content_type
            .is_none_or(|content_type| track.content_type == content_type)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackOrdering {
    #[default]
    NewestFirst,
    OldestFirst,
    Title,
}

impl TrackOrdering {
    fn sort(self, tracks: &mut [Track]) {
        match self {
            Self::NewestFirst => tracks.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            Self::OldestFirst => tracks.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            Self::Title => tracks.sort_by_cached_key(|track| track.title.to_lowercase()),
        }
    }
}

/// The persistence collaborator the engine reads tracks from.
pub trait TrackSource {
    fn fetch_tracks(&self, filter: &TrackFilter, ordering: TrackOrdering) -> Result<Vec<Track>>;
    fn subscribe(&self, table: &str, filter: TrackFilter) -> Receiver<ChangeNotification>;
}

struct Subscriber {
    table: String,
    filter: TrackFilter,
    sender: Sender<ChangeNotification>,
}

#[derive(Default)]
struct CatalogInner {
    tracks: Vec<Track>,
    subscribers: Vec<Subscriber>,
}

/// In-process track table with change fan-out. Safe to share across threads
/// behind an `Arc`.
#[derive(Default)]
pub struct Catalog {
    inner: Mutex<CatalogInner>,
}

impl Catalog {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            inner: Mutex::new(CatalogInner {
                tracks,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_tracks(path)?))
    }

    pub fn len(&self) -> usize {
        self.lock().map_or(0, |inner| inner.tracks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().map_or(0, |inner| inner.subscribers.len())
    }

    pub fn insert(&self, track: Track) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.tracks.iter().any(|existing| existing.id == track.id) {
            return Err(anyhow!("track {} already exists", track.id));
        }
        inner.tracks.push(track.clone());
        inner.notify(ChangeKind::Insert, &track, None);
        Ok(())
    }

    pub fn update(&self, track: Track) -> Result<()> {
        let mut inner = self.lock()?;
        let slot = inner
            .tracks
            .iter_mut()
            .find(|existing| existing.id == track.id)
            .with_context(|| format!("track {} not found", track.id))?;
        let old = std::mem::replace(slot, track.clone());
        inner.notify(ChangeKind::Update, &track, Some(&old));
        Ok(())
    }

    pub fn delete(&self, id: &TrackId) -> Result<Track> {
        let mut inner = self.lock()?;
        let idx = inner
            .tracks
            .iter()
            .position(|existing| &existing.id == id)
            .with_context(|| format!("track {id} not found"))?;
        let removed = inner.tracks.remove(idx);
        inner.notify(ChangeKind::Delete, &removed, None);
        Ok(removed)
    }

    /// Replaces the whole table, emitting one notification per differing row.
    /// Returns the number of changes.
    pub fn sync(&self, tracks: Vec<Track>) -> Result<usize> {
        let mut inner = self.lock()?;
        let previous: HashMap<TrackId, Track> = inner
            .tracks
            .drain(..)
            .map(|track| (track.id.clone(), track))
            .collect();

        let mut changes = Vec::new();
        for track in &tracks {
            match previous.get(&track.id) {
                None => changes.push((ChangeKind::Insert, track.clone(), None)),
                Some(old) if old != track => {
                    changes.push((ChangeKind::Update, track.clone(), Some(old.clone())))
                }
                Some(_) => {}
            }
        }
        for (id, old) in &previous {
            if !tracks.iter().any(|track| &track.id == id) {
                changes.push((ChangeKind::Delete, old.clone(), None));
            }
        }

        inner.tracks = tracks;
        for (kind, record, old) in &changes {
            inner.notify(*kind, record, old.as_ref());
        }
        Ok(changes.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CatalogInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("catalog lock poisoned"))
    }
}

impl CatalogInner {
    /// Fans a change out to matching subscribers. An update also reaches
    /// subscribers whose filter matched the row before the change, so a row
    /// leaving a filtered view is still announced.
    fn notify(&mut self, event_type: ChangeKind, record: &Track, previous: Option<&Track>) {
        self.subscribers.retain(|subscriber| {
            let relevant = subscriber.filter.matches(record)
                || previous.is_some_and(|old| subscriber.filter.matches(old));
            if subscriber.table != TRACKS_TABLE || !relevant {
                return true;
            }
            let notification = ChangeNotification {
                event_type,
                table: subscriber.table.clone(),
                record: record.clone(),
            };
            subscriber.sender.send(notification).is_ok()
        });
        tracing::debug!(
            ?event_type,
            track = %record.id,
            subscribers = self.subscribers.len(),
            "catalog change"
        );
    }
}

impl TrackSource for Catalog {
    fn fetch_tracks(&self, filter: &TrackFilter, ordering: TrackOrdering) -> Result<Vec<Track>> {
        let inner = self.lock()?;
        let mut tracks: Vec<Track> = inner
            .tracks
            .iter()
            .filter(|track| filter.matches(track))
            .cloned()
            .collect();
        ordering.sort(&mut tracks);
        Ok(tracks)
    }

    fn subscribe(&self, table: &str, filter: TrackFilter) -> Receiver<ChangeNotification> {
        let (sender, receiver) = mpsc::channel();
        match self.lock() {
            Ok(mut inner) => inner.subscribers.push(Subscriber {
                table: table.to_string(),
                filter,
                sender,
            }),
            Err(err) => tracing::warn!(error = %err, "subscription dropped"),
        }
        receiver
    }
}

pub fn read_tracks(path: &Path) -> Result<Vec<Track>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    let tracks: Vec<Track> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse catalog {}", path.display()))?;
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use time::OffsetDateTime;
    use time::macros::datetime;

    fn track(id: &str, content_type: ContentType, created_at: OffsetDateTime) -> Track {
        Track {
            id: TrackId::from(id),
            title: id.to_string(),
            artist: String::from("someone"),
            genre: None,
            description: None,
            audio_url: format!("{id}.mp3"),
            cover_image_url: None,
            duration: 60,
            content_type,
            created_at,
        }
    }

    fn sample() -> Catalog {
        Catalog::new(vec![
            track("beta", ContentType::Sound, datetime!(2024-01-02 00:00 UTC)),
            track("alpha", ContentType::Interview, datetime!(2024-01-03 00:00 UTC)),
            track("gamma", ContentType::Sound, datetime!(2024-01-01 00:00 UTC)),
        ])
    }

    fn ids(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|track| track.id.as_str()).collect()
    }

    #[test]
    fn fetch_filters_and_orders() {
        let catalog = sample();
        let newest = catalog
            .fetch_tracks(&TrackFilter::all(), TrackOrdering::NewestFirst)
            .expect("fetch");
        assert_eq!(ids(&newest), vec!["alpha", "beta", "gamma"]);

        let sounds = catalog
            .fetch_tracks(
                &TrackFilter::content_type(ContentType::Sound),
                TrackOrdering::OldestFirst,
            )
            .expect("fetch");
        assert_eq!(ids(&sounds), vec!["gamma", "beta"]);

        let titled = catalog
            .fetch_tracks(&TrackFilter::all(), TrackOrdering::Title)
            .expect("fetch");
        assert_eq!(ids(&titled), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn subscribers_only_see_matching_rows() {
        let catalog = sample();
        let sounds = catalog.subscribe(TRACKS_TABLE, TrackFilter::content_type(ContentType::Sound));
        let everything = catalog.subscribe(TRACKS_TABLE, TrackFilter::all());

        catalog
            .insert(track("delta", ContentType::Interview, datetime!(2024-02-01 00:00 UTC)))
            .expect("insert");
        catalog.delete(&TrackId::from("beta")).expect("delete");

        let seen: Vec<ChangeNotification> = sounds.try_iter().collect();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type, ChangeKind::Delete);
        assert_eq!(seen[0].record.id.as_str(), "beta");

        assert_eq!(everything.try_iter().count(), 2);
    }

    #[test]
    fn update_leaving_a_filter_still_notifies() {
        let catalog = sample();
        let sounds = catalog.subscribe(TRACKS_TABLE, TrackFilter::content_type(ContentType::Sound));
        let interviews =
            catalog.subscribe(TRACKS_TABLE, TrackFilter::content_type(ContentType::Interview));

        catalog
            .update(track("beta", ContentType::Interview, datetime!(2024-01-02 00:00 UTC)))
            .expect("update");

        let seen: Vec<ChangeNotification> = sounds.try_iter().collect();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type, ChangeKind::Update);
        assert_eq!(seen[0].record.content_type, ContentType::Interview);
        assert_eq!(interviews.try_iter().count(), 1);
    }

    #[test]
    fn sync_announces_rows_moving_out_of_a_filter() {
        let catalog = sample();
        let sounds = catalog.subscribe(TRACKS_TABLE, TrackFilter::content_type(ContentType::Sound));

        catalog
            .sync(vec![
                track("beta", ContentType::Sound, datetime!(2024-01-02 00:00 UTC)),
                track("alpha", ContentType::Interview, datetime!(2024-01-03 00:00 UTC)),
                track("gamma", ContentType::Interview, datetime!(2024-01-01 00:00 UTC)),
            ])
            .expect("sync");

        let seen: Vec<ChangeNotification> = sounds.try_iter().collect();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].record.id.as_str(), "gamma");
    }

    #[test]
    fn other_tables_receive_nothing() {
        let catalog = sample();
        let rx = catalog.subscribe("playlists", TrackFilter::all());
        catalog.delete(&TrackId::from("alpha")).expect("delete");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let catalog = sample();
        let rx = catalog.subscribe(TRACKS_TABLE, TrackFilter::all());
        assert_eq!(catalog.subscriber_count(), 1);
        drop(rx);
        catalog.delete(&TrackId::from("alpha")).expect("delete");
        assert_eq!(catalog.subscriber_count(), 0);
    }

    #[test]
    fn duplicate_insert_and_missing_update_fail() {
        let catalog = sample();
        assert!(
            catalog
                .insert(track("alpha", ContentType::Sound, OffsetDateTime::UNIX_EPOCH))
                .is_err()
        );
        assert!(
            catalog
                .update(track("nope", ContentType::Sound, OffsetDateTime::UNIX_EPOCH))
                .is_err()
        );
    }

    #[test]
    fn sync_emits_one_change_per_differing_row() {
        let catalog = sample();
        let rx = catalog.subscribe(TRACKS_TABLE, TrackFilter::all());

        let mut renamed = track("beta", ContentType::Sound, datetime!(2024-01-02 00:00 UTC));
        renamed.title = String::from("Beta (live)");
        let changes = catalog
            .sync(vec![
                renamed,
                track("gamma", ContentType::Sound, datetime!(2024-01-01 00:00 UTC)),
                track("omega", ContentType::Sound, datetime!(2024-03-01 00:00 UTC)),
            ])
            .expect("sync");

        assert_eq!(changes, 3);
        let mut kinds: Vec<ChangeKind> = rx.try_iter().map(|change| change.event_type).collect();
        kinds.sort_by_key(|kind| *kind as u8);
        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
        );
    }

    #[test]
    fn load_reads_json_records() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[{{
                "id": "t1",
                "title": "Rain on tin",
                "artist": "Field kit",
                "audio_url": "media/rain.mp3",
                "duration": 184,
                "content_type": "sound",
                "created_at": "2024-05-01T10:00:00Z"
            }}]"#
        )
        .expect("write catalog");

        let catalog = Catalog::load(file.path()).expect("load");
        assert_eq!(catalog.len(), 1);
        let tracks = catalog
            .fetch_tracks(&TrackFilter::all(), TrackOrdering::default())
            .expect("fetch");
        assert_eq!(tracks[0].genre, None);
        assert_eq!(tracks[0].duration, 184);
    }

    #[test]
    fn load_reports_malformed_files() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(file, "{{ not json").expect("write");
        let err = Catalog::load(file.path()).err().expect("should fail");
        assert!(err.to_string().contains("failed to parse catalog"));
    }
}
