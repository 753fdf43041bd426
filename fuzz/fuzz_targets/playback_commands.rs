#![no_main]

use libfuzzer_sys::fuzz_target;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use soundstage::model::{ContentType, PlaybackState, RepeatMode, Track, TrackId};
use soundstage::store::{Action, reduce};
use std::sync::Arc;
use time::OffsetDateTime;

fn track(idx: usize) -> Arc<Track> {
    Arc::new(Track {
        id: TrackId::new(format!("track_{idx}")),
        title: format!("Track {idx}"),
        artist: String::from("fuzz"),
        genre: None,
        description: None,
        audio_url: format!("track_{idx}.mp3"),
        cover_image_url: None,
        duration: 60,
        content_type: ContentType::Sound,
        created_at: OffsetDateTime::UNIX_EPOCH,
    })
}

fuzz_target!(|data: &[u8]| {
    let mut state = PlaybackState::default();
    let mut rng = SmallRng::seed_from_u64(data.len() as u64);
    let pool: Vec<Arc<Track>> = (0..8).map(track).collect();

    for pair in data.chunks(2) {
        let arg = pair.get(1).copied().unwrap_or(0);
        let action = match pair[0] % 16 {
            0 => Action::SetTrack(pool[usize::from(arg) % pool.len()].clone()),
            1 => Action::SetPlaylist(pool[..usize::from(arg) % (pool.len() + 1)].to_vec()),
            2 => Action::Play,
            3 => Action::Pause,
            4 => Action::Stop,
            5 => Action::SetLoading(arg % 2 == 0),
            6 => Action::SetTime(f64::from(arg) - 8.0),
            7 => Action::SetDuration(f64::from(arg)),
            8 => Action::SetVolume(f32::from(arg) / 200.0),
            9 => Action::ToggleMute,
            10 => Action::ToggleShuffle,
            11 => Action::SetRepeat(match arg % 3 {
                0 => RepeatMode::Off,
                1 => RepeatMode::All,
                _ => RepeatMode::One,
            }),
            12 => Action::NextTrack,
            13 => Action::PreviousTrack,
            14 => Action::SetIndex(usize::from(arg) % 10),
            _ => Action::LoadComplete,
        };
        reduce(&mut state, action, &mut rng);

        assert!(!(state.is_playing && state.is_paused));
        assert!((0.0..=1.0).contains(&state.volume));
        assert!(state.current_time >= 0.0);
        if let Some(idx) = state.current_index {
            assert!(idx < state.playlist.len());
            let current = state.current_track.as_ref().expect("index implies a track");
            assert_eq!(current.id, state.playlist[idx].id);
        }
    }
});
