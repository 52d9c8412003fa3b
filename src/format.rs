use crate::models::TrackState;

pub fn ms_to_clock(ms: u64) -> String {
    let total_seconds = ms / 1000;
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Chat line announcing `track`, e.g.
/// `🎵 Now playing: Artist X - Song A | (from Album) | Progress: 1:01/3:20 | Listen: https://...`
pub fn format_announcement(track: &TrackState) -> String {
    let artists = if track.artists.is_empty() {
        track.artist_name.clone()
    } else {
        track.artists.join(", ")
    };
    let mut parts = vec![format!("🎵 Now playing: {} - {}", artists, track.track_name)];
    if let Some(album) = track.album_name.as_deref().filter(|a| !a.is_empty()) {
        parts.push(format!("(from {})", album));
    }
    if let Some(duration) = track.duration_ms {
        parts.push(format!(
            "Progress: {}/{}",
            ms_to_clock(track.progress_ms.unwrap_or(0)),
            ms_to_clock(duration)
        ));
    }
    if let Some(url) = track.url.as_deref().filter(|u| !u.is_empty()) {
        parts.push(format!("Listen: {}", url));
    }
    parts.join(" | ")
}
