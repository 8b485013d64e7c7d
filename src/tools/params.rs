use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SongInput {
    #[schemars(description = "Stable song identifier (defaults to its input position)")]
    pub id: Option<String>,
    #[schemars(description = "Display name (not used by the ordering)")]
    pub name: Option<String>,
    #[schemars(description = "Artist name (carried through, not used by the ordering)")]
    pub artist: Option<String>,
    #[schemars(description = "Tempo in beats per minute")]
    pub bpm: f64,
    #[schemars(
        description = "Pitch-class key name, e.g. 'A', 'F#/Gb', 'C\u{266F}/D\u{266D}' (Unicode accidentals accepted)"
    )]
    pub key: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SequenceSongsParams {
    #[schemars(description = "Songs to reorder for harmonic mixing")]
    pub songs: Vec<SongInput>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SequencePlaylistParams {
    #[schemars(description = "Playlist share link, spotify:playlist: URI, or bare playlist ID")]
    pub playlist: String,
    #[schemars(
        description = "Create the reordered playlist on the account (default false: preview only)"
    )]
    pub create: Option<bool>,
    #[schemars(description = "Name suffix for the created playlist (default ' - Harmonized')")]
    pub suffix: Option<String>,
    #[schemars(description = "Local JPEG to upload as the created playlist's cover")]
    pub cover_image_path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetPlaylistTracksParams {
    #[schemars(description = "Playlist share link, spotify:playlist: URI, or bare playlist ID")]
    pub playlist: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetTrackFeaturesParams {
    #[schemars(description = "Artist name")]
    pub artist: String,
    #[schemars(description = "Track title")]
    pub title: String,
    #[schemars(description = "Bypass cache and fetch fresh data (default false)")]
    pub force_refresh: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SaveSongInfoParams {
    #[schemars(description = "Song display name")]
    pub name: String,
    #[schemars(description = "Tempo in beats per minute")]
    pub bpm: f64,
    #[schemars(description = "Pitch-class key name")]
    pub key: String,
    #[schemars(description = "Song info file path (default ./song_info.txt)")]
    pub path: Option<String>,
}
