use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A song as consumed by the harmonic sequencer: an opaque identifier plus
/// the two fields the algorithm reads (tempo and key). `name` and `artist`
/// are carried through untouched for display and publishing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Song {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub bpm: f64,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub track_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A track reference from a remote playlist, before tempo/key resolution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlaylistTrack {
    pub id: String,
    pub name: String,
    pub artist: String,
}
