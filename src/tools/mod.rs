use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use rusqlite::Connection;

mod params;
mod sequencing_handlers;

use params::*;
use sequencing_handlers::*;

use crate::keys;
use crate::sequencer;
use crate::songfile;
use crate::spotify;
use crate::store;
use crate::types::Song;

fn internal(msg: String) -> McpError {
    McpError::internal_error(msg, None)
}

/// Inner shared state (not Clone).
struct ServerState {
    store: OnceLock<Result<Mutex<Connection>, String>>,
    http: reqwest::Client,
}

#[derive(Clone)]
pub struct KeyflowServer {
    state: Arc<ServerState>,
    tool_router: ToolRouter<Self>,
}

impl KeyflowServer {
    fn store_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, McpError> {
        let result = self.state.store.get_or_init(|| {
            let path_str = store::resolve_path().to_string_lossy().to_string();
            match store::open(&path_str) {
                Ok(conn) => Ok(Mutex::new(conn)),
                Err(e) => Err(format!("Failed to open internal store: {e}")),
            }
        });
        match result {
            Ok(mutex) => mutex
                .lock()
                .map_err(|_| McpError::internal_error("Internal store lock poisoned", None)),
            Err(msg) => Err(McpError::internal_error(msg.clone(), None)),
        }
    }

    async fn spotify_access_token(&self) -> Result<String, McpError> {
        let creds = spotify::get_credentials()
            .map_err(|e| internal(format!("Spotify auth error: {e}")))?;
        let now = spotify::unix_now();

        let cached = {
            let store = self.store_conn()?;
            store::get_spotify_token(&store, &creds.client_id)
                .map_err(|e| internal(format!("Token cache read error: {e}")))?
        };
        if let Some(token) = cached
            && spotify::token_is_fresh(&token, now)
        {
            return Ok(token.access_token);
        }

        let (token, expires_at) = spotify::refresh_access_token(&self.state.http)
            .await
            .map_err(|e| internal(format!("Spotify auth error: {e}")))?;
        {
            let store = self.store_conn()?;
            store::set_spotify_token(&store, &creds.client_id, &token, expires_at)
                .map_err(|e| internal(format!("Token cache write error: {e}")))?;
        }
        Ok(token)
    }

    async fn lookup_track_features_live(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<Option<spotify::TrackFeatures>, String> {
        #[cfg(test)]
        if let Some(result) = take_test_features_lookup_override(artist, title) {
            return result;
        }

        let token = self
            .spotify_access_token()
            .await
            .map_err(|e| format!("{e}"))?;
        spotify::lookup_track_features(&self.state.http, &token, artist, title).await
    }
}

#[cfg(test)]
type FeaturesLookupResult = Result<Option<spotify::TrackFeatures>, String>;

#[cfg(test)]
static TEST_FEATURES_LOOKUP_OVERRIDES: Mutex<Vec<((String, String), FeaturesLookupResult)>> =
    Mutex::new(Vec::new());

#[cfg(test)]
pub(super) fn push_test_features_lookup_override(
    artist: &str,
    title: &str,
    result: FeaturesLookupResult,
) {
    TEST_FEATURES_LOOKUP_OVERRIDES
        .lock()
        .expect("override lock")
        .push(((artist.to_string(), title.to_string()), result));
}

#[cfg(test)]
fn take_test_features_lookup_override(artist: &str, title: &str) -> Option<FeaturesLookupResult> {
    let mut overrides = TEST_FEATURES_LOOKUP_OVERRIDES.lock().expect("override lock");
    let pos = overrides
        .iter()
        .position(|((a, t), _)| a == artist && t == title)?;
    Some(overrides.remove(pos).1)
}

#[tool_router]
impl KeyflowServer {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent("Keyflow/0.1")
            .build()
            .expect("failed to build HTTP client");
        Self {
            state: Arc::new(ServerState {
                store: OnceLock::new(),
                http,
            }),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Reorder songs for harmonic mixing: group by circle-of-fifths position, alternate ascending/descending tempo per key group, keep at most 4 songs per group"
    )]
    async fn sequence_songs(
        &self,
        params: Parameters<SequenceSongsParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.0.songs.is_empty() {
            return Err(McpError::invalid_params(
                "songs must include at least one entry".to_string(),
                None,
            ));
        }

        let songs: Vec<Song> = params
            .0
            .songs
            .into_iter()
            .enumerate()
            .map(|(index, input)| Song {
                id: input.id.unwrap_or_else(|| format!("song-{index}")),
                name: input.name.unwrap_or_default(),
                artist: input.artist,
                bpm: input.bpm,
                key: input.key,
            })
            .collect();

        let sizes = sequencer::bucket_sizes(&songs)
            .map_err(|e| McpError::invalid_params(format!("{e}"), None))?;
        let ordered = sequencer::sequence(&songs)
            .map_err(|e| McpError::invalid_params(format!("{e}"), None))?;

        let truncated_groups: Vec<serde_json::Value> = sizes
            .iter()
            .enumerate()
            .filter(|&(_, &size)| size > sequencer::MAX_GROUP_RUN)
            .map(|(index, &size)| {
                serde_json::json!({
                    "bucket": keys::CIRCLE_OF_FIFTHS[index],
                    "songs": size,
                    "kept": sequencer::MAX_GROUP_RUN,
                })
            })
            .collect();

        let result = serde_json::json!({
            "songs": ordered,
            "input_songs": songs.len(),
            "dropped_by_truncation": songs.len() - ordered.len(),
            "truncated_groups": truncated_groups,
        });
        let json =
            serde_json::to_string_pretty(&result).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        description = "Get the circle-of-fifths bucket table and the pitch-class name map the sequencer uses"
    )]
    async fn get_circle_of_fifths(&self) -> Result<CallToolResult, McpError> {
        let result = serde_json::json!({
            "circle_of_fifths": keys::CIRCLE_OF_FIFTHS,
            "pitch_class_names": keys::PITCH_CLASS_NAMES,
            "max_group_run": sequencer::MAX_GROUP_RUN,
            "description": "Songs are grouped by the first bucket sharing an enharmonic name with their key, visited in table order with alternating tempo direction.",
        });
        let json =
            serde_json::to_string_pretty(&result).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        description = "Look up a track's tempo and key by artist and title (cached in the internal store)"
    )]
    async fn get_track_features(
        &self,
        params: Parameters<GetTrackFeaturesParams>,
    ) -> Result<CallToolResult, McpError> {
        let GetTrackFeaturesParams {
            artist,
            title,
            force_refresh,
        } = params.0;

        if !force_refresh.unwrap_or(false) {
            let cached = {
                let store = self.store_conn()?;
                store::get_track_features(&store, &artist, &title)
                    .map_err(|e| internal(format!("Cache read error: {e}")))?
            };
            if let Some(entry) = cached {
                let result = serde_json::json!({
                    "artist": artist,
                    "title": title,
                    "track_id": entry.track_id,
                    "bpm": entry.bpm,
                    "key": entry.key,
                    "found": entry.track_id.is_some(),
                    "cached": true,
                    "cached_at": entry.created_at,
                });
                let json = serde_json::to_string_pretty(&result)
                    .map_err(|e| internal(format!("{e}")))?;
                return Ok(CallToolResult::success(vec![Content::text(json)]));
            }
        }

        let lookup = self
            .lookup_track_features_live(&artist, &title)
            .await
            .map_err(|e| internal(format!("Lookup error: {e}")))?;

        {
            let store = self.store_conn()?;
            match &lookup {
                Some(features) => store::set_track_features(
                    &store,
                    &artist,
                    &title,
                    Some(&features.track_id),
                    Some(features.bpm),
                    Some(&features.key),
                ),
                None => store::set_track_features(&store, &artist, &title, None, None, None),
            }
            .map_err(|e| internal(format!("Cache write error: {e}")))?;
        }

        let result = serde_json::json!({
            "artist": artist,
            "title": title,
            "track_id": lookup.as_ref().map(|f| f.track_id.clone()),
            "bpm": lookup.as_ref().map(|f| f.bpm),
            "key": lookup.as_ref().map(|f| f.key.clone()),
            "found": lookup.is_some(),
            "cached": false,
        });
        let json =
            serde_json::to_string_pretty(&result).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        description = "List a playlist's tracks with resolved tempo and key; reports tracks skipped for missing analysis"
    )]
    async fn get_playlist_tracks(
        &self,
        params: Parameters<GetPlaylistTracksParams>,
    ) -> Result<CallToolResult, McpError> {
        handle_get_playlist_tracks(self, params.0).await
    }

    #[tool(
        description = "Fetch a playlist, reorder it for harmonic mixing, and optionally create the reordered playlist on the account"
    )]
    async fn sequence_playlist(
        &self,
        params: Parameters<SequencePlaylistParams>,
    ) -> Result<CallToolResult, McpError> {
        handle_sequence_playlist(self, params.0).await
    }

    #[tool(description = "Append a song's tempo and key record to a song info text file")]
    async fn save_song_info(
        &self,
        params: Parameters<SaveSongInfoParams>,
    ) -> Result<CallToolResult, McpError> {
        let path = PathBuf::from(
            params
                .0
                .path
                .unwrap_or_else(|| songfile::DEFAULT_SONG_INFO_PATH.to_string()),
        );
        songfile::append_song_info(&path, &params.0.name, params.0.bpm, &params.0.key)
            .map_err(internal)?;

        let result = serde_json::json!({
            "saved": songfile::format_song_info(&params.0.name, params.0.bpm, &params.0.key),
            "path": path.display().to_string(),
        });
        let json =
            serde_json::to_string_pretty(&result).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

#[tool_handler]
impl ServerHandler for KeyflowServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Harmonic playlist sequencing server. Reorder songs or whole \
                 Spotify playlists through the circle of fifths, look up track \
                 tempo/key, and publish the reordered playlist."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
