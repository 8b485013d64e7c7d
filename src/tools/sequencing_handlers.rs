use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};

use super::*;
use crate::sequencer;
use crate::spotify;
use crate::types::Song;

async fn fetch_playlist_songs(
    server: &KeyflowServer,
    playlist_ref: &str,
) -> Result<(crate::types::Playlist, Vec<Song>, u32), McpError> {
    let token = server.spotify_access_token().await?;
    let playlist_id = spotify::parse_playlist_id(playlist_ref);

    let playlist = spotify::get_playlist(&server.state.http, &token, &playlist_id)
        .await
        .map_err(|e| internal(format!("Playlist fetch error: {e}")))?;
    let tracks = spotify::playlist_tracks(&server.state.http, &token, &playlist_id)
        .await
        .map_err(|e| internal(format!("Playlist tracks error: {e}")))?;

    let ids: Vec<String> = tracks.iter().map(|track| track.id.clone()).collect();
    let features = spotify::audio_features(&server.state.http, &token, &ids)
        .await
        .map_err(|e| internal(format!("Audio features error: {e}")))?;

    let (songs, skipped) = spotify::songs_with_features(tracks, &features);
    Ok((playlist, songs, skipped))
}

pub(super) async fn handle_get_playlist_tracks(
    server: &KeyflowServer,
    params: GetPlaylistTracksParams,
) -> Result<CallToolResult, McpError> {
    let (playlist, songs, skipped) = fetch_playlist_songs(server, &params.playlist).await?;

    let result = serde_json::json!({
        "playlist": playlist,
        "songs": songs,
        "skipped_tracks": skipped,
    });
    let json = serde_json::to_string_pretty(&result).map_err(|e| internal(format!("{e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

pub(super) async fn handle_sequence_playlist(
    server: &KeyflowServer,
    params: SequencePlaylistParams,
) -> Result<CallToolResult, McpError> {
    let (playlist, songs, skipped) = fetch_playlist_songs(server, &params.playlist).await?;

    if songs.is_empty() {
        return Err(McpError::invalid_params(
            "Playlist has no tracks with usable tempo and key data".to_string(),
            None,
        ));
    }

    let ordered =
        sequencer::sequence(&songs).map_err(|e| McpError::invalid_params(format!("{e}"), None))?;
    let dropped = songs.len() - ordered.len();

    let mut result = serde_json::json!({
        "playlist": playlist,
        "songs": ordered,
        "input_songs": songs.len(),
        "skipped_tracks": skipped,
        "dropped_by_truncation": dropped,
    });

    if params.create.unwrap_or(false) {
        let token = server.spotify_access_token().await?;
        let user_id = spotify::current_user_id(&server.state.http, &token)
            .await
            .map_err(|e| internal(format!("User lookup error: {e}")))?;

        let suffix = params.suffix.as_deref().unwrap_or(" - Harmonized");
        let name = format!("{}{suffix}", playlist.name);
        let created = spotify::create_playlist(&server.state.http, &token, &user_id, &name, true)
            .await
            .map_err(|e| internal(format!("Playlist create error: {e}")))?;

        let ordered_ids: Vec<String> = ordered.iter().map(|song| song.id.clone()).collect();
        spotify::add_tracks(&server.state.http, &token, &created.id, &ordered_ids)
            .await
            .map_err(|e| internal(format!("Add tracks error: {e}")))?;

        // The playlist exists at this point, so a failed cover upload is
        // reported alongside the result rather than failing the call.
        if let Some(ref cover_path) = params.cover_image_path {
            let upload = match std::fs::read(cover_path) {
                Ok(jpeg) => {
                    spotify::upload_playlist_cover(&server.state.http, &token, &created.id, &jpeg)
                        .await
                }
                Err(e) => Err(format!("failed to read {cover_path}: {e}")),
            };
            if let Err(e) = upload {
                result["cover_upload_error"] = serde_json::json!(e);
            }
        }

        result["created"] = serde_json::json!({
            "id": created.id,
            "name": name,
            "url": created.url,
        });
    }

    let json = serde_json::to_string_pretty(&result).map_err(|e| internal(format!("{e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
