use std::collections::HashMap;
use std::sync::OnceLock;

use base64::Engine as _;
use reqwest::Client;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::keys;
use crate::store;
use crate::types::{Playlist, PlaylistTrack, Song};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Tokens within this many seconds of expiry are refreshed eagerly.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 30;

pub(crate) struct Credentials {
    pub(crate) client_id: String,
    client_secret: String,
    refresh_token: String,
}

static CREDENTIALS: OnceLock<Result<Credentials, String>> = OnceLock::new();

pub(crate) fn get_credentials() -> Result<&'static Credentials, String> {
    let result = CREDENTIALS.get_or_init(|| {
        let client_id = std::env::var("KEYFLOW_SPOTIFY_CLIENT_ID")
            .map_err(|_| "KEYFLOW_SPOTIFY_CLIENT_ID not set".to_string())?;
        let client_secret = std::env::var("KEYFLOW_SPOTIFY_CLIENT_SECRET")
            .map_err(|_| "KEYFLOW_SPOTIFY_CLIENT_SECRET not set".to_string())?;
        let refresh_token = std::env::var("KEYFLOW_SPOTIFY_REFRESH_TOKEN")
            .map_err(|_| "KEYFLOW_SPOTIFY_REFRESH_TOKEN not set".to_string())?;
        Ok(Credentials {
            client_id,
            client_secret,
            refresh_token,
        })
    });
    result.as_ref().map_err(|e| e.clone())
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub fn token_is_fresh(token: &store::SpotifyToken, now: i64) -> bool {
    token.expires_at > now + TOKEN_EXPIRY_MARGIN_SECS
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Exchange the configured refresh token for a fresh access token.
/// Returns the token and its absolute expiry (unix seconds).
pub async fn refresh_access_token(client: &Client) -> Result<(String, i64), String> {
    let creds = get_credentials()?;
    let basic = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", creds.client_id, creds.client_secret));

    let resp = client
        .post(TOKEN_URL)
        .header("Authorization", format!("Basic {basic}"))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", creds.refresh_token.as_str()),
        ])
        .send()
        .await
        .map_err(|e| format!("token request failed: {e}"))?;

    if !resp.status().is_success() {
        return Err(format!("token endpoint HTTP {}", resp.status()));
    }

    let data: TokenResponse = resp
        .json()
        .await
        .map_err(|e| format!("token JSON parse error: {e}"))?;

    tracing::debug!("refreshed Spotify access token");
    Ok((data.access_token, unix_now() + data.expires_in))
}

/// Resolve a usable access token, refreshing and persisting through the
/// internal store when the cached one is missing or stale.
pub async fn access_token(client: &Client, store_conn: &Connection) -> Result<String, String> {
    let creds = get_credentials()?;
    let now = unix_now();

    if let Some(token) = store::get_spotify_token(store_conn, &creds.client_id)
        .map_err(|e| format!("token cache read error: {e}"))?
    {
        if token_is_fresh(&token, now) {
            return Ok(token.access_token);
        }
        store::clear_spotify_token(store_conn, &creds.client_id)
            .map_err(|e| format!("token cache clear error: {e}"))?;
    }

    let (token, expires_at) = refresh_access_token(client).await?;
    store::set_spotify_token(store_conn, &creds.client_id, &token, expires_at)
        .map_err(|e| format!("token cache write error: {e}"))?;
    Ok(token)
}

/// Extract the playlist ID from a share link, a `spotify:playlist:` URI,
/// or a bare ID.
pub fn parse_playlist_id(link: &str) -> String {
    let trimmed = link.trim();
    if let Some((_, rest)) = trimmed.rsplit_once("playlist/") {
        return rest
            .split(['?', '/'])
            .next()
            .unwrap_or_default()
            .to_string();
    }
    if let Some(rest) = trimmed.strip_prefix("spotify:playlist:") {
        return rest.to_string();
    }
    trimmed.to_string()
}

async fn get_json<T: serde::de::DeserializeOwned>(
    client: &Client,
    token: &str,
    url: &str,
) -> Result<T, String> {
    let mut attempted_retry = false;
    loop {
        let resp = client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if resp.status() == 429 {
            if attempted_retry {
                return Err("rate limited after retry".into());
            }
            let wait = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            tracing::warn!("Spotify rate limited, waiting {wait}s");
            tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
            attempted_retry = true;
            continue;
        }

        if !resp.status().is_success() {
            return Err(format!("Spotify HTTP {}", resp.status()));
        }

        return resp
            .json()
            .await
            .map_err(|e| format!("JSON parse error: {e}"));
    }
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
}

pub async fn current_user_id(client: &Client, token: &str) -> Result<String, String> {
    let user: UserResponse = get_json(client, token, &format!("{API_BASE}/me")).await?;
    Ok(user.id)
}

#[derive(Deserialize)]
struct PlaylistResponse {
    id: String,
    name: String,
    owner: OwnerRef,
    #[serde(default)]
    images: Vec<ImageRef>,
    tracks: TracksTotal,
}

#[derive(Deserialize)]
struct OwnerRef {
    id: String,
}

#[derive(Deserialize)]
struct ImageRef {
    url: String,
}

#[derive(Deserialize)]
struct TracksTotal {
    total: u32,
}

pub async fn get_playlist(
    client: &Client,
    token: &str,
    playlist_id: &str,
) -> Result<Playlist, String> {
    let data: PlaylistResponse =
        get_json(client, token, &format!("{API_BASE}/playlists/{playlist_id}")).await?;
    Ok(Playlist {
        id: data.id,
        name: data.name,
        owner_id: data.owner.id,
        track_count: data.tracks.total,
        image_url: data.images.into_iter().next().map(|image| image.url),
    })
}

#[derive(Deserialize)]
struct PageResponse {
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    track: Option<ItemTrack>,
}

#[derive(Deserialize)]
struct ItemTrack {
    // Absent for local files, which have no catalog identity.
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistRef>,
}

#[derive(Deserialize)]
struct ArtistRef {
    name: String,
}

fn item_to_track(item: ItemTrack) -> Option<PlaylistTrack> {
    let id = item.id?;
    Some(PlaylistTrack {
        id,
        name: item.name,
        artist: item
            .artists
            .into_iter()
            .next()
            .map(|artist| artist.name)
            .unwrap_or_default(),
    })
}

/// All track references in a playlist, following pagination.
pub async fn playlist_tracks(
    client: &Client,
    token: &str,
    playlist_id: &str,
) -> Result<Vec<PlaylistTrack>, String> {
    let mut url = format!("{API_BASE}/playlists/{playlist_id}/tracks?limit=100");
    let mut tracks = Vec::new();
    loop {
        let page: PageResponse = get_json(client, token, &url).await?;
        tracks.extend(
            page.items
                .into_iter()
                .filter_map(|item| item.track.and_then(item_to_track)),
        );
        match page.next {
            Some(next) => url = next,
            None => return Ok(tracks),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: Option<SearchPage>,
}

#[derive(Deserialize)]
struct SearchPage {
    items: Vec<ItemTrack>,
}

/// Find a track by artist and title. Returns None when nothing matches.
pub async fn search_track(
    client: &Client,
    token: &str,
    artist: &str,
    title: &str,
) -> Result<Option<PlaylistTrack>, String> {
    let query = format!("track:{title} artist:{artist}");
    let url = format!(
        "{API_BASE}/search?q={}&type=track&limit=1",
        urlencoding(&query)
    );
    let data: SearchResponse = get_json(client, token, &url).await?;
    Ok(data
        .tracks
        .map(|page| page.items)
        .unwrap_or_default()
        .into_iter()
        .find_map(item_to_track))
}

#[derive(Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<RawAudioFeatures>>,
}

#[derive(Deserialize)]
struct RawAudioFeatures {
    id: String,
    tempo: f64,
    key: i64,
}

/// Tempo and key for one track. `key` is None when the service could not
/// detect a key (it reports -1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub track_id: String,
    pub bpm: f64,
    pub key: Option<String>,
}

fn features_from_raw(raw: RawAudioFeatures) -> AudioFeatures {
    AudioFeatures {
        track_id: raw.id,
        bpm: raw.tempo.round(),
        key: keys::pitch_class_name(raw.key).map(str::to_string),
    }
}

/// Audio features for up to 100 track IDs per request; tracks the service
/// has no analysis for are absent from the result.
pub async fn audio_features(
    client: &Client,
    token: &str,
    track_ids: &[String],
) -> Result<Vec<AudioFeatures>, String> {
    let mut features = Vec::with_capacity(track_ids.len());
    for chunk in track_ids.chunks(100) {
        let url = format!("{API_BASE}/audio-features?ids={}", chunk.join(","));
        let data: AudioFeaturesResponse = get_json(client, token, &url).await?;
        features.extend(data.audio_features.into_iter().flatten().map(features_from_raw));
    }
    Ok(features)
}

/// Resolved tempo and key for a single looked-up track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackFeatures {
    pub track_id: String,
    pub bpm: f64,
    pub key: String,
}

/// Search for a track and resolve its tempo and key. Returns None when no
/// track matches or the service has no usable analysis for it.
pub async fn lookup_track_features(
    client: &Client,
    token: &str,
    artist: &str,
    title: &str,
) -> Result<Option<TrackFeatures>, String> {
    // Rate limit
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    let Some(track) = search_track(client, token, artist, title).await? else {
        return Ok(None);
    };
    let features = audio_features(client, token, std::slice::from_ref(&track.id)).await?;
    Ok(features.into_iter().next().and_then(|f| {
        f.key.map(|key| TrackFeatures {
            track_id: f.track_id,
            bpm: f.bpm,
            key,
        })
    }))
}

/// Join playlist tracks with their resolved audio features. Tracks the
/// service has no tempo or detected key for are skipped and counted, never
/// handed to the sequencer.
pub fn songs_with_features(
    tracks: Vec<PlaylistTrack>,
    features: &[AudioFeatures],
) -> (Vec<Song>, u32) {
    let features_by_id: HashMap<&str, &AudioFeatures> = features
        .iter()
        .map(|feature| (feature.track_id.as_str(), feature))
        .collect();

    let mut songs = Vec::with_capacity(tracks.len());
    let mut skipped = 0u32;
    for track in tracks {
        match features_by_id
            .get(track.id.as_str())
            .and_then(|feature| feature.key.clone().map(|key| (feature.bpm, key)))
        {
            Some((bpm, key)) => songs.push(Song {
                id: track.id,
                name: track.name,
                artist: Some(track.artist),
                bpm,
                key,
            }),
            None => skipped += 1,
        }
    }
    (songs, skipped)
}

#[derive(Deserialize)]
struct CreatedPlaylistResponse {
    id: String,
    external_urls: ExternalUrls,
}

#[derive(Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedPlaylist {
    pub id: String,
    pub url: Option<String>,
}

pub async fn create_playlist(
    client: &Client,
    token: &str,
    user_id: &str,
    name: &str,
    public: bool,
) -> Result<CreatedPlaylist, String> {
    let resp = client
        .post(format!("{API_BASE}/users/{user_id}/playlists"))
        .bearer_auth(token)
        .json(&serde_json::json!({ "name": name, "public": public }))
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    if !resp.status().is_success() {
        return Err(format!("playlist create HTTP {}", resp.status()));
    }

    let data: CreatedPlaylistResponse = resp
        .json()
        .await
        .map_err(|e| format!("JSON parse error: {e}"))?;
    Ok(CreatedPlaylist {
        id: data.id,
        url: data.external_urls.spotify,
    })
}

/// Append tracks to a playlist in service-order, 100 per request.
pub async fn add_tracks(
    client: &Client,
    token: &str,
    playlist_id: &str,
    track_ids: &[String],
) -> Result<(), String> {
    for chunk in track_ids.chunks(100) {
        let uris: Vec<String> = chunk
            .iter()
            .map(|id| format!("spotify:track:{id}"))
            .collect();
        let resp = client
            .post(format!("{API_BASE}/playlists/{playlist_id}/tracks"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "uris": uris }))
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("add tracks HTTP {}", resp.status()));
        }
    }
    Ok(())
}

/// Upload raw JPEG bytes as a playlist cover (sent base64-encoded).
pub async fn upload_playlist_cover(
    client: &Client,
    token: &str,
    playlist_id: &str,
    jpeg: &[u8],
) -> Result<(), String> {
    let body = base64::engine::general_purpose::STANDARD.encode(jpeg);
    let resp = client
        .put(format!("{API_BASE}/playlists/{playlist_id}/images"))
        .bearer_auth(token)
        .header("Content-Type", "image/jpeg")
        .body(body)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    if !resp.status().is_success() {
        return Err(format!("cover upload HTTP {}", resp.status()));
    }
    Ok(())
}

/// Percent-encode a string for URL query parameters.
fn urlencoding(s: &str) -> String {
    use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
    const SET: &AsciiSet = &NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b'~');
    utf8_percent_encode(s, SET).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_playlist_id_handles_share_links() {
        assert_eq!(
            parse_playlist_id("https://open.spotify.com/playlist/37i9dQZF1DX4dyzvuaRJ0n?si=abc123"),
            "37i9dQZF1DX4dyzvuaRJ0n"
        );
        assert_eq!(
            parse_playlist_id("https://open.spotify.com/playlist/37i9dQZF1DX4dyzvuaRJ0n"),
            "37i9dQZF1DX4dyzvuaRJ0n"
        );
        assert_eq!(
            parse_playlist_id("spotify:playlist:37i9dQZF1DX4dyzvuaRJ0n"),
            "37i9dQZF1DX4dyzvuaRJ0n"
        );
        assert_eq!(
            parse_playlist_id("  37i9dQZF1DX4dyzvuaRJ0n "),
            "37i9dQZF1DX4dyzvuaRJ0n"
        );
    }

    #[test]
    fn token_freshness_applies_margin() {
        let token = store::SpotifyToken {
            account: "a".into(),
            access_token: "t".into(),
            expires_at: 1_000,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(token_is_fresh(&token, 900));
        assert!(!token_is_fresh(&token, 1_000 - TOKEN_EXPIRY_MARGIN_SECS));
        assert!(!token_is_fresh(&token, 1_001));
    }

    #[test]
    fn features_round_tempo_and_decode_key_codes() {
        let features = features_from_raw(RawAudioFeatures {
            id: "t1".into(),
            tempo: 138.638,
            key: 1,
        });
        assert_eq!(features.bpm, 139.0);
        assert_eq!(features.key.as_deref(), Some("C#/Db"));

        let undetected = features_from_raw(RawAudioFeatures {
            id: "t2".into(),
            tempo: 120.0,
            key: -1,
        });
        assert!(undetected.key.is_none());
    }

    #[test]
    fn playlist_page_skips_local_files_and_null_tracks() {
        let page: PageResponse = serde_json::from_value(serde_json::json!({
            "items": [
                { "track": { "id": "t1", "name": "A", "artists": [{ "name": "X" }] } },
                { "track": { "id": null, "name": "Local", "artists": [] } },
                { "track": null },
            ],
            "next": null,
        }))
        .unwrap();
        let tracks: Vec<_> = page
            .items
            .into_iter()
            .filter_map(|item| item.track.and_then(item_to_track))
            .collect();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, "t1");
        assert_eq!(tracks[0].artist, "X");
    }

    fn track(id: &str, name: &str, artist: &str) -> PlaylistTrack {
        PlaylistTrack {
            id: id.into(),
            name: name.into(),
            artist: artist.into(),
        }
    }

    fn features(track_id: &str, bpm: f64, key: Option<&str>) -> AudioFeatures {
        AudioFeatures {
            track_id: track_id.into(),
            bpm,
            key: key.map(str::to_string),
        }
    }

    #[test]
    fn joins_tracks_with_features_by_id() {
        let tracks = vec![track("t1", "A", "X"), track("t2", "B", "Y")];
        let feats = vec![
            features("t2", 132.0, Some("A")),
            features("t1", 139.0, Some("C#/Db")),
        ];
        let (songs, skipped) = songs_with_features(tracks, &feats);
        assert_eq!(skipped, 0);
        assert_eq!(songs[0].id, "t1");
        assert_eq!(songs[0].bpm, 139.0);
        assert_eq!(songs[1].key, "A");
        assert_eq!(songs[1].artist.as_deref(), Some("Y"));
    }

    #[test]
    fn tracks_without_features_or_key_are_skipped() {
        let tracks = vec![
            track("t1", "A", "X"),
            track("t2", "B", "Y"),
            track("t3", "C", "Z"),
        ];
        // t2 has no analysis at all, t3 has an undetected key.
        let feats = vec![features("t1", 120.0, Some("C")), features("t3", 99.0, None)];
        let (songs, skipped) = songs_with_features(tracks, &feats);
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].id, "t1");
        assert_eq!(skipped, 2);
    }

    #[test]
    fn join_preserves_playlist_order_for_the_sequencer() {
        let tracks = vec![track("t2", "B", "Y"), track("t1", "A", "X")];
        let feats = vec![
            features("t1", 120.0, Some("C")),
            features("t2", 125.0, Some("C")),
        ];
        let (songs, _) = songs_with_features(tracks, &feats);
        assert_eq!(songs[0].id, "t2");
        assert_eq!(songs[1].id, "t1");
    }

    #[test]
    fn search_response_without_hits_maps_to_none() {
        let data: SearchResponse =
            serde_json::from_value(serde_json::json!({ "tracks": { "items": [] } })).unwrap();
        let hit = data
            .tracks
            .map(|page| page.items)
            .unwrap_or_default()
            .into_iter()
            .find_map(item_to_track);
        assert!(hit.is_none());
    }
}
