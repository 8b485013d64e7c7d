use std::path::PathBuf;

use clap::Parser;

use crate::types::Song;
use crate::{sequencer, songfile, spotify, store};

#[derive(Parser)]
#[command(name = "keyflow")]
enum Cli {
    /// Batch-fetch tempo and key for a song list file
    Fetch(FetchArgs),
    /// Reorder a playlist for harmonic mixing
    Sequence(SequenceArgs),
}

#[derive(clap::Args)]
struct FetchArgs {
    /// Song list file: one "Song Name  Artist" per line (two-space separator)
    #[arg(long)]
    file: PathBuf,
    /// Song info output file
    #[arg(long, default_value = songfile::DEFAULT_SONG_INFO_PATH)]
    out: PathBuf,
    /// Don't skip songs already in the lookup cache
    #[arg(long)]
    no_skip_cached: bool,
}

#[derive(clap::Args)]
struct SequenceArgs {
    /// Playlist share link, spotify:playlist: URI, or bare playlist ID
    #[arg(long)]
    playlist: String,
    /// Create the reordered playlist on the account
    #[arg(long)]
    create: bool,
    /// Name suffix for the created playlist
    #[arg(long, default_value = " - Harmonized")]
    suffix: String,
    /// Local JPEG to upload as the created playlist's cover
    #[arg(long)]
    cover: Option<PathBuf>,
}

/// Usable tempo and key from a cache entry, or None for a negative entry.
fn cached_features(entry: &store::CachedTrackFeatures) -> Option<(f64, &str)> {
    match (entry.bpm, entry.key.as_deref()) {
        (Some(bpm), Some(key)) => Some((bpm, key)),
        _ => None,
    }
}

fn format_track_line(position: usize, song: &Song) -> String {
    let artist = song
        .artist
        .as_deref()
        .map(|artist| format!(" - {artist}"))
        .unwrap_or_default();
    format!(
        "{position:>3}. {:>4.0} BPM  {:<5} {}{artist}",
        song.bpm, song.key, song.name
    )
}

pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli {
        Cli::Fetch(args) => fetch(args).await,
        Cli::Sequence(args) => run_sequence(args).await,
    }
}

async fn fetch(args: FetchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (entries, malformed) = songfile::read_song_list(&args.file)?;
    for line in &malformed {
        eprintln!("SKIP malformed line (expected \"Song Name  Artist\"): '{line}'");
    }
    if entries.is_empty() {
        eprintln!("No well-formed entries in {}.", args.file.display());
        return Ok(());
    }

    let store_path = store::resolve_path();
    let store_conn = store::open(store_path.to_str().ok_or("Invalid store path encoding")?)?;
    let http = reqwest::Client::builder()
        .user_agent("Keyflow/0.1")
        .build()?;

    // Pre-filter: serve cached lookups without touching the network.
    let skip_cached = !args.no_skip_cached;
    let mut pending = Vec::new();
    let mut cached_count = 0u32;
    let mut saved = 0u32;
    let mut without_match = 0u32;

    for entry in &entries {
        let cached = if skip_cached {
            store::get_track_features(&store_conn, &entry.artist, &entry.name)?
        } else {
            None
        };
        match cached {
            Some(hit) => {
                cached_count += 1;
                match cached_features(&hit) {
                    Some((bpm, key)) => {
                        songfile::append_song_info(&args.out, &entry.name, bpm, key)?;
                        saved += 1;
                    }
                    None => {
                        eprintln!("SKIP {} - {}: no match (cached)", entry.artist, entry.name);
                        without_match += 1;
                    }
                }
            }
            None => pending.push(entry),
        }
    }

    let total = entries.len();
    let pending_count = pending.len();
    eprintln!("Fetching {pending_count} of {total} songs ({cached_count} cached)\n");

    let mut failed = 0u32;
    if !pending.is_empty() {
        let token = spotify::access_token(&http, &store_conn).await?;
        for (i, entry) in pending.iter().enumerate() {
            let idx = i + 1;
            let label = format!("{} - {}", entry.artist, entry.name);
            match spotify::lookup_track_features(&http, &token, &entry.artist, &entry.name).await {
                Ok(Some(features)) => {
                    store::set_track_features(
                        &store_conn,
                        &entry.artist,
                        &entry.name,
                        Some(&features.track_id),
                        Some(features.bpm),
                        Some(&features.key),
                    )?;
                    songfile::append_song_info(&args.out, &entry.name, features.bpm, &features.key)?;
                    eprintln!(
                        "[{idx}/{pending_count}] {label} ... BPM={:.0} Key={}",
                        features.bpm, features.key
                    );
                    saved += 1;
                }
                Ok(None) => {
                    store::set_track_features(&store_conn, &entry.artist, &entry.name, None, None, None)?;
                    eprintln!("[{idx}/{pending_count}] SKIP {label}: no match");
                    without_match += 1;
                }
                Err(e) => {
                    eprintln!("[{idx}/{pending_count}] FAIL {label}: {e}");
                    failed += 1;
                }
            }
        }
    }

    eprintln!("\nDone: {saved} saved to {}, {without_match} without match, {failed} failed", args.out.display());
    Ok(())
}

async fn run_sequence(args: SequenceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store_path = store::resolve_path();
    let store_conn = store::open(store_path.to_str().ok_or("Invalid store path encoding")?)?;
    let http = reqwest::Client::builder()
        .user_agent("Keyflow/0.1")
        .build()?;
    let token = spotify::access_token(&http, &store_conn).await?;

    let playlist_id = spotify::parse_playlist_id(&args.playlist);
    let playlist = spotify::get_playlist(&http, &token, &playlist_id).await?;
    let tracks = spotify::playlist_tracks(&http, &token, &playlist_id).await?;
    let ids: Vec<String> = tracks.iter().map(|track| track.id.clone()).collect();
    let features = spotify::audio_features(&http, &token, &ids).await?;

    let (songs, skipped) = spotify::songs_with_features(tracks, &features);
    if songs.is_empty() {
        return Err("playlist has no tracks with usable tempo and key data".into());
    }
    let ordered = sequencer::sequence(&songs)?;
    let dropped = songs.len() - ordered.len();

    println!("{}", playlist.name);
    for (i, song) in ordered.iter().enumerate() {
        println!("{}", format_track_line(i + 1, song));
    }
    eprintln!(
        "\n{} of {} tracks sequenced ({skipped} skipped for missing data, {dropped} dropped by group cap)",
        ordered.len(),
        playlist.track_count,
    );

    if args.create {
        let user_id = spotify::current_user_id(&http, &token).await?;
        let name = format!("{}{}", playlist.name, args.suffix);
        let created = spotify::create_playlist(&http, &token, &user_id, &name, true).await?;
        let ordered_ids: Vec<String> = ordered.iter().map(|song| song.id.clone()).collect();
        spotify::add_tracks(&http, &token, &created.id, &ordered_ids).await?;

        if let Some(ref cover) = args.cover {
            let upload = match std::fs::read(cover) {
                Ok(jpeg) => spotify::upload_playlist_cover(&http, &token, &created.id, &jpeg).await,
                Err(e) => Err(format!("failed to read {}: {e}", cover.display())),
            };
            if let Err(e) = upload {
                eprintln!("Cover upload failed: {e}");
            }
        }

        match created.url {
            Some(url) => eprintln!("Created playlist '{name}': {url}"),
            None => eprintln!("Created playlist '{name}' ({})", created.id),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{cached_features, format_track_line};
    use crate::store::CachedTrackFeatures;
    use crate::types::Song;

    fn entry(bpm: Option<f64>, key: Option<&str>) -> CachedTrackFeatures {
        CachedTrackFeatures {
            query_artist: "Burial".into(),
            query_title: "Archangel".into(),
            track_id: bpm.map(|_| "t1".to_string()),
            bpm,
            key: key.map(str::to_string),
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn cached_features_requires_both_fields() {
        assert_eq!(cached_features(&entry(Some(139.0), Some("C#/Db"))), Some((139.0, "C#/Db")));
        assert_eq!(cached_features(&entry(None, None)), None);
        assert_eq!(cached_features(&entry(Some(139.0), None)), None);
    }

    #[test]
    fn track_line_formats_position_tempo_and_key() {
        let song = Song {
            id: "t1".into(),
            name: "Archangel".into(),
            artist: Some("Burial".into()),
            bpm: 139.0,
            key: "C#/Db".into(),
        };
        assert_eq!(
            format_track_line(3, &song),
            "  3.  139 BPM  C#/Db Archangel - Burial"
        );
    }

    #[test]
    fn track_line_omits_missing_artist() {
        let song = Song {
            id: "t2".into(),
            name: "Untitled".into(),
            artist: None,
            bpm: 90.0,
            key: "A".into(),
        };
        assert_eq!(format_track_line(12, &song), " 12.   90 BPM  A     Untitled");
    }
}
