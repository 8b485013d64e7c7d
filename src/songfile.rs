use std::io::Write as _;
use std::path::Path;

/// Default output file for fetched song info records.
pub const DEFAULT_SONG_INFO_PATH: &str = "song_info.txt";

/// One entry of a song list file: `"Song Name  Artist"` (two-space
/// separator, so single spaces inside names survive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongListEntry {
    pub name: String,
    pub artist: String,
}

/// Parse song list content. Returns the well-formed entries and the
/// malformed lines (reported, not fatal). Blank lines are ignored.
pub fn parse_song_list(content: &str) -> (Vec<SongListEntry>, Vec<String>) {
    let mut entries = Vec::new();
    let mut malformed = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.split_once("  ") {
            Some((name, artist)) if !name.trim().is_empty() && !artist.trim().is_empty() => {
                entries.push(SongListEntry {
                    name: name.trim().to_string(),
                    artist: artist.trim().to_string(),
                });
            }
            _ => malformed.push(trimmed.to_string()),
        }
    }
    (entries, malformed)
}

pub fn read_song_list(path: &Path) -> Result<(Vec<SongListEntry>, Vec<String>), String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    Ok(parse_song_list(&content))
}

pub fn format_song_info(name: &str, bpm: f64, key: &str) -> String {
    format!("{name} - {bpm:.0} BPM - Key {key}")
}

/// Append one record to the song info file, creating it if missing.
pub fn append_song_info(path: &Path, name: &str, bpm: f64, key: &str) -> Result<(), String> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
    writeln!(file, "{}", format_song_info(name, bpm, key))
        .map_err(|e| format!("failed to write {}: {e}", path.display()))
}
