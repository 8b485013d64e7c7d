use rusqlite::{Connection, OpenFlags, ffi, params};
use std::path::PathBuf;

pub fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keyflow")
        .join("internal.sqlite3")
}

/// Store path: the `KEYFLOW_STORE_PATH` override or the platform default.
pub fn resolve_path() -> PathBuf {
    std::env::var("KEYFLOW_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_path())
}

pub fn open(path: &str) -> Result<Connection, rusqlite::Error> {
    let store_path = std::path::Path::new(path);
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_CANTOPEN),
                Some(format!(
                    "failed to create parent directory {} for {}: {}",
                    parent.display(),
                    store_path.display(),
                    err
                )),
            )
        })?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS track_features_cache (
            query_artist TEXT NOT NULL,
            query_title  TEXT NOT NULL,
            track_id     TEXT,
            bpm          REAL,
            key          TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (query_artist, query_title)
        );
        CREATE TABLE IF NOT EXISTS spotify_token (
            account      TEXT PRIMARY KEY,
            access_token TEXT NOT NULL,
            expires_at   INTEGER NOT NULL,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        PRAGMA user_version = 1;",
    )?;
    Ok(())
}

/// A cached remote feature lookup. `track_id`/`bpm`/`key` are all NULL for
/// a negative entry (the lookup ran and found no match).
#[derive(Debug, Clone)]
pub struct CachedTrackFeatures {
    pub query_artist: String,
    pub query_title: String,
    pub track_id: Option<String>,
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub created_at: String,
}

pub fn get_track_features(
    conn: &Connection,
    artist: &str,
    title: &str,
) -> Result<Option<CachedTrackFeatures>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT query_artist, query_title, track_id, bpm, key, created_at
         FROM track_features_cache
         WHERE query_artist = ?1 AND query_title = ?2",
    )?;
    let mut rows = stmt.query_map(params![artist, title], |row| {
        Ok(CachedTrackFeatures {
            query_artist: row.get(0)?,
            query_title: row.get(1)?,
            track_id: row.get(2)?,
            bpm: row.get(3)?,
            key: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    match rows.next() {
        Some(Ok(entry)) => Ok(Some(entry)),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

pub fn set_track_features(
    conn: &Connection,
    artist: &str,
    title: &str,
    track_id: Option<&str>,
    bpm: Option<f64>,
    key: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO track_features_cache (query_artist, query_title, track_id, bpm, key)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(query_artist, query_title)
         DO UPDATE SET
            track_id = ?3,
            bpm = ?4,
            key = ?5,
            created_at = datetime('now')",
        params![artist, title, track_id, bpm, key],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SpotifyToken {
    pub account: String,
    pub access_token: String,
    pub expires_at: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub fn get_spotify_token(
    conn: &Connection,
    account: &str,
) -> Result<Option<SpotifyToken>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT account, access_token, expires_at, created_at, updated_at
         FROM spotify_token
         WHERE account = ?1",
    )?;
    let mut rows = stmt.query_map(params![account], |row| {
        Ok(SpotifyToken {
            account: row.get(0)?,
            access_token: row.get(1)?,
            expires_at: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    })?;
    match rows.next() {
        Some(Ok(entry)) => Ok(Some(entry)),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

pub fn set_spotify_token(
    conn: &Connection,
    account: &str,
    access_token: &str,
    expires_at: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO spotify_token (account, access_token, expires_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(account)
         DO UPDATE SET
            access_token = ?2,
            expires_at = ?3,
            updated_at = datetime('now')",
        params![account, access_token, expires_at],
    )?;
    Ok(())
}

pub fn clear_spotify_token(conn: &Connection, account: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "DELETE FROM spotify_token WHERE account = ?1",
        params![account],
    )?;
    Ok(())
}
