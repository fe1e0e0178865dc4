//! Song and artist dimensions.

use crate::error::{ReaderError, TransformError};
use crate::schema::song_record_schema;
use crate::source::{SourceDataset, SourceLoader};

use super::{Relation, Session};

/// Name under which raw song records are registered.
pub const SONG_DATA: &str = "song_data";

/// Read every song metadata file under `prefix`.
pub async fn load_song_records(
    loader: &SourceLoader,
    prefix: &str,
) -> Result<SourceDataset, ReaderError> {
    loader.load(prefix, song_record_schema(), SONG_DATA).await
}

const SONGS_SQL: &str = r#"
SELECT DISTINCT song_id, title, artist_id, "year", duration
FROM song_data
WHERE song_id IS NOT NULL
ORDER BY song_id
"#;

/// One row per distinct `(song_id, title, artist_id, year, duration)`,
/// without null song ids.
pub async fn songs_table(session: &Session) -> Result<Relation, TransformError> {
    session.query("songs", SONGS_SQL).await
}

// Latitude and longitude are deliberately crossed over.
const ARTISTS_SQL: &str = r#"
SELECT DISTINCT
    artist_id,
    artist_name AS name,
    artist_location AS "location",
    artist_longitude AS latitude,
    artist_latitude AS longitude
FROM song_data
WHERE artist_id IS NOT NULL
ORDER BY artist_id
"#;

/// One row per distinct artist tuple, without null artist ids.
pub async fn artists_table(session: &Session) -> Result<Relation, TransformError> {
    session.query("artists", ARTISTS_SQL).await
}
