//! Songplays fact table.
//!
//! Plays are matched to song metadata on artist name, title and duration.
//! `songplay_id` is a dense 0-based sequence over the globally sorted
//! result, so identical inputs always yield identical ids.

use super::{Relation, Session};
use crate::error::TransformError;

fn length_condition(tolerance: Option<f64>) -> String {
    match tolerance {
        Some(tolerance) => format!("ABS(p.\"length\" - s.duration) <= {tolerance}"),
        None => "p.\"length\" = s.duration".to_string(),
    }
}

fn songplays_sql(tolerance: Option<f64>) -> String {
    format!(
        r#"
SELECT
    CAST(ROW_NUMBER() OVER (
        ORDER BY start_time, user_id, session_id, song_id, artist_id,
                 "level", "location", user_agent
    ) AS BIGINT) - 1 AS songplay_id,
    start_time,
    user_id,
    "level",
    song_id,
    artist_id,
    session_id,
    "location",
    user_agent,
    CAST(date_part('month', start_time) AS INT) AS "month",
    CAST(date_part('year', start_time) AS INT) AS "year"
FROM (
    SELECT DISTINCT
        p.start_time AS start_time,
        p."userId" AS user_id,
        p."level" AS "level",
        s.song_id AS song_id,
        s.artist_id AS artist_id,
        p."sessionId" AS session_id,
        p."location" AS "location",
        p."userAgent" AS user_agent
    FROM plays p
    JOIN song_data s
      ON p.artist = s.artist_name
     AND p.song = s.title
     AND {length}
) matched
ORDER BY songplay_id
"#,
        length = length_condition(tolerance)
    )
}

/// Join plays against song metadata.
///
/// Expects `plays` and `song_data` to be registered in `session`. Events
/// with no matching song contribute nothing; an empty result is valid.
/// Without a tolerance, `length` must equal `duration` exactly.
pub async fn songplays_table(
    session: &Session,
    duration_tolerance: Option<f64>,
) -> Result<Relation, TransformError> {
    session
        .query("songplays", &songplays_sql(duration_tolerance))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeZoneConfig;
    use crate::transform::logs::register_plays;
    use crate::transform::test_support::{Event, Song, concat, log_relation, song_relation};
    use datafusion::arrow::array::{AsArray, RecordBatch};
    use datafusion::arrow::datatypes::{Int32Type, Int64Type, TimestampMicrosecondType};

    async fn session(songs: &[Song], events: &[Event]) -> Session {
        let session = Session::new();
        session.register(&song_relation(songs)).unwrap();
        register_plays(&session, log_relation(events), &TimeZoneConfig::Utc)
            .await
            .unwrap();
        session
    }

    fn string(batch: &RecordBatch, column: &str, row: usize) -> String {
        batch
            .column_by_name(column)
            .unwrap()
            .as_string::<i32>()
            .value(row)
            .to_string()
    }

    #[tokio::test]
    async fn test_single_match() {
        let session = session(
            &[Song::new("S1", "X", "A1", "Art", 2000, 200.5)],
            &[Event::play("42", "free", 1541121934796, "Art", "X", 200.5)],
        )
        .await;

        let songplays = songplays_table(&session, None).await.unwrap();
        assert_eq!(songplays.num_rows(), 1);

        let names: Vec<_> = songplays
            .schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(
            names,
            [
                "songplay_id",
                "start_time",
                "user_id",
                "level",
                "song_id",
                "artist_id",
                "session_id",
                "location",
                "user_agent",
                "month",
                "year"
            ]
        );

        let batch = concat(&songplays);
        assert_eq!(
            batch
                .column_by_name("songplay_id")
                .unwrap()
                .as_primitive::<Int64Type>()
                .value(0),
            0
        );
        assert_eq!(string(&batch, "song_id", 0), "S1");
        assert_eq!(string(&batch, "artist_id", 0), "A1");
        assert_eq!(string(&batch, "user_id", 0), "42");
        assert_eq!(string(&batch, "level", 0), "free");
        let start = batch
            .column_by_name("start_time")
            .unwrap()
            .as_primitive::<TimestampMicrosecondType>();
        assert_eq!(
            start.value_as_datetime(0).unwrap().to_string(),
            "2018-11-02 01:25:34"
        );
        let month = batch
            .column_by_name("month")
            .unwrap()
            .as_primitive::<Int32Type>();
        let year = batch
            .column_by_name("year")
            .unwrap()
            .as_primitive::<Int32Type>();
        assert_eq!((month.value(0), year.value(0)), (11, 2018));
    }

    #[tokio::test]
    async fn test_unmatched_and_non_play_events_are_dropped() {
        let session = session(
            &[Song::new("S1", "X", "A1", "Art", 2000, 200.5)],
            &[
                Event::play("42", "free", 1541121934796, "Art", "Other", 200.5),
                Event::play("42", "free", 1541121935796, "Someone", "X", 200.5),
                Event::play("42", "free", 1541121936796, "Art", "X", 200.50001),
                Event {
                    page: "Home",
                    ..Event::play("42", "free", 1541121937796, "Art", "X", 200.5)
                },
            ],
        )
        .await;

        let songplays = songplays_table(&session, None).await.unwrap();
        assert_eq!(songplays.num_rows(), 0);
        assert_eq!(songplays.schema.fields().len(), 11);
    }

    #[tokio::test]
    async fn test_tolerance_admits_near_durations() {
        let session = session(
            &[Song::new("S1", "X", "A1", "Art", 2000, 200.5)],
            &[Event::play("42", "free", 1541121936796, "Art", "X", 200.50001)],
        )
        .await;

        assert_eq!(songplays_table(&session, None).await.unwrap().num_rows(), 0);
        let songplays = songplays_table(&session, Some(0.001)).await.unwrap();
        assert_eq!(songplays.num_rows(), 1);
    }

    #[tokio::test]
    async fn test_ids_follow_sort_order_and_are_stable() {
        let songs = [
            Song::new("S1", "X", "A1", "Art", 2000, 200.5),
            Song::new("S2", "Y", "A2", "Band", 1999, 100.0),
        ];
        let events = [
            Event::play("7", "paid", 1541200000000, "Band", "Y", 100.0),
            Event::play("42", "free", 1541121934796, "Art", "X", 200.5),
            Event::play("42", "free", 1541150000000, "Band", "Y", 100.0),
        ];

        let mut runs = Vec::new();
        for _ in 0..2 {
            let session = session(&songs, &events).await;
            let batch = concat(&songplays_table(&session, None).await.unwrap());
            let ids = batch
                .column_by_name("songplay_id")
                .unwrap()
                .as_primitive::<Int64Type>()
                .values()
                .to_vec();
            let rows: Vec<_> = (0..batch.num_rows())
                .map(|i| {
                    (
                        ids[i],
                        string(&batch, "user_id", i),
                        string(&batch, "song_id", i),
                    )
                })
                .collect();
            runs.push(rows);
        }

        assert_eq!(
            runs[0],
            vec![
                (0, "42".to_string(), "S1".to_string()),
                (1, "42".to_string(), "S2".to_string()),
                (2, "7".to_string(), "S2".to_string()),
            ]
        );
        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn test_duplicate_plays_collapse() {
        let session = session(
            &[Song::new("S1", "X", "A1", "Art", 2000, 200.5)],
            &[
                Event::play("42", "free", 1541121934796, "Art", "X", 200.5),
                Event::play("42", "free", 1541121934100, "Art", "X", 200.5),
            ],
        )
        .await;
        let songplays = songplays_table(&session, None).await.unwrap();
        assert_eq!(songplays.num_rows(), 1);
    }

    #[test]
    fn test_length_condition() {
        assert_eq!(length_condition(None), "p.\"length\" = s.duration");
        assert_eq!(
            length_condition(Some(0.5)),
            "ABS(p.\"length\" - s.duration) <= 0.5"
        );
    }
}
