//! Play events and the user and time dimensions.
//!
//! Raw log records get a derived `start_time` before registration. Only
//! `NextSong` events are plays; every downstream derivation (users, time,
//! songplays) reads the filtered `plays` view.

use tracing::debug;

use crate::config::TimeZoneConfig;
use crate::error::{ReaderError, TransformError};
use crate::schema::log_record_schema;
use crate::source::{SourceDataset, SourceLoader};

use super::{Relation, Session, with_start_time};

/// Name under which raw log records are registered.
pub const LOG_DATA: &str = "log_data";

/// Name of the filtered play events view.
pub const PLAYS: &str = "plays";

/// Page value marking a song play.
pub const NEXT_SONG: &str = "NextSong";

/// Read every activity log file under `prefix`.
pub async fn load_log_records(
    loader: &SourceLoader,
    prefix: &str,
) -> Result<SourceDataset, ReaderError> {
    loader.load(prefix, log_record_schema(), LOG_DATA).await
}

/// Register raw log records and the `plays` view over them.
///
/// `log_data` keeps every event, with `start_time` appended; `plays` holds
/// only `NextSong` events.
pub async fn register_plays(
    session: &Session,
    logs: Relation,
    time_zone: &TimeZoneConfig,
) -> Result<(), TransformError> {
    let (schema, batches) = with_start_time(&logs.schema, &logs.batches, time_zone)?;
    let logs = Relation::new(LOG_DATA, schema, batches);
    session.register(&logs)?;

    let sql = format!("SELECT * FROM {LOG_DATA} WHERE page = '{NEXT_SONG}'");
    session.register_view(PLAYS, &sql).await?;
    debug!("Registered {} over {} log events", PLAYS, logs.num_rows());
    Ok(())
}

// Latest event wins; equal timestamps fall back to ingestion order.
const USERS_SQL: &str = r#"
SELECT user_id, first_name, last_name, gender, "level"
FROM (
    SELECT
        "userId" AS user_id,
        "firstName" AS first_name,
        "lastName" AS last_name,
        gender,
        "level",
        ROW_NUMBER() OVER (
            PARTITION BY "userId"
            ORDER BY ts DESC NULLS LAST, _ordinal ASC
        ) AS rn
    FROM plays
    WHERE "userId" IS NOT NULL
) ranked
WHERE rn = 1
ORDER BY user_id
"#;

/// One row per non-null user id, taken from that user's latest play.
pub async fn users_table(session: &Session) -> Result<Relation, TransformError> {
    session.query("users", USERS_SQL).await
}

// dow counts from 0 = Sunday; weekday counts from 1 = Sunday.
const TIME_SQL: &str = r#"
SELECT
    start_time,
    CAST(date_part('hour', start_time) AS INT) AS "hour",
    CAST(date_part('day', start_time) AS INT) AS "day",
    CAST(date_part('week', start_time) AS INT) AS "week",
    CAST(date_part('month', start_time) AS INT) AS "month",
    CAST(date_part('year', start_time) AS INT) AS "year",
    CAST(date_part('dow', start_time) + 1 AS INT) AS weekday
FROM (
    SELECT DISTINCT start_time
    FROM plays
    WHERE start_time IS NOT NULL
) starts
ORDER BY start_time
"#;

/// One row per distinct play start time with its calendar breakdown.
pub async fn time_table(session: &Session) -> Result<Relation, TransformError> {
    session.query("time", TIME_SQL).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_support::{Event, concat, log_relation};
    use datafusion::arrow::array::{Array, AsArray};
    use datafusion::arrow::datatypes::{Int32Type, TimestampMicrosecondType};

    async fn session(events: &[Event]) -> Session {
        let session = Session::new();
        register_plays(&session, log_relation(events), &TimeZoneConfig::Utc)
            .await
            .unwrap();
        session
    }

    fn users(relation: &Relation) -> Vec<(String, String, String)> {
        relation
            .batches
            .iter()
            .flat_map(|batch| {
                let ids = batch.column_by_name("user_id").unwrap().as_string::<i32>();
                let names = batch
                    .column_by_name("first_name")
                    .unwrap()
                    .as_string::<i32>();
                let levels = batch.column_by_name("level").unwrap().as_string::<i32>();
                (0..batch.num_rows())
                    .map(|i| {
                        (
                            ids.value(i).to_string(),
                            names.value(i).to_string(),
                            levels.value(i).to_string(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_users_keep_latest_event() {
        let session = session(&[
            Event::play("42", "free", 1541121934796, "Art", "X", 200.5),
            Event::play("42", "paid", 1541122934796, "Art", "X", 200.5),
            Event::play("7", "free", 1541120000000, "Art", "X", 200.5),
        ])
        .await;

        let users = users(&users_table(&session).await.unwrap());
        assert_eq!(
            users,
            vec![
                ("42".to_string(), "Lily".to_string(), "paid".to_string()),
                ("7".to_string(), "Lily".to_string(), "free".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_users_tie_prefers_first_ingested() {
        let mut first = Event::play("42", "free", 1541121934796, "Art", "X", 200.5);
        first.first_name = "First";
        let mut second = Event::play("42", "paid", 1541121934796, "Art", "X", 200.5);
        second.first_name = "Second";
        let session = session(&[first, second]).await;

        let users = users(&users_table(&session).await.unwrap());
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].1, "First");
    }

    #[tokio::test]
    async fn test_users_ignore_other_pages_and_null_ids() {
        let mut anonymous = Event::play("x", "free", 1541121934796, "Art", "X", 200.5);
        anonymous.user_id = None;
        let session = session(&[
            Event::page("8", "Home", 1541121934796),
            Event::page("42", "Logout", 1541199999999),
            Event::play("42", "free", 1541121934796, "Art", "X", 200.5),
            anonymous,
        ])
        .await;

        let users = users(&users_table(&session).await.unwrap());
        assert_eq!(
            users,
            vec![("42".to_string(), "Lily".to_string(), "free".to_string())]
        );
    }

    #[tokio::test]
    async fn test_time_calendar_fields() {
        let session = session(&[
            // 2018-11-02 01:25:34 UTC, a Friday in ISO week 44
            Event::play("42", "free", 1541121934796, "Art", "X", 200.5),
            // same second, different millis
            Event::play("7", "free", 1541121934001, "Art", "X", 200.5),
            // 2018-11-04 10:00:00 UTC, a Sunday
            Event::play("7", "free", 1541325600000, "Art", "X", 200.5),
            Event::page("8", "Home", 1541000000000),
            // 2018-12-31 00:00:00 UTC, a Monday in week 1 of 2019
            Event::play("9", "free", 1546214400000, "Art", "X", 200.5),
            // 2021-01-01 00:00:00 UTC, a Friday in week 53 of 2020
            Event::play("9", "free", 1609459200000, "Art", "X", 200.5),
        ])
        .await;

        let time = time_table(&session).await.unwrap();
        assert_eq!(time.num_rows(), 4);

        let names: Vec<_> = time
            .schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(
            names,
            ["start_time", "hour", "day", "week", "month", "year", "weekday"]
        );

        let batch = concat(&time);
        let int = |name: &str, row: usize| {
            batch
                .column_by_name(name)
                .unwrap()
                .as_primitive::<Int32Type>()
                .value(row)
        };
        let start = batch
            .column_by_name("start_time")
            .unwrap()
            .as_primitive::<TimestampMicrosecondType>();
        assert!(!start.is_null(0));
        assert_eq!(
            start.value_as_datetime(0).unwrap().to_string(),
            "2018-11-02 01:25:34"
        );
        assert_eq!(int("hour", 0), 1);
        assert_eq!(int("day", 0), 2);
        assert_eq!(int("week", 0), 44);
        assert_eq!(int("month", 0), 11);
        assert_eq!(int("year", 0), 2018);
        assert_eq!(int("weekday", 0), 6);

        assert_eq!(int("day", 1), 4);
        assert_eq!(int("weekday", 1), 1);

        assert_eq!(int("week", 2), 1);
        assert_eq!(int("year", 2), 2018);
        assert_eq!(int("weekday", 2), 2);
        assert_eq!(int("week", 3), 53);
        assert_eq!(int("year", 3), 2021);
    }
}
