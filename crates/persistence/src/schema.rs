//! Keyspace and table definitions

use scylla::Session;

use crate::PersistenceError;

pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
         {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, ())
        .await
        .map_err(|e| PersistenceError::Schema(e.to_string()))?;
    Ok(())
}

pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    let statements = [
        format!(
            "CREATE TABLE IF NOT EXISTS {}.sessions (
                session_id text PRIMARY KEY,
                user_id text,
                started_at bigint,
                ended_at bigint,
                is_active boolean,
                last_heartbeat_at bigint,
                duration_ms bigint,
                turn_count int,
                interruption_count int,
                end_reason text,
                metadata_json text
            )",
            keyspace
        ),
        // The reaper's sweep filters on is_active
        format!(
            "CREATE INDEX IF NOT EXISTS sessions_is_active_idx ON {}.sessions (is_active)",
            keyspace
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.turns (
                session_id text,
                sequence bigint,
                role text,
                content text,
                audio_ref text,
                processing_time_ms bigint,
                error text,
                created_at bigint,
                PRIMARY KEY (session_id, sequence)
            ) WITH CLUSTERING ORDER BY (sequence ASC)",
            keyspace
        ),
    ];

    for statement in statements {
        session
            .query_unpaged(statement, ())
            .await
            .map_err(|e| PersistenceError::Schema(e.to_string()))?;
    }

    Ok(())
}
