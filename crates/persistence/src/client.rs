//! ScyllaDB client and connection management

use std::sync::Arc;

use scylla::{Session, SessionBuilder};
use voice_gateway_config::PersistenceConfig;

use crate::error::PersistenceError;
use crate::schema;

/// ScyllaDB client wrapper
#[derive(Clone)]
pub struct ScyllaClient {
    session: Arc<Session>,
    keyspace: String,
    replication_factor: u8,
}

impl ScyllaClient {
    /// Connect to the cluster named in `config`
    pub async fn connect(config: &PersistenceConfig) -> Result<Self, PersistenceError> {
        tracing::info!(hosts = ?config.hosts, keyspace = %config.keyspace, "Connecting to ScyllaDB");

        let session = SessionBuilder::new()
            .known_nodes(&config.hosts)
            .build()
            .await?;

        Ok(Self {
            session: Arc::new(session),
            keyspace: config.keyspace.clone(),
            replication_factor: config.replication_factor,
        })
    }

    /// Ensure keyspace and tables exist
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        schema::create_keyspace(&self.session, &self.keyspace, self.replication_factor).await?;
        schema::create_tables(&self.session, &self.keyspace).await?;
        tracing::info!(keyspace = %self.keyspace, "Schema ensured");
        Ok(())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }
}
