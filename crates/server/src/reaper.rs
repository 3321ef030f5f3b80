//! Heartbeat reaper
//!
//! Periodically ends sessions that stopped sending heartbeats, whether or
//! not a disconnect was ever observed. Sessions known only to the durable
//! store (left over from a previous process) are reclaimed too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use voice_gateway_persistence::{ConversationStore, PersistenceError, RetryPolicy, SessionRecord};

use crate::session::SessionRegistry;

const END_REASON: &str = "heartbeat_timeout";

/// Where the freshest heartbeat for a session came from
enum Candidate {
    Live(DateTime<Utc>),
    Stored(SessionRecord),
}

impl Candidate {
    fn last_seen(&self) -> DateTime<Utc> {
        match self {
            Candidate::Live(at) => *at,
            Candidate::Stored(record) => record.last_heartbeat_at,
        }
    }
}

/// Stale-session sweeper
pub struct HeartbeatReaper {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn ConversationStore>,
    policy: RetryPolicy,
    timeout: Duration,
    interval: Duration,
}

impl HeartbeatReaper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn ConversationStore>,
        policy: RetryPolicy,
        timeout: Duration,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            policy,
            timeout,
            interval,
        })
    }

    /// One sweep at `now`. Returns how many sessions this sweep ended.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let store = self.store.as_ref();
        let stored = self
            .policy
            .run("list_active_sessions", || store.list_active_sessions())
            .await?;

        let mut candidates: HashMap<String, Candidate> = stored
            .into_iter()
            .map(|record| (record.session_id.clone(), Candidate::Stored(record)))
            .collect();

        for session in self.registry.list() {
            if !session.is_active() {
                continue;
            }
            let live = session.last_heartbeat_at();
            candidates
                .entry(session.id.clone())
                .and_modify(|c| {
                    if live >= c.last_seen() {
                        *c = Candidate::Live(live);
                    }
                })
                .or_insert(Candidate::Live(live));
        }

        let timeout = chrono::Duration::from_std(self.timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let mut reaped = 0;

        for (session_id, candidate) in candidates {
            let silent_for = now - candidate.last_seen();
            if silent_for <= timeout {
                continue;
            }

            tracing::info!(
                session_id = %session_id,
                silent_secs = silent_for.num_seconds(),
                "Reaping stale session"
            );

            let ended = match &candidate {
                Candidate::Live(_) => self.registry.disconnect(&session_id, END_REASON).await,
                Candidate::Stored(record) => self.registry.end_orphan(record, END_REASON).await,
            };
            if ended {
                reaped += 1;
            }
        }

        if reaped > 0 {
            metrics::counter!("voice_gateway_sessions_reaped_total").increment(reaped as u64);
        }
        Ok(reaped)
    }

    /// Spawn the periodic sweep. Send `true` on the returned channel to stop it.
    pub fn start(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let reaper = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(reaper.interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match reaper.sweep_once(Utc::now()).await {
                            Ok(0) => {}
                            Ok(reaped) => tracing::info!(reaped, "Heartbeat sweep finished"),
                            Err(e) => tracing::error!(error = %e, "Heartbeat sweep failed, retrying next interval"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Heartbeat reaper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}
