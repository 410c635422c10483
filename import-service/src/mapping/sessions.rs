//! In-memory registry of import sessions, scoped by team.
//!
//! Sessions that go untouched for longer than the idle TTL are dropped and
//! their suggestion request cancelled, either on the next lookup or by the
//! periodic sweep.

use super::form::OverwritePolicy;
use super::reconciler::ImportSession;
use crate::services::metrics;
use crate::services::providers::SuggestionProvider;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

struct Entry {
    team_id: String,
    session: ImportSession,
    last_touched: Instant,
}

impl Entry {
    fn is_idle(&self, ttl: Duration) -> bool {
        self.last_touched.elapsed() >= ttl
    }
}

#[derive(Clone)]
pub struct ImportSessions {
    provider: Arc<dyn SuggestionProvider>,
    policy: OverwritePolicy,
    idle_ttl: Duration,
    sessions: Arc<DashMap<Uuid, Entry>>,
}

impl ImportSessions {
    pub fn new(
        provider: Arc<dyn SuggestionProvider>,
        policy: OverwritePolicy,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            policy,
            idle_ttl,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn provider(&self) -> Arc<dyn SuggestionProvider> {
        self.provider.clone()
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn create(&self, team_id: &str) -> (Uuid, ImportSession) {
        let id = Uuid::new_v4();
        let session = ImportSession::new(self.provider.clone(), self.policy);
        self.sessions.insert(
            id,
            Entry {
                team_id: team_id.to_string(),
                session: session.clone(),
                last_touched: Instant::now(),
            },
        );
        metrics::record_session_created();
        tracing::info!(session_id = %id, team_id, "Import session created");
        (id, session)
    }

    /// Session `id` if it belongs to `team_id` and has not expired.
    /// A successful lookup counts as activity.
    pub fn get(&self, team_id: &str, id: Uuid) -> Option<ImportSession> {
        let mut entry = self.sessions.get_mut(&id)?;
        if entry.team_id != team_id {
            return None;
        }
        if entry.is_idle(self.idle_ttl) {
            drop(entry);
            self.expire(id);
            return None;
        }
        entry.last_touched = Instant::now();
        Some(entry.session.clone())
    }

    /// Drop session `id`, cancelling its suggestion request.
    pub fn remove(&self, team_id: &str, id: Uuid) -> bool {
        match self
            .sessions
            .remove_if(&id, |_, entry| entry.team_id == team_id)
        {
            Some((_, entry)) => {
                entry.session.cancel();
                true
            }
            None => false,
        }
    }

    fn expire(&self, id: Uuid) {
        let ttl = self.idle_ttl;
        if let Some((_, entry)) = self.sessions.remove_if(&id, |_, entry| entry.is_idle(ttl)) {
            entry.session.cancel();
            tracing::info!(session_id = %id, team_id = %entry.team_id, "Import session expired");
        }
    }

    /// Drop every session idle for at least the TTL. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        let ttl = self.idle_ttl;
        let mut evicted = 0;
        self.sessions.retain(|_, entry| {
            if entry.is_idle(ttl) {
                entry.session.cancel();
                evicted += 1;
                false
            } else {
                true
            }
        });
        if evicted > 0 {
            tracing::info!(evicted, remaining = self.sessions.len(), "Evicted idle import sessions");
        }
        evicted
    }

    /// Run [`Self::evict_idle`] every `every` until the task is aborted.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sessions.evict_idle();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
