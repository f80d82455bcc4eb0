//! In-memory registry of live training sessions.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use playground_core::{
    ProgressChannel, ProgressEvent, SessionId, SessionStatus, TrainRequest, TrainingSpec,
    ValidationError,
};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Live session record.
///
/// Status changes go through this handle only. The status lock is held while
/// an event is published, so nothing can be published after the terminal
/// event.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    spec: TrainingSpec,
    started_at: DateTime<Utc>,
    started: Instant,
    timeout: Duration,
    status: Mutex<SessionStatus>,
    cancel: CancellationToken,
}

impl SessionHandle {
    fn new(id: SessionId, spec: TrainingSpec, timeout: Duration) -> Self {
        Self {
            id,
            spec,
            started_at: Utc::now(),
            started: Instant::now(),
            timeout,
            status: Mutex::new(SessionStatus::Initializing),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn spec(&self) -> &TrainingSpec {
        &self.spec
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock deadline, a fixed offset from `started_at`.
    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.timeout)
            .ok()
            .and_then(|d| self.started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Token tripped when the session must stop.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Move to `Training` and publish `started`. Fails if already terminal.
    pub(crate) fn begin_training(&self, channel: &ProgressChannel, total_epochs: u32) -> bool {
        let mut status = self.status.lock();
        if !status.can_transition_to(SessionStatus::Training) {
            return false;
        }
        *status = SessionStatus::Training;
        channel.publish(self.id, &ProgressEvent::Started { total_epochs });
        true
    }

    /// Publish a non-terminal event unless the session already ended.
    pub(crate) fn publish_if_active(&self, channel: &ProgressChannel, event: &ProgressEvent) -> bool {
        let status = self.status.lock();
        if status.is_terminal() {
            return false;
        }
        channel.publish(self.id, event);
        true
    }

    /// Enter a terminal status and publish its event.
    ///
    /// Only the first caller wins; later callers get `false` and publish
    /// nothing.
    pub(crate) fn finish(
        &self,
        channel: &ProgressChannel,
        terminal: SessionStatus,
        event: &ProgressEvent,
    ) -> bool {
        debug_assert!(terminal.is_terminal() && event.is_terminal());
        let mut status = self.status.lock();
        if !status.can_transition_to(terminal) {
            return false;
        }
        *status = terminal;
        channel.publish(self.id, event);
        true
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            status: self.status(),
            dataset: self.spec.dataset.to_string(),
            started_at: self.started_at,
            deadline: self.deadline(),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub status: SessionStatus,
    pub dataset: String,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Registry of live sessions keyed by id.
///
/// Backed by a sharded map; operations on one session never block on another.
/// Removing a session also discards its progress topic.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    channel: Arc<ProgressChannel>,
    timeout: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(channel: Arc<ProgressChannel>, timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            channel,
            timeout,
        }
    }

    /// Validate a request and register an `Initializing` session for it.
    ///
    /// # Errors
    /// Returns the validation error; nothing is registered in that case.
    pub fn create(&self, request: TrainRequest) -> Result<Arc<SessionHandle>, ValidationError> {
        let spec = request.validate()?;
        Ok(self.insert(spec))
    }

    fn insert(&self, spec: TrainingSpec) -> Arc<SessionHandle> {
        loop {
            let id = Uuid::new_v4();
            if let Entry::Vacant(slot) = self.sessions.entry(id) {
                let handle = Arc::new(SessionHandle::new(id, spec, self.timeout));
                slot.insert(Arc::clone(&handle));
                self.channel.open(id);
                return handle;
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.sessions.get(&id).map(|h| h.snapshot())
    }

    pub(crate) fn handle(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|h| Arc::clone(&h))
    }

    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Remove a session and close its topic. Unknown ids are a no-op.
    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.remove(&id).map(|(_, h)| h);
        if removed.is_some() {
            self.channel.close(id);
        }
        removed
    }

    /// Snapshots of every live session, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> =
            self.sessions.iter().map(|h| h.snapshot()).collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
