// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Registry of live dev-mode sessions and their teardown listeners.
//!
//! The registry is the single source of truth for "is project X's session
//! alive, and who wants to know when it goes away". It is an explicitly
//! constructed, cheaply cloneable handle; every component that needs it is
//! handed a clone.
//!
//! The map lock is held only for map bookkeeping. Stopping processes and
//! running listener callbacks always happen after it is released, so a slow
//! teardown for one project never blocks another project, and a listener may
//! call back into the registry.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EventBroadcaster, EventKind};
use super::process::ProcessSession;
use super::state::{CloseReason, SessionStatus};

/// Something that must be told when a project's session is torn down.
pub trait TeardownListener: Send + Sync {
    /// Called at most once per registration, when the session closes or the
    /// project is cleaned up.
    fn cleanup(&self);
}

/// Cancelling a token is the usual reaction to teardown.
impl TeardownListener for CancellationToken {
    fn cleanup(&self) {
        self.cancel();
    }
}

/// Tag identifying one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    listener: Arc<dyn TeardownListener>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, Arc<ProcessSession>>,
    /// Projects whose last session closed and has not been replaced.
    closed: HashSet<String>,
    listeners: HashMap<String, Vec<Registration>>,
}

pub(crate) struct RegistryInner {
    state: Mutex<RegistryState>,
    next_listener: AtomicU64,
    events: EventBroadcaster,
}

/// Concurrent mapping of project name to session, plus listener sets.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Creates an empty registry with its own event broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                next_listener: AtomicU64::new(1),
                events: EventBroadcaster::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<RegistryInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Lifecycle events for every project in this registry.
    #[must_use]
    pub fn events(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    /// Registers `session` under its project name.
    ///
    /// Any session already registered for that name is removed and fully
    /// stopped before the new one becomes visible.
    pub async fn put(&self, session: Arc<ProcessSession>) {
        let project = session.project().to_string();

        loop {
            let evicted = {
                let mut state = self.lock();
                match state.sessions.remove(&project) {
                    Some(old) if Arc::ptr_eq(&old, &session) => {
                        state.sessions.insert(project.clone(), old);
                        return;
                    }
                    Some(old) => old,
                    None => {
                        state.closed.remove(&project);
                        state.sessions.insert(project.clone(), session);
                        break;
                    }
                }
            };

            info!("Replacing dev mode session for {}", project);
            evicted.stop_with(CloseReason::Replaced).await;
        }

        debug!("Registered dev mode session for {}", project);
    }

    /// Returns the live session for `project`, if any.
    #[must_use]
    pub fn get(&self, project: &str) -> Option<Arc<ProcessSession>> {
        self.lock().sessions.get(project).cloned()
    }

    /// Removes the session for `project` without stopping it.
    ///
    /// The caller takes over responsibility for the returned session.
    pub fn remove(&self, project: &str) -> Option<Arc<ProcessSession>> {
        self.lock().sessions.remove(project)
    }

    /// Stops the session for `project`. Returns `false` if none was running.
    pub async fn stop(&self, project: &str) -> bool {
        match self.get(project) {
            Some(session) => {
                session.stop().await;
                true
            }
            None => false,
        }
    }

    /// Tears down everything associated with a disposed terminal.
    ///
    /// Stops the session (killing its server process) if one is live;
    /// otherwise still runs the project's listeners so nobody waits on a
    /// terminal that no longer exists.
    pub async fn dispose(&self, project: &str) {
        if let Some(session) = self.get(project) {
            session.stop_with(CloseReason::Disposed).await;
        } else {
            self.lock().closed.insert(project.to_string());
            self.notify_and_clear(project);
        }
    }

    /// Returns `true` if the project's session has been closed and not
    /// replaced. Never blocks on anything but the map lock.
    #[must_use]
    pub fn is_marked_closed(&self, project: &str) -> bool {
        self.lock().closed.contains(project)
    }

    /// Adds a teardown listener for `project`. No session needs to exist yet.
    pub fn register_listener(
        &self,
        project: &str,
        listener: Arc<dyn TeardownListener>,
    ) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .listeners
            .entry(project.to_string())
            .or_default()
            .push(Registration { id, listener });
        id
    }

    /// Removes a listener. Safe to call after the listener has already fired.
    pub fn deregister_listener(&self, project: &str, id: ListenerId) -> bool {
        let mut state = self.lock();
        let Some(registrations) = state.listeners.get_mut(project) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            state.listeners.remove(project);
        }
        removed
    }

    /// Number of listeners currently registered for `project`.
    #[must_use]
    pub fn listener_count(&self, project: &str) -> usize {
        self.lock().listeners.get(project).map_or(0, Vec::len)
    }

    /// Invokes every listener for `project` and clears the set.
    ///
    /// A listener that panics is logged and skipped; the rest still run.
    /// Returns how many listeners were invoked.
    pub fn notify_and_clear(&self, project: &str) -> usize {
        let registrations = self.lock().listeners.remove(project).unwrap_or_default();

        for registration in &registrations {
            let outcome = catch_unwind(AssertUnwindSafe(|| registration.listener.cleanup()));
            if outcome.is_err() {
                warn!(
                    "Teardown listener {:?} for {} panicked",
                    registration.id, project
                );
            }
        }

        registrations.len()
    }

    /// Names of projects with a live session, sorted.
    #[must_use]
    pub fn projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.lock().sessions.keys().cloned().collect();
        projects.sort();
        projects
    }

    /// Returns status of all live sessions, sorted by project.
    #[must_use]
    pub fn all_status(&self) -> Vec<SessionStatus> {
        let sessions: Vec<Arc<ProcessSession>> = self.lock().sessions.values().cloned().collect();
        let mut statuses: Vec<SessionStatus> = sessions.iter().map(|s| s.status()).collect();
        statuses.sort_by(|a, b| a.project.cmp(&b.project));
        statuses
    }

    /// Stops every live session. Projects are stopped concurrently.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<ProcessSession>> = self
            .lock()
            .sessions
            .drain()
            .map(|(_, session)| session)
            .collect();

        if sessions.is_empty() {
            return;
        }

        info!("Stopping {} dev mode session(s)", sessions.len());

        let mut stops = JoinSet::new();
        for session in sessions {
            stops.spawn(async move { session.stop_with(CloseReason::Shutdown).await });
        }
        while let Some(result) = stops.join_next().await {
            if let Err(e) = result {
                warn!("Session stop task failed: {}", e);
            }
        }
    }

    /// Bookkeeping for a session that just transitioned to closed.
    pub(crate) fn session_closed(&self, session: &ProcessSession, reason: CloseReason) {
        let project = session.project();

        let owns_name = {
            let mut state = self.lock();
            let current = state
                .sessions
                .get(project)
                .map(|s| std::ptr::eq(Arc::as_ptr(s), session));

            match current {
                Some(false) => false,
                Some(true) => {
                    state.sessions.remove(project);
                    state.closed.insert(project.to_string());
                    true
                }
                None => {
                    state.closed.insert(project.to_string());
                    true
                }
            }
        };

        if owns_name {
            let notified = self.notify_and_clear(project);
            info!(
                "Dev mode session for {} closed ({}), notified {} listener(s)",
                project, reason, notified
            );
        } else {
            debug!(
                "Superseded session for {} closed ({}); a newer session owns the name",
                project, reason
            );
        }

        self.inner.events.send(EventKind::Closed {
            project: project.to_string(),
            reason,
        });
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
