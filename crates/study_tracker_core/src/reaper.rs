//! crates/study_tracker_core/src/reaper.rs
//!
//! The stale-session reaper sweep. Finds active sessions whose client went
//! quiet and force-closes them through the lifecycle manager, which is the
//! only other path out of `active` besides an explicit end or a superseding
//! start.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::error;

use crate::domain::SweptSession;
use crate::lifecycle::SessionLifecycleManager;
use crate::ports::SessionStore;

pub struct StaleSessionReaper {
    store: Arc<dyn SessionStore>,
    lifecycle: Arc<SessionLifecycleManager>,
    /// How long a session may go without a signal before it is considered
    /// abandoned. Minutes-scale: study sessions run tens of minutes.
    threshold: Duration,
}

impl StaleSessionReaper {
    pub fn new(
        store: Arc<dyn SessionStore>,
        lifecycle: Arc<SessionLifecycleManager>,
        threshold: Duration,
    ) -> Self {
        Self {
            store,
            lifecycle,
            threshold,
        }
    }

    /// One pass over all active sessions. A failure on one session is
    /// logged and the sweep moves on; losing the reaper would leave
    /// sessions permanently active.
    pub async fn sweep(&self) -> Vec<SweptSession> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Vec<SweptSession> {
        let candidates = match self.store.list_active_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("reaper could not list active sessions: {e}");
                return Vec::new();
            }
        };

        let mut swept = Vec::new();
        for session in candidates {
            // Cheap staleness check without the resource lock; the lifecycle
            // manager re-checks under the lock before closing anything, so a
            // racing client end signal always wins.
            let stale = match self.lifecycle.last_signal_at(&session).await {
                Ok(last_signal) => now - last_signal > self.threshold,
                Err(e) => {
                    error!(session_id = %session.id, "reaper pre-check failed: {e}");
                    continue;
                }
            };
            if !stale {
                continue;
            }

            match self
                .lifecycle
                .expire_session(session.id, self.threshold, now)
                .await
            {
                Ok(Some(event)) => swept.push(event),
                Ok(None) => {}
                Err(e) => {
                    error!(session_id = %session.id, "reaper force-close failed: {e}");
                }
            }
        }
        swept
    }
}
