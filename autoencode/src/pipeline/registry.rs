//! Registry of in-flight pipeline controllers.
//!
//! Entries are added when a controller is spawned and reaped once its state
//! reaches a terminal value. Reaping happens at the end of every controller
//! run, so the registry never grows beyond the number of active items.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Error, Result};

/// Externally visible controller state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerState {
    Discovered,
    /// Waiting for admission.
    Queued,
    Encoding {
        quality: String,
    },
    Publishing {
        quality: String,
    },
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Skipped | Self::Failed | Self::Cancelled
        )
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::Queued => write!(f, "queued"),
            Self::Encoding { quality } => write!(f, "encoding {}", quality),
            Self::Publishing { quality } => write!(f, "publishing {}", quality),
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Registry-side view of one controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    cancel: CancellationToken,
    state: watch::Receiver<ControllerState>,
}

impl ControllerHandle {
    /// Create a handle plus the sender the controller publishes its state on.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        cancel: CancellationToken,
    ) -> (Self, watch::Sender<ControllerState>) {
        let (tx, rx) = watch::channel(ControllerState::Discovered);
        let handle = Self {
            id: id.into(),
            display_name: display_name.into(),
            created_at: Utc::now(),
            cancel,
            state: rx,
        };
        (handle, tx)
    }

    pub fn state(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    /// Terminal, or the controller went away without saying so.
    pub fn is_finished(&self) -> bool {
        self.state.borrow().is_terminal() || self.state.has_changed().is_err()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: parking_lot::Mutex<HashMap<String, ControllerHandle>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ControllerHandle) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&handle.id) {
            return Err(Error::validation(format!(
                "controller {} is already registered",
                handle.id
            )));
        }
        debug!(id = %handle.id, name = %handle.display_name, "Controller registered");
        entries.insert(handle.id.clone(), handle);
        Ok(())
    }

    /// Signal cancellation. Returns false for unknown or finished controllers.
    pub fn cancel(&self, id: &str) -> bool {
        let entries = self.entries.lock();
        match entries.get(id) {
            Some(handle) if !handle.is_finished() => {
                info!(id = %id, name = %handle.display_name, "Cancelling controller");
                handle.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let entries = self.entries.lock();
        let mut cancelled = 0;
        for handle in entries.values().filter(|h| !h.is_finished()) {
            handle.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Drop every finished entry, returning how many were removed.
    pub fn reap(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, handle| !handle.is_finished());
        let reaped = before - entries.len();
        if reaped > 0 {
            debug!(reaped, remaining = entries.len(), "Reaped finished controllers");
        }
        reaped
    }

    pub fn state(&self, id: &str) -> Option<ControllerState> {
        self.entries.lock().get(id).map(ControllerHandle::state)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Wait until every registered controller is terminal.
    pub async fn wait_idle(&self) {
        let receivers: Vec<_> = self
            .entries
            .lock()
            .values()
            .map(|h| h.state.clone())
            .collect();
        for mut rx in receivers {
            // A dropped sender means the controller task is gone.
            let _ = rx.wait_for(ControllerState::is_terminal).await;
        }
    }
}
