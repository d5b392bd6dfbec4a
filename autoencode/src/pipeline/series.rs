//! Process-wide in-flight and completed series sets.

use std::sync::Arc;

use dashmap::DashSet;
use tracing::trace;

/// Tracks which series are being processed and which finished this run.
///
/// Shared by every controller. Nothing here outlives the process.
#[derive(Debug, Default)]
pub struct SeriesTracker {
    ongoing: DashSet<String>,
    completed: DashSet<String>,
}

impl SeriesTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `key` for one controller.
    ///
    /// Returns `None` when another controller already holds it, unless
    /// `forced`, in which case a non-owning claim is returned so the
    /// original holder keeps its entry.
    pub fn claim(self: &Arc<Self>, key: &str, forced: bool) -> Option<SeriesClaim> {
        let owned = self.ongoing.insert(key.to_string());
        if !owned && !forced {
            return None;
        }
        trace!(series = %key, owned, "Series claimed");
        Some(SeriesClaim {
            tracker: Arc::clone(self),
            key: key.to_string(),
            owned,
        })
    }

    pub fn is_ongoing(&self, key: &str) -> bool {
        self.ongoing.contains(key)
    }

    pub fn is_completed(&self, key: &str) -> bool {
        self.completed.contains(key)
    }

    pub fn mark_completed(&self, key: &str) {
        self.completed.insert(key.to_string());
    }
}

/// Membership in the ongoing set, released on drop.
#[derive(Debug)]
pub struct SeriesClaim {
    tracker: Arc<SeriesTracker>,
    key: String,
    owned: bool,
}

impl SeriesClaim {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_owner(&self) -> bool {
        self.owned
    }
}

impl Drop for SeriesClaim {
    fn drop(&mut self) {
        if self.owned {
            self.tracker.ongoing.remove(&self.key);
            trace!(series = %self.key, "Series released");
        }
    }
}
