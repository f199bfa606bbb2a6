//! Rendering groups: members of one page start output together.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use portal_core::WindowId;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Outcome of waiting on a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupWait {
    /// Every member checked in (or the group was released).
    Ready,
    /// The deadline passed first.
    TimedOut,
}

struct GroupInner {
    id: String,
    pending: Mutex<HashSet<WindowId>>,
    released: watch::Sender<bool>,
}

/// Barrier across the units of one page.
///
/// Each member checks in once it has consumed its request parameters; no
/// member starts producing output until all have checked in, a member times
/// out, or the group is released. Checking in twice is harmless.
#[derive(Clone)]
pub struct RenderingGroup {
    inner: Arc<GroupInner>,
}

impl RenderingGroup {
    /// Create a group expecting the given members.
    pub fn new(id: impl Into<String>, members: impl IntoIterator<Item = WindowId>) -> Self {
        let pending: HashSet<WindowId> = members.into_iter().collect();
        let (released, _) = watch::channel(pending.is_empty());
        Self {
            inner: Arc::new(GroupInner {
                id: id.into(),
                pending: Mutex::new(pending),
                released,
            }),
        }
    }

    /// Group identifier for logs.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Record that `window` is ready. Releases the group when it was the last.
    pub fn check_in(&self, window: &WindowId) {
        let remaining = {
            let mut pending = self.inner.pending.lock();
            pending.remove(window);
            pending.len()
        };
        if remaining == 0 && !self.is_released() {
            debug!(group = %self.inner.id, "all members checked in");
            self.inner.released.send_replace(true);
        }
    }

    /// Check in and wait for the rest of the group until `deadline`.
    pub async fn check_in_and_wait(&self, window: &WindowId, deadline: Instant) -> GroupWait {
        self.check_in(window);
        self.wait_released(deadline).await
    }

    /// Wait for the group to be released until `deadline`.
    ///
    /// The first member to time out releases the group so the others stop
    /// waiting on the laggard.
    pub async fn wait_released(&self, deadline: Instant) -> GroupWait {
        let mut released = self.inner.released.subscribe();
        let wait = async move { released.wait_for(|r| *r).await.map(|_| ()) };

        match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), wait).await {
            Ok(_) => GroupWait::Ready,
            Err(_) => {
                warn!(
                    group = %self.inner.id,
                    pending = self.pending().len(),
                    "rendering group wait timed out, releasing"
                );
                self.release_all();
                GroupWait::TimedOut
            }
        }
    }

    /// Release every waiter regardless of pending members.
    pub fn release_all(&self) {
        self.inner.released.send_replace(true);
    }

    /// Whether the group has been released.
    pub fn is_released(&self) -> bool {
        *self.inner.released.borrow()
    }

    /// Members that have not checked in.
    pub fn pending(&self) -> Vec<WindowId> {
        self.inner.pending.lock().iter().cloned().collect()
    }
}

impl std::fmt::Debug for RenderingGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderingGroup")
            .field("id", &self.inner.id)
            .field("pending", &self.pending().len())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ids(names: &[&str]) -> Vec<WindowId> {
        names.iter().map(|n| WindowId::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_released_when_all_check_in() {
        let group = RenderingGroup::new("page", ids(&["a", "b"]));
        let deadline = Instant::now() + Duration::from_secs(5);

        let waiter = {
            let group = group.clone();
            tokio::spawn(async move { group.check_in_and_wait(&WindowId::new("a"), deadline).await })
        };
        tokio::task::yield_now().await;
        assert!(!group.is_released());

        group.check_in(&WindowId::new("b"));
        assert_eq!(waiter.await.unwrap(), GroupWait::Ready);
        assert!(group.pending().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_releases_group() {
        let group = RenderingGroup::new("page", ids(&["a", "slow"]));
        let deadline = Instant::now() + Duration::from_millis(20);

        let outcome = group.check_in_and_wait(&WindowId::new("a"), deadline).await;
        assert_eq!(outcome, GroupWait::TimedOut);
        assert!(group.is_released());
        assert_eq!(group.pending(), ids(&["slow"]));
    }

    #[tokio::test]
    async fn test_double_check_in_is_harmless() {
        let group = RenderingGroup::new("page", ids(&["a"]));
        group.check_in(&WindowId::new("a"));
        group.check_in(&WindowId::new("a"));
        let outcome = group
            .wait_released(Instant::now() + Duration::from_millis(10))
            .await;
        assert_eq!(outcome, GroupWait::Ready);
    }

    #[test]
    fn test_empty_group_starts_released() {
        let group = RenderingGroup::new("empty", Vec::new());
        assert!(group.is_released());
    }
}
