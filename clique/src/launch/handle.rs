use crate::error::{CliqueError, Result};
use crate::types::{CollectiveKind, Rank};
use tokio::sync::oneshot;

/// A handle to a collective launched on a stream.
///
/// Await `wait()` (or call `wait_blocking()`) to learn the launch's outcome.
/// Dropping the handle does not cancel the launch: peers may already be
/// writing into this device's buffers, so the launch always runs to
/// completion on its stream.
pub struct LaunchHandle {
    operation: CollectiveKind,
    rank: Rank,
    done: oneshot::Receiver<Result<()>>,
}

impl LaunchHandle {
    pub(crate) fn new(
        operation: CollectiveKind,
        rank: Rank,
        done: oneshot::Receiver<Result<()>>,
    ) -> Self {
        Self {
            operation,
            rank,
            done,
        }
    }

    pub fn operation(&self) -> CollectiveKind {
        self.operation
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Wait for the launch to complete and propagate any error.
    pub async fn wait(self) -> Result<()> {
        let (operation, rank) = (self.operation, self.rank);
        self.done
            .await
            .map_err(|_| CliqueError::launch_failed(operation, rank, "stream dropped the launch"))?
    }

    /// Blocking variant of [`wait`](Self::wait). Must not be called from
    /// within an async context.
    pub fn wait_blocking(self) -> Result<()> {
        let (operation, rank) = (self.operation, self.rank);
        self.done
            .blocking_recv()
            .map_err(|_| CliqueError::launch_failed(operation, rank, "stream dropped the launch"))?
    }
}

impl std::fmt::Debug for LaunchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchHandle")
            .field("operation", &self.operation)
            .field("rank", &self.rank)
            .finish()
    }
}

/// A group of launches that can be waited on together.
pub struct LaunchGroup {
    handles: Vec<LaunchHandle>,
}

impl LaunchGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Add a handle to the group.
    pub fn push(&mut self, h: LaunchHandle) {
        self.handles.push(h);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for all launches in the group to complete.
    ///
    /// Returns the first error encountered, if any. All launches are awaited
    /// regardless of errors.
    pub async fn wait_all(self) -> Result<()> {
        let mut first_err = None;
        for h in self.handles {
            if let Err(e) = h.wait().await
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for LaunchGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Extend<LaunchHandle> for LaunchGroup {
    fn extend<I: IntoIterator<Item = LaunchHandle>>(&mut self, iter: I) {
        self.handles.extend(iter);
    }
}

impl FromIterator<LaunchHandle> for LaunchGroup {
    fn from_iter<I: IntoIterator<Item = LaunchHandle>>(iter: I) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}
