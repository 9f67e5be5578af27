//! Executor-agnostic task hand-off.
//!
//! The engine never spawns by itself. Attaching a sync client yields a
//! [`SyncTasks`] value holding the long-running futures; the host decides where
//! they run via [`SyncTasks::spawn_with`], or uses the tokio convenience.

use std::future::Future;
use std::pin::Pin;

/// A long-running engine task, ready to be spawned anywhere.
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The background tasks backing one sync client.
#[must_use = "the sync client does nothing until its tasks are spawned"]
pub struct SyncTasks {
    tasks: Vec<BoxedTask>,
}

impl SyncTasks {
    pub(crate) fn new(tasks: Vec<BoxedTask>) -> Self {
        Self { tasks }
    }

    /// Hands every task to `spawner`. The tasks run until the owning client is
    /// dropped or the database closes.
    pub fn spawn_with(self, mut spawner: impl FnMut(BoxedTask)) {
        for task in self.tasks {
            spawner(task);
        }
    }

    /// Spawns the tasks on the ambient tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn spawn_with_tokio(self) {
        self.spawn_with(|task| {
            tokio::spawn(task);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_with_hands_over_every_task() {
        let tasks = SyncTasks::new(vec![
            Box::pin(async {}),
            Box::pin(async {}),
        ]);

        let mut count = 0;
        tasks.spawn_with(|_task| count += 1);
        assert_eq!(count, 2);
    }
}
