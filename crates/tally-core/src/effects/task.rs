//! Runtime-agnostic task spawning trait.
//!
//! Counter recording and access logging run detached from the response path.
//! They are handed to a `TaskSpawner` so that tests can run them explicitly.

use futures::future::BoxFuture;
use std::sync::Arc;

/// Task spawning contract for runtime implementations.
pub trait TaskSpawner: Send + Sync {
    /// Spawn a detached background task.
    fn spawn(&self, fut: BoxFuture<'static, ()>);
}

impl<T: TaskSpawner + ?Sized> TaskSpawner for Arc<T> {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        (**self).spawn(fut)
    }
}
