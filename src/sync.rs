//! Small synchronization helpers shared by the conductor and the memory broker.

use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Acquire mutex guard, ignoring poisoning
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Token cancelled as soon as either `root` or `ctx` is cancelled.
///
/// The returned token is a child of `root`. A watcher task forwards `ctx`
/// cancellation and exits once the returned token is cancelled for any reason.
pub(crate) fn linked_token(root: &CancellationToken, ctx: &CancellationToken) -> CancellationToken {
    // ---
    let linked = root.child_token();
    if ctx.is_cancelled() {
        linked.cancel();
        return linked;
    }

    let ctx = ctx.clone();
    let watched = linked.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = ctx.cancelled() => watched.cancel(),
            _ = watched.cancelled() => {}
        }
    });
    linked
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_linked_follows_root() {
        // ---
        let root = CancellationToken::new();
        let ctx = CancellationToken::new();
        let linked = linked_token(&root, &ctx);

        root.cancel();
        linked.cancelled().await;
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_linked_follows_ctx() {
        // ---
        let root = CancellationToken::new();
        let ctx = CancellationToken::new();
        let linked = linked_token(&root, &ctx);

        ctx.cancel();
        linked.cancelled().await;
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_linked_already_cancelled() {
        // ---
        let root = CancellationToken::new();
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(linked_token(&root, &ctx).is_cancelled());
    }
}
