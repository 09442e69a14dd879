// src/conductor/lifecycle.rs

//! Connection lifecycle: close the broker connection once the root context ends.

use tokio_util::sync::CancellationToken;

use crate::{log_error, log_info, ConnectionPtr};

pub(crate) struct ConnectionLifecycle {
    // ---
    connection: ConnectionPtr,
    root: CancellationToken,
    closed: CancellationToken,
}

impl ConnectionLifecycle {
    /// Take ownership of `connection` and close it when `root` is cancelled.
    ///
    /// A single task performs the close, so it happens exactly once no matter
    /// how many times or from where the root is cancelled.
    pub fn start(connection: ConnectionPtr, root: CancellationToken, label: String) -> Self {
        // ---
        let closed = CancellationToken::new();

        {
            let connection = connection.clone();
            let root = root.clone();
            let closed = closed.clone();

            tokio::spawn(async move {
                root.cancelled().await;

                match connection.close().await {
                    Ok(()) => log_info!("[{label}] broker connection closed"),
                    Err(e) => log_error!("[{label}] closing broker connection: {e}"),
                }
                closed.cancel();
            });
        }

        Self {
            connection,
            root,
            closed,
        }
    }

    pub fn connection(&self) -> &ConnectionPtr {
        &self.connection
    }

    /// Cancel the root context. Idempotent.
    pub fn cancel(&self) {
        self.root.cancel();
    }

    /// Cancel and wait until the connection has been closed.
    ///
    /// Every caller waits, including concurrent ones.
    pub async fn shutdown(&self) {
        // ---
        self.cancel();
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::MemoryHub;

    #[tokio::test]
    async fn test_closes_once() {
        // ---
        let hub = MemoryHub::new();
        let lifecycle =
            ConnectionLifecycle::start(hub.connect().unwrap(), CancellationToken::new(), "t".into());
        assert!(!lifecycle.is_closed());

        lifecycle.cancel();
        lifecycle.cancel();
        lifecycle.shutdown().await;
        lifecycle.shutdown().await;

        assert!(lifecycle.is_closed());
        assert_eq!(hub.connection_closes(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_shutdowns_all_wait() {
        // ---
        let hub = MemoryHub::new();
        let lifecycle =
            ConnectionLifecycle::start(hub.connect().unwrap(), CancellationToken::new(), "t".into());

        let ((), second_saw_closed) = tokio::join!(lifecycle.shutdown(), async {
            lifecycle.shutdown().await;
            lifecycle.is_closed()
        });

        assert!(second_saw_closed);
        assert_eq!(hub.connection_closes(), 1);
    }
}
