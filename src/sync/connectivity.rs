// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Platform connectivity signal and background-sync registration.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::network::NetworkError;

#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Current and future online state (`true` = online).
    fn subscribe(&self) -> watch::Receiver<bool>;

    /// Ask the platform to wake the app for `tag` when connectivity returns.
    async fn register_background_sync(&self, tag: &str) -> Result<(), NetworkError>;
}

/// Connectivity driven by hand. For hosts that learn about network changes
/// from their own event loop, and for tests.
pub struct ManualConnectivity {
    online: watch::Sender<bool>,
    registered: Mutex<Vec<String>>,
}

impl ManualConnectivity {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self {
            online: tx,
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Tags passed to `register_background_sync` so far.
    pub fn registered_tags(&self) -> Vec<String> {
        self.registered.lock().clone()
    }
}

#[async_trait]
impl ConnectivitySource for ManualConnectivity {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    async fn register_background_sync(&self, tag: &str) -> Result<(), NetworkError> {
        self.registered.lock().push(tag.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_connectivity_broadcasts() {
        let source = ManualConnectivity::new(false);
        let mut rx = source.subscribe();
        assert!(!*rx.borrow());

        source.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(source.is_online());

        source.register_background_sync("offline-mutations").await.unwrap();
        assert_eq!(source.registered_tags(), vec!["offline-mutations"]);
    }
}
