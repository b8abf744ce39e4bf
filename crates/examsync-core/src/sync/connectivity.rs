use tokio::sync::watch;
use tracing::info;

use crate::api::ApiClient;

/// Online/offline probe.
///
/// `subscribe` hands out a receiver that sees every transition; dropping
/// the receiver unsubscribes.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state fed by whoever can observe the network.
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Record the current state. Subscribers are only woken on an actual
    /// transition.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online = online, "Connectivity changed");
        }
    }

    /// Ping the remote service and record the result.
    pub async fn probe(&self, client: &ApiClient) -> bool {
        let online = client.ping().await;
        self.set_online(online);
        online
    }
}

impl Connectivity for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_transitions_only() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();
        assert!(!monitor.is_online());

        monitor.set_online(false);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(monitor.is_online());
    }

    #[test]
    fn test_set_online_without_subscribers() {
        let monitor = ConnectivityMonitor::new(true);
        monitor.set_online(false);
        assert!(!monitor.is_online());
    }
}
