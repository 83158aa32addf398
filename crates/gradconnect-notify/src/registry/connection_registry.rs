//! Connection Registry implementation.
//!
//! Tracks live connections per user for notification fan-out.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::connection::{Connection, ConnectionId, NotificationSink};
use crate::error::DeliveryError;
use crate::metrics;
use crate::notification::{Notification, OutboundNotification};
use crate::UserId;

/// Default deadline for handing a notification to one connection.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Deadline for a single connection's delivery. A connection that misses
    /// it is treated as dead and pruned.
    pub send_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Outcome of a send or broadcast.
///
/// Purely informational: delivery is best-effort and callers are not
/// expected to act on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the notification was offered to
    pub attempted: usize,
    /// Connections that accepted it
    pub delivered: usize,
    /// Connections removed because delivery failed
    pub pruned: usize,
}

/// Registry of live notification connections, keyed by user.
///
/// Thread-safe; share it behind an `Arc`. A user may hold any number of
/// connections (browser tabs, devices). A user with no connections has no
/// entry at all.
///
/// ## Usage
///
/// ```ignore
/// let registry = Arc::new(ConnectionRegistry::new());
///
/// // When a socket is accepted:
/// let (sink, rx) = ChannelSink::new(64);
/// let registration = registry.register_scoped(user_id, Arc::new(sink));
///
/// // From a request handler:
/// registry.send_to_user(&user_id, &Notification::new("mentorship_request")).await;
///
/// // When the socket task ends, dropping the registration unregisters it.
/// drop(registration);
/// ```
pub struct ConnectionRegistry {
    /// User id to that user's live connections (never empty)
    connections: DashMap<UserId, Vec<Arc<Connection>>>,
    /// Live connection count for the metrics gauge, updated under the entry lock
    active: AtomicUsize,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    /// Create a registry with the default send timeout.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        info!(send_timeout = ?config.send_timeout, "Creating connection registry");
        Self {
            connections: DashMap::new(),
            active: AtomicUsize::new(0),
            config,
        }
    }

    /// Deadline applied to each connection's delivery.
    pub fn send_timeout(&self) -> Duration {
        self.config.send_timeout
    }

    /// Register a connection for a user.
    ///
    /// The caller owns the pairing with [`unregister`](Self::unregister);
    /// prefer [`register_scoped`](Self::register_scoped) where possible.
    #[instrument(skip(self, sink), fields(user_id = %user_id))]
    pub fn register(&self, user_id: UserId, sink: Arc<dyn NotificationSink>) -> ConnectionId {
        let connection = Arc::new(Connection::new(user_id, sink));
        let connection_id = connection.id();

        let (user_connections, active) = {
            let mut entry = self.connections.entry(user_id).or_default();
            entry.push(connection);
            let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
            (entry.len(), active)
        };

        debug!(
            connection_id = %connection_id,
            connections = user_connections,
            "Registered connection"
        );
        metrics::record_connections(active);
        connection_id
    }

    /// Register a connection and tie its removal to the returned guard.
    pub fn register_scoped(
        self: &Arc<Self>,
        user_id: UserId,
        sink: Arc<dyn NotificationSink>,
    ) -> Registration {
        let connection_id = self.register(user_id, sink);
        Registration {
            registry: Arc::clone(self),
            user_id,
            connection_id,
        }
    }

    /// Remove a connection.
    ///
    /// Returns true if the connection was registered. Removing an absent
    /// connection is a no-op. The user's entry is deleted together with its
    /// last connection.
    #[instrument(skip(self), fields(user_id = %user_id, connection_id = %connection_id))]
    pub fn unregister(&self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        let remaining = match self.connections.entry(*user_id) {
            Entry::Occupied(mut entry) => {
                let before = entry.get().len();
                entry.get_mut().retain(|c| c.id() != connection_id);
                let active = (entry.get().len() != before)
                    .then(|| self.active.fetch_sub(1, Ordering::Relaxed) - 1);
                if entry.get().is_empty() {
                    entry.remove();
                }
                active
            }
            Entry::Vacant(_) => None,
        };

        match remaining {
            Some(active) => {
                debug!("Unregistered connection");
                metrics::record_connections(active);
                true
            }
            None => {
                debug!("Connection was not registered");
                false
            }
        }
    }

    /// Number of live connections for a user.
    pub fn connection_count(&self, user_id: &UserId) -> usize {
        self.connections
            .get(user_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Number of live connections across all users.
    pub fn total_connections(&self) -> usize {
        self.connections.iter().map(|entry| entry.len()).sum()
    }

    /// Number of users with at least one live connection.
    pub fn user_count(&self) -> usize {
        self.connections.len()
    }

    /// Check if a user holds any live connection.
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.connections.contains_key(user_id)
    }

    /// List users with at least one live connection.
    pub fn online_users(&self) -> Vec<UserId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Deliver a notification to every connection of one user.
    ///
    /// Silent no-op if the user has no connections. Connections that fail or
    /// time out are removed once the delivery pass has finished.
    #[instrument(skip(self, notification), fields(user_id = %user_id, kind = %notification.kind()))]
    pub async fn send_to_user(
        &self,
        user_id: &UserId,
        notification: &Notification,
    ) -> DeliveryReport {
        let targets = self
            .connections
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        if targets.is_empty() {
            debug!("User has no live connections, dropping notification");
            return DeliveryReport::default();
        }

        match encode_for_delivery(notification) {
            Some(outbound) => self.deliver_all(targets, &outbound).await,
            None => DeliveryReport::default(),
        }
    }

    /// Deliver a notification to every connection of every user.
    #[instrument(skip(self, notification), fields(kind = %notification.kind()))]
    pub async fn broadcast(&self, notification: &Notification) -> DeliveryReport {
        let targets: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();

        if targets.is_empty() {
            debug!("No live connections, dropping broadcast");
            return DeliveryReport::default();
        }

        match encode_for_delivery(notification) {
            Some(outbound) => self.deliver_all(targets, &outbound).await,
            None => DeliveryReport::default(),
        }
    }

    /// Remove every connection. Used at shutdown; the dropped sinks close
    /// their writer tasks.
    pub fn drain(&self) -> usize {
        let users: Vec<UserId> = self.online_users();
        let mut removed = 0;
        for user_id in users {
            if let Some((_, connections)) = self.connections.remove(&user_id) {
                self.active.fetch_sub(connections.len(), Ordering::Relaxed);
                removed += connections.len();
            }
        }

        if removed > 0 {
            info!(count = removed, "Drained connection registry");
        }
        metrics::record_connections(self.active.load(Ordering::Relaxed));
        removed
    }

    /// Deliver to a snapshot of connections concurrently. No map lock is held
    /// while waiting on a sink.
    async fn deliver_all(
        &self,
        targets: Vec<Arc<Connection>>,
        outbound: &OutboundNotification,
    ) -> DeliveryReport {
        let send_timeout = self.config.send_timeout;

        let attempts = targets.iter().map(|connection| async move {
            let result = match timeout(send_timeout, connection.deliver(outbound)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(send_timeout)),
            };
            (connection, result)
        });
        let results = join_all(attempts).await;

        let mut report = DeliveryReport {
            attempted: results.len(),
            ..DeliveryReport::default()
        };
        let mut failed = Vec::new();

        for (connection, result) in results {
            match result {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_delivery(outbound.kind(), Ok(()));
                }
                Err(e) => {
                    warn!(
                        user_id = %connection.user_id(),
                        connection_id = %connection.id(),
                        error = %e,
                        "Notification delivery failed, dropping connection"
                    );
                    metrics::record_delivery(outbound.kind(), Err(e.kind()));
                    failed.push((connection.user_id(), connection.id()));
                }
            }
        }

        for (user_id, connection_id) in failed {
            if self.unregister(&user_id, connection_id) {
                report.pruned += 1;
            }
        }

        debug!(
            attempted = report.attempted,
            delivered = report.delivered,
            pruned = report.pruned,
            "Delivery pass complete"
        );
        report
    }
}

fn encode_for_delivery(notification: &Notification) -> Option<OutboundNotification> {
    match notification.encode() {
        Ok(outbound) => Some(outbound),
        Err(e) => {
            warn!(error = %e, kind = %notification.kind(), "Failed to encode notification");
            metrics::record_delivery(notification.kind(), Err(e.kind()));
            None
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("user_count", &self.connections.len())
            .field("send_timeout", &self.config.send_timeout)
            .finish()
    }
}

/// Keeps a connection registered until dropped.
///
/// Dropping the guard unregisters the connection, whether the owning task
/// finished normally, failed, or was cancelled. If the connection was
/// already pruned the drop is a no-op.
#[must_use = "dropping a Registration unregisters the connection"]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    user_id: UserId,
    connection_id: ConnectionId,
}

impl Registration {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Whether the connection is still registered.
    pub fn is_registered(&self) -> bool {
        self.registry
            .connections
            .get(&self.user_id)
            .map(|entry| entry.iter().any(|c| c.id() == self.connection_id))
            .unwrap_or(false)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.user_id, self.connection_id);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("user_id", &self.user_id)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}
