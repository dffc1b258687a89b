use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::connection::BrokerConnection;
use crate::error::{BrokerError, PoolError};
use crate::event::ConnectionStatus;

/// Builds a new, not yet connected, connection for `(broker_id, broker_url)`.
pub type ConnectionFactory<C> = Arc<dyn Fn(&str, &str) -> Arc<C> + Send + Sync>;

/// Pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: usize,
    /// How long `acquire` waits for a connection another caller is still
    /// establishing.
    pub connect_wait: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_wait: Duration::from_secs(30),
        }
    }
}

/// Snapshot returned by [`ConnectionPool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub max: usize,
    pub available: usize,
}

struct Entries<C> {
    connections: HashMap<String, Arc<C>>,
    shut_down: bool,
}

/// Bounded registry of long-lived broker connections keyed by broker id.
///
/// Checking capacity and registering a new connection happen under one
/// lock, so concurrent `acquire` calls for different brokers never push the
/// number of entries past `max_connections`. The connect itself runs
/// outside the lock; a failed connect frees its slot again.
pub struct ConnectionPool<C> {
    factory: ConnectionFactory<C>,
    settings: PoolSettings,
    entries: Mutex<Entries<C>>,
}

impl<C> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

enum Reservation<C> {
    Existing(Arc<C>),
    Pending(Arc<C>),
    Fresh(Arc<C>),
}

impl<C: BrokerConnection> ConnectionPool<C> {
    pub fn new(settings: PoolSettings, factory: ConnectionFactory<C>) -> Self {
        Self {
            factory,
            settings,
            entries: Mutex::new(Entries {
                connections: HashMap::new(),
                shut_down: false,
            }),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, Entries<C>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live connection for `broker_id`, creating and connecting
    /// one if there is spare capacity.
    #[instrument(skip(self, broker_url), fields(max = self.settings.max_connections))]
    pub async fn acquire(&self, broker_id: &str, broker_url: &str) -> Result<Arc<C>, PoolError> {
        let (reservation, stale) = self.reserve(broker_id, broker_url)?;

        if let Some(stale) = stale {
            debug!(broker_id, "replacing broker connection in {} state", stale.status());
            stale.disconnect().await;
        }

        match reservation {
            Reservation::Existing(conn) => Ok(conn),
            Reservation::Pending(conn) => {
                let settled = tokio::time::timeout(self.settings.connect_wait, wait_settled(&*conn)).await;
                match settled {
                    Ok(ConnectionStatus::Connected) => Ok(conn),
                    Ok(status) => Err(PoolError::Connect {
                        broker_id: broker_id.to_owned(),
                        source: BrokerError::Connect(format!("connection ended in {status} state")),
                    }),
                    Err(_) => Err(PoolError::Connect {
                        broker_id: broker_id.to_owned(),
                        source: BrokerError::Connect("timed out waiting for connection".into()),
                    }),
                }
            }
            Reservation::Fresh(conn) => match conn.connect().await {
                Ok(()) => {
                    info!(broker_id, "broker connection added to pool");
                    Ok(conn)
                }
                Err(source) => {
                    warn!(broker_id, error = %source, "broker connect failed, freeing slot");
                    {
                        let mut entries = self.lock();
                        if entries
                            .connections
                            .get(broker_id)
                            .is_some_and(|current| Arc::ptr_eq(current, &conn))
                        {
                            entries.connections.remove(broker_id);
                        }
                    }
                    conn.disconnect().await;
                    Err(PoolError::Connect {
                        broker_id: broker_id.to_owned(),
                        source,
                    })
                }
            },
        }
    }

    /// Capacity check and registration in one critical section.
    #[allow(clippy::type_complexity)]
    fn reserve(
        &self,
        broker_id: &str,
        broker_url: &str,
    ) -> Result<(Reservation<C>, Option<Arc<C>>), PoolError> {
        let mut entries = self.lock();
        if entries.shut_down {
            return Err(PoolError::ShutDown);
        }

        let mut stale = None;
        if let Some(existing) = entries.connections.get(broker_id) {
            match existing.status() {
                ConnectionStatus::Connected => {
                    return Ok((Reservation::Existing(Arc::clone(existing)), None));
                }
                ConnectionStatus::Connecting => {
                    return Ok((Reservation::Pending(Arc::clone(existing)), None));
                }
                ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                    stale = entries.connections.remove(broker_id);
                }
            }
        }

        if entries.connections.len() >= self.settings.max_connections {
            return Err(PoolError::Capacity {
                max: self.settings.max_connections,
            });
        }

        let conn = (self.factory)(broker_id, broker_url);
        entries
            .connections
            .insert(broker_id.to_owned(), Arc::clone(&conn));
        Ok((Reservation::Fresh(conn), stale))
    }

    /// Disconnect `broker_id` and free its slot. Returns whether an entry
    /// existed.
    #[instrument(skip(self))]
    pub async fn release(&self, broker_id: &str) -> bool {
        let removed = self.lock().connections.remove(broker_id);
        match removed {
            Some(conn) => {
                conn.disconnect().await;
                info!(broker_id, "broker connection released");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, broker_id: &str) -> Option<Arc<C>> {
        self.lock().connections.get(broker_id).cloned()
    }

    pub fn stats(&self) -> PoolStats {
        let active = self.lock().connections.len();
        let max = self.settings.max_connections;
        PoolStats {
            active,
            max,
            available: max.saturating_sub(active),
        }
    }

    /// Disconnect every connection and refuse further acquires.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<C>> = {
            let mut entries = self.lock();
            entries.shut_down = true;
            entries.connections.drain().map(|(_, conn)| conn).collect()
        };
        let count = drained.len();
        futures::future::join_all(drained.iter().map(|conn| conn.disconnect())).await;
        info!(count, "connection pool shut down");
    }
}

async fn wait_settled<C: BrokerConnection + ?Sized>(conn: &C) -> ConnectionStatus {
    let mut rx = conn.watch_status();
    match rx.wait_for(|status| *status != ConnectionStatus::Connecting).await {
        Ok(status) => *status,
        Err(_) => conn.status(),
    }
}
